// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

pub mod activation;
pub mod block;
pub mod dropout;
mod init;
pub mod spectral_attention;
pub mod spectral_conv;

use crate::module::Module;
use sfno_tensor::{FieldTensor, PureResult};

/// Operator that also reports the skip path produced alongside its output.
pub trait SpectralOperator: Module {
    /// Returns `(output, residual)`. The residual is the raw input when both
    /// transforms share a grid, otherwise the low-pass reconstruction of the
    /// unmixed spectrum on the output grid.
    fn forward_with_residual(&self, input: &FieldTensor)
        -> PureResult<(FieldTensor, FieldTensor)>;
}
