// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Field tensors for spectral neural operators.
//!
//! Every tensor here is rank four: `[batch, channel, lat, lon]` on the grid and
//! `[batch, channel, mode_lat, mode_lon]` in the spectral domain. Grid tensors
//! carry the precision they logically live in so operators that compute in
//! full precision internally can hand results back in the caller's precision.

pub mod error;
pub mod field;
pub mod precision;
pub mod spectral;

pub use error::{PureResult, TensorError};
pub use field::FieldTensor;
pub use num_complex::Complex32;
pub use precision::Precision;
pub use spectral::SpectralTensor;
