// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::SpectralOperator;
use crate::module::{Module, Parameter};
use crate::sharding::ShardingTable;
use sfno_tensor::{FieldTensor, PureResult};

/// Wraps a spectral operator as a plain [`Module`], optionally adding the
/// operator's residual to its output.
#[derive(Debug)]
pub struct SpectralBlock<O> {
    operator: O,
    residual_skip: bool,
}

impl<O: SpectralOperator> SpectralBlock<O> {
    pub fn new(operator: O) -> Self {
        Self {
            operator,
            residual_skip: false,
        }
    }

    /// Adds the residual path to the output. Requires the operator to keep the
    /// channel count.
    pub fn with_residual_skip(mut self, enabled: bool) -> Self {
        self.residual_skip = enabled;
        self
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn operator_mut(&mut self) -> &mut O {
        &mut self.operator
    }

    pub fn into_inner(self) -> O {
        self.operator
    }
}

impl<O: SpectralOperator> Module for SpectralBlock<O> {
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
        let (out, residual) = self.operator.forward_with_residual(input)?;
        if self.residual_skip {
            out.add(&residual.to_precision(out.precision()))
        } else {
            Ok(out)
        }
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.operator.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.operator.visit_parameters_mut(visitor)
    }

    fn set_training(&self, training: bool) {
        self.operator.set_training(training);
    }

    fn sharding(&self) -> ShardingTable {
        self.operator.sharding()
    }
}
