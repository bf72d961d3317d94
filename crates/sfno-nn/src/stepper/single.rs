// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::predict_step;
use crate::module::Module;
use crate::preprocessor::Preprocessor;
use sfno_tensor::{FieldTensor, PureResult};
use tracing::trace;

/// Runs one forecast step through the preprocessor pipeline.
#[derive(Debug)]
pub struct SingleStepWrapper<M, P> {
    model: M,
    preprocessor: P,
}

impl<M: Module, P: Preprocessor> SingleStepWrapper<M, P> {
    pub fn new(model: M, preprocessor: P) -> Self {
        Self {
            model,
            preprocessor,
        }
    }

    /// Forecasts one step from a fresh preprocessor state.
    pub fn forward(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.forward_with_state(input, true)
    }

    /// Forecasts one step; `replace_state = false` continues the current
    /// rollout instead of resetting it.
    pub fn forward_with_state(
        &mut self,
        input: &FieldTensor,
        replace_state: bool,
    ) -> PureResult<FieldTensor> {
        trace!(replace_state, shape = ?input.shape(), "single step");
        self.preprocessor.update_internal_state(replace_state);
        predict_step(&self.model, &mut self.preprocessor, input)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn preprocessor(&self) -> &P {
        &self.preprocessor
    }

    pub fn preprocessor_mut(&mut self) -> &mut P {
        &mut self.preprocessor
    }

    pub fn into_parts(self) -> (M, P) {
        (self.model, self.preprocessor)
    }
}
