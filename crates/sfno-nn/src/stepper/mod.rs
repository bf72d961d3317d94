// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Single- and multi-step forecast wrappers.

mod multi;
mod single;

pub use multi::MultiStepWrapper;
pub use single::SingleStepWrapper;

use crate::module::Module;
use crate::preprocessor::Preprocessor;
use serde::{Deserialize, Serialize};
use sfno_config::ConfigSection;
use sfno_tensor::{FieldTensor, PureResult, TensorError};
use std::fmt;

/// Whether a rollout trains (autoregressive loop) or evaluates (single pass).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RolloutMode {
    Train,
    Eval,
}

impl RolloutMode {
    pub fn is_training(self) -> bool {
        matches!(self, RolloutMode::Train)
    }
}

impl fmt::Display for RolloutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutMode::Train => f.write_str("train"),
            RolloutMode::Eval => f.write_str("eval"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepperConfig {
    /// Extra autoregressive steps after the first prediction during training.
    pub n_future: usize,
    /// Detach every rollout input so gradients only flow through one step.
    pub push_forward: bool,
}

impl ConfigSection for StepperConfig {
    const KEY: &'static str = "stepper";
    type Invalid = TensorError;

    /// Every combination of rollout length and detaching is accepted.
    fn validate(&self) -> PureResult<()> {
        Ok(())
    }
}

/// What a rollout did to the preprocessor state and the gradient graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RolloutReport {
    pub mode: RolloutMode,
    /// Model evaluations.
    pub steps: usize,
    /// `update_internal_state(true)` calls.
    pub resets: usize,
    /// `update_internal_state(false)` calls.
    pub advances: usize,
    /// Inputs cut from gradient tracking.
    pub detaches: usize,
}

impl RolloutReport {
    pub fn new(mode: RolloutMode) -> Self {
        Self {
            mode,
            steps: 0,
            resets: 0,
            advances: 0,
            detaches: 0,
        }
    }
}

/// Preprocess, run the model and postprocess one input.
///
/// Statistics are captured from the input before the model runs and used for
/// both normalisation and denormalisation, so the caller must not advance the
/// preprocessor state in between.
pub(crate) fn predict_step<M, P>(
    model: &M,
    preprocessor: &mut P,
    input: &FieldTensor,
) -> PureResult<FieldTensor>
where
    M: Module + ?Sized,
    P: Preprocessor + ?Sized,
{
    let appended = preprocessor.append_unpredicted_features(input)?;
    preprocessor.history_compute_stats(&appended)?;
    let normalized = preprocessor.history_normalize(&appended, false)?;
    let model_input = preprocessor.add_static_features(&normalized)?;
    let prediction = model.forward(&model_input)?;
    let corrected = preprocessor.correct_bias(&prediction)?;
    let denormalized = preprocessor.history_denormalize(&corrected, true)?;
    preprocessor.add_residual(input, &denormalized)
}
