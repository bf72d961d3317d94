// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{predict_step, RolloutMode, RolloutReport, StepperConfig};
use crate::module::Module;
use crate::preprocessor::Preprocessor;
use sfno_tensor::{FieldTensor, PureResult};
use tracing::{debug, debug_span, trace};

/// Autoregressive rollout controller.
///
/// Training rolls the model forward `n_future + 1` times, feeding each
/// prediction back into the history, and returns all predictions stacked on
/// the channel axis. Evaluation runs a single step.
#[derive(Debug)]
pub struct MultiStepWrapper<M, P> {
    model: M,
    preprocessor: P,
    config: StepperConfig,
}

impl<M: Module, P: Preprocessor> MultiStepWrapper<M, P> {
    pub fn new(model: M, preprocessor: P, config: StepperConfig) -> Self {
        Self {
            model,
            preprocessor,
            config,
        }
    }

    pub fn config(&self) -> &StepperConfig {
        &self.config
    }

    pub fn n_future(&self) -> usize {
        self.config.n_future
    }

    pub fn push_forward(&self) -> bool {
        self.config.push_forward
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

    pub fn forward(&mut self, input: &FieldTensor, mode: RolloutMode) -> PureResult<FieldTensor> {
        self.forward_with_report(input, mode).map(|(out, _)| out)
    }

    /// Runs the rollout and reports the state transitions it performed.
    pub fn forward_with_report(
        &mut self,
        input: &FieldTensor,
        mode: RolloutMode,
    ) -> PureResult<(FieldTensor, RolloutReport)> {
        let span = debug_span!(
            "rollout",
            %mode,
            n_future = self.config.n_future,
            push_forward = self.config.push_forward
        );
        let _entered = span.enter();
        self.model.set_training(mode.is_training());
        let (out, report) = match mode {
            RolloutMode::Train => self.rollout_train(input)?,
            RolloutMode::Eval => self.rollout_eval(input)?,
        };
        debug!(
            steps = report.steps,
            resets = report.resets,
            advances = report.advances,
            detaches = report.detaches,
            "rollout finished"
        );
        Ok((out, report))
    }

    fn rollout_train(&mut self, input: &FieldTensor) -> PureResult<(FieldTensor, RolloutReport)> {
        let mut report = RolloutReport::new(RolloutMode::Train);
        let n_future = self.config.n_future;
        let mut state = input.clone();
        let mut predictions = Vec::with_capacity(n_future + 1);

        self.preprocessor.update_internal_state(true);
        report.resets += 1;

        for step in 0..=n_future {
            if self.config.push_forward {
                state = state.detach();
                report.detaches += 1;
            }
            let prediction = predict_step(&self.model, &mut self.preprocessor, &state)?;
            report.steps += 1;
            trace!(step, requires_grad = prediction.requires_grad(), "rollout step");

            if step == n_future {
                predictions.push(prediction);
                break;
            }
            self.preprocessor.update_internal_state(false);
            report.advances += 1;
            state = self.preprocessor.append_history(&state, &prediction, step)?;
            predictions.push(prediction);
        }

        Ok((FieldTensor::concat_channels(&predictions)?, report))
    }

    fn rollout_eval(&mut self, input: &FieldTensor) -> PureResult<(FieldTensor, RolloutReport)> {
        let mut report = RolloutReport::new(RolloutMode::Eval);
        self.preprocessor.update_internal_state(true);
        report.resets += 1;
        let prediction = predict_step(&self.model, &mut self.preprocessor, input)?;
        report.steps += 1;
        Ok((prediction, report))
    }
}
