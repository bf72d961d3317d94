// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sfno_nn::transform::{InverseRealFft2, RealFft2};
use sfno_nn::{
    FieldTensor, HistoryNormalization, HistoryPreprocessor, HistoryPreprocessorConfig, Module,
    MultiStepWrapper, Parameter, Preprocessor, PureResult, RolloutMode, SingleStepWrapper,
    SpectralConv, SpectralConvConfig, StepperConfig,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

type Log = Rc<RefCell<Vec<String>>>;

/// Adds one to its input and records what it saw.
struct RecordingModel {
    log: Log,
    training: Cell<Option<bool>>,
    saw_grad: RefCell<Vec<bool>>,
}

impl RecordingModel {
    fn new(log: Log) -> Self {
        Self {
            log,
            training: Cell::new(None),
            saw_grad: RefCell::new(Vec::new()),
        }
    }
}

impl Module for RecordingModel {
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.log.borrow_mut().push("model".into());
        self.saw_grad.borrow_mut().push(input.requires_grad());
        Ok(input.add(&FieldTensor::from_fn(input.shape(), |_, _, _, _| 1.0)?)?
            .with_requires_grad(true))
    }

    fn visit_parameters(
        &self,
        _visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        _visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        Ok(())
    }

    fn set_training(&self, training: bool) {
        self.training.set(Some(training));
    }
}

/// Pass-through preprocessor that logs every call.
struct RecordingPreprocessor {
    log: Log,
}

impl RecordingPreprocessor {
    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl Preprocessor for RecordingPreprocessor {
    fn update_internal_state(&mut self, replace_state: bool) {
        self.record(format!("update_internal_state({replace_state})"));
    }

    fn append_unpredicted_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.record("append_unpredicted_features".into());
        Ok(input.clone())
    }

    fn history_compute_stats(&mut self, _input: &FieldTensor) -> PureResult<()> {
        self.record("history_compute_stats".into());
        Ok(())
    }

    fn history_normalize(&mut self, input: &FieldTensor, target: bool) -> PureResult<FieldTensor> {
        self.record(format!("history_normalize({target})"));
        Ok(input.clone())
    }

    fn add_static_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.record("add_static_features".into());
        Ok(input.clone())
    }

    fn correct_bias(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.record("correct_bias".into());
        Ok(input.clone())
    }

    fn history_denormalize(
        &mut self,
        input: &FieldTensor,
        target: bool,
    ) -> PureResult<FieldTensor> {
        self.record(format!("history_denormalize({target})"));
        Ok(input.clone())
    }

    fn add_residual(
        &mut self,
        _original: &FieldTensor,
        predicted: &FieldTensor,
    ) -> PureResult<FieldTensor> {
        self.record("add_residual".into());
        Ok(predicted.clone())
    }

    fn append_history(
        &mut self,
        _original: &FieldTensor,
        predicted: &FieldTensor,
        step_index: usize,
    ) -> PureResult<FieldTensor> {
        self.record(format!("append_history({step_index})"));
        Ok(predicted.clone())
    }
}

fn recording_wrapper(
    n_future: usize,
    push_forward: bool,
) -> (MultiStepWrapper<RecordingModel, RecordingPreprocessor>, Log) {
    let log: Log = Rc::default();
    let wrapper = MultiStepWrapper::new(
        RecordingModel::new(log.clone()),
        RecordingPreprocessor { log: log.clone() },
        StepperConfig {
            n_future,
            push_forward,
        },
    );
    (wrapper, log)
}

const STEP: [&str; 8] = [
    "append_unpredicted_features",
    "history_compute_stats",
    "history_normalize(false)",
    "add_static_features",
    "model",
    "correct_bias",
    "history_denormalize(true)",
    "add_residual",
];

fn input() -> FieldTensor {
    FieldTensor::zeros([1, 2, 4, 4])
        .unwrap()
        .with_requires_grad(true)
}

#[test]
fn training_rollout_follows_the_documented_sequence() {
    let (mut wrapper, log) = recording_wrapper(1, false);
    let out = wrapper.forward(&input(), RolloutMode::Train).unwrap();

    let mut expected = vec!["update_internal_state(true)".to_string()];
    expected.extend(STEP.iter().map(|s| s.to_string()));
    expected.push("update_internal_state(false)".into());
    expected.push("append_history(0)".into());
    expected.extend(STEP.iter().map(|s| s.to_string()));
    assert_eq!(*log.borrow(), expected);

    // predictions 1 and 2 stacked on the channel axis
    assert_eq!(out.shape(), [1, 4, 4, 4]);
    assert_eq!(out.data()[[0, 0, 0, 0]], 1.0);
    assert_eq!(out.data()[[0, 3, 0, 0]], 2.0);
    assert_eq!(wrapper.model().training.get(), Some(true));
}

#[test]
fn training_rollout_resets_once_and_advances_n_future_times() {
    for n_future in [0, 1, 4] {
        let (mut wrapper, log) = recording_wrapper(n_future, false);
        let (out, report) = wrapper
            .forward_with_report(&input(), RolloutMode::Train)
            .unwrap();
        let log = log.borrow();
        let resets = log.iter().filter(|e| *e == "update_internal_state(true)").count();
        let advances = log.iter().filter(|e| *e == "update_internal_state(false)").count();
        assert_eq!(resets, 1);
        assert_eq!(advances, n_future);
        assert_eq!(log[0], "update_internal_state(true)");
        assert_eq!(report.resets, 1);
        assert_eq!(report.advances, n_future);
        assert_eq!(report.steps, n_future + 1);
        assert_eq!(out.channels(), 2 * (n_future + 1));
    }
}

#[test]
fn push_forward_detaches_every_training_input() {
    let (mut wrapper, _) = recording_wrapper(2, true);
    let (_, report) = wrapper
        .forward_with_report(&input(), RolloutMode::Train)
        .unwrap();
    assert_eq!(report.detaches, 3);
    assert_eq!(*wrapper.model().saw_grad.borrow(), vec![false, false, false]);

    let (mut wrapper, _) = recording_wrapper(2, false);
    wrapper.forward(&input(), RolloutMode::Train).unwrap();
    assert_eq!(*wrapper.model().saw_grad.borrow(), vec![true, true, true]);
}

#[test]
fn evaluation_never_detaches_and_runs_once() {
    for push_forward in [false, true] {
        let (mut wrapper, log) = recording_wrapper(3, push_forward);
        let (out, report) = wrapper
            .forward_with_report(&input(), RolloutMode::Eval)
            .unwrap();
        assert_eq!(report.detaches, 0);
        assert_eq!(report.resets, 1);
        assert_eq!(report.advances, 0);
        assert_eq!(report.steps, 1);
        assert_eq!(out.channels(), 2);
        assert_eq!(*wrapper.model().saw_grad.borrow(), vec![true]);
        assert_eq!(wrapper.model().training.get(), Some(false));

        let mut expected = vec!["update_internal_state(true)".to_string()];
        expected.extend(STEP.iter().map(|s| s.to_string()));
        assert_eq!(*log.borrow(), expected);
    }
}

#[test]
fn single_step_uses_the_same_pipeline() {
    let log: Log = Rc::default();
    let mut wrapper = SingleStepWrapper::new(
        RecordingModel::new(log.clone()),
        RecordingPreprocessor { log: log.clone() },
    );
    wrapper.forward_with_state(&input(), false).unwrap();
    let mut expected = vec!["update_internal_state(false)".to_string()];
    expected.extend(STEP.iter().map(|s| s.to_string()));
    assert_eq!(*log.borrow(), expected);
}

fn spectral_model(seed: u64) -> SpectralConv {
    let config = SpectralConvConfig {
        in_channels: 4,
        out_channels: 2,
        seed: Some(seed),
        ..SpectralConvConfig::default()
    };
    SpectralConv::new(
        "model",
        Arc::new(RealFft2::new(8, 16, Some(6), Some(6)).unwrap()),
        Arc::new(InverseRealFft2::new(8, 16, Some(6), Some(6)).unwrap()),
        &config,
    )
    .unwrap()
}

fn history_preprocessor() -> HistoryPreprocessor {
    HistoryPreprocessor::new(HistoryPreprocessorConfig {
        n_channels: 2,
        n_history: 1,
        history_normalization: HistoryNormalization::Mean,
        residual: true,
        ..HistoryPreprocessorConfig::default()
    })
    .unwrap()
}

#[test]
fn multi_step_with_no_future_matches_single_step() {
    let input = FieldTensor::random_normal([2, 4, 8, 16], 1.0, 2.0, Some(99)).unwrap();

    let mut single = SingleStepWrapper::new(spectral_model(5), history_preprocessor());
    let mut multi = MultiStepWrapper::new(
        spectral_model(5),
        history_preprocessor(),
        StepperConfig {
            n_future: 0,
            push_forward: true,
        },
    );
    let a = single.forward(&input).unwrap();
    let b = multi.forward(&input, RolloutMode::Train).unwrap();
    assert_eq!(a.data(), b.data());
    assert_eq!(a.shape(), [2, 2, 8, 16]);
}

#[test]
fn spectral_rollout_feeds_predictions_back_into_history() {
    let input = FieldTensor::random_normal([1, 4, 8, 16], 0.0, 1.0, Some(3)).unwrap();
    let mut multi = MultiStepWrapper::new(
        spectral_model(11),
        history_preprocessor(),
        StepperConfig {
            n_future: 2,
            push_forward: false,
        },
    );
    let rollout = multi.forward(&input, RolloutMode::Train).unwrap();
    assert_eq!(rollout.shape(), [1, 6, 8, 16]);
    assert_eq!(multi.preprocessor().step(), 2);
    rollout.ensure_finite("rollout").unwrap();

    // the first prediction matches a fresh single step
    let mut single = SingleStepWrapper::new(spectral_model(11), history_preprocessor());
    let first = single.forward(&input).unwrap();
    assert_eq!(rollout.slice_channels(0, 2).unwrap().data(), first.data());

    // the second one is the single step on the rolled history
    let history = FieldTensor::concat_channels(&[input.slice_channels(2, 4).unwrap(), first])
        .unwrap();
    let second = single.forward_with_state(&history, false).unwrap();
    assert!(
        rollout
            .slice_channels(2, 4)
            .unwrap()
            .max_abs_diff(&second)
            .unwrap()
            < 1e-5
    );
}
