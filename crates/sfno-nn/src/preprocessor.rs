// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! History buffers, normalisation statistics and feature plumbing around a
//! forecast model.

use ndarray::{s, Array2, Array4, Axis};
use serde::{Deserialize, Serialize};
use sfno_config::ConfigSection;
use sfno_tensor::{FieldTensor, PureResult, TensorError};
use tracing::trace;

/// Operations the step wrappers sequence around the model.
pub trait Preprocessor {
    /// Resets the rollout state when `replace_state` is set, otherwise
    /// advances it by one step.
    fn update_internal_state(&mut self, replace_state: bool);

    fn append_unpredicted_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor>;

    /// Captures normalisation statistics from the current input history.
    fn history_compute_stats(&mut self, input: &FieldTensor) -> PureResult<()>;

    fn history_normalize(&mut self, input: &FieldTensor, target: bool) -> PureResult<FieldTensor>;

    fn add_static_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor>;

    fn correct_bias(&mut self, input: &FieldTensor) -> PureResult<FieldTensor>;

    fn history_denormalize(&mut self, input: &FieldTensor, target: bool)
        -> PureResult<FieldTensor>;

    /// Turns a predicted increment into a state; the identity for direct
    /// prediction.
    fn add_residual(
        &mut self,
        original: &FieldTensor,
        predicted: &FieldTensor,
    ) -> PureResult<FieldTensor>;

    /// Builds the next rollout input from the previous input and the prediction.
    fn append_history(
        &mut self,
        original: &FieldTensor,
        predicted: &FieldTensor,
        step_index: usize,
    ) -> PureResult<FieldTensor>;
}

/// Statistics used by [`HistoryPreprocessor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryNormalization {
    /// Inputs pass through unchanged.
    #[default]
    None,
    /// Per sample and channel mean/std over history and grid.
    Mean,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryPreprocessorConfig {
    /// Predicted channels per snapshot.
    pub n_channels: usize,
    /// Past snapshots stacked in front of the newest one.
    pub n_history: usize,
    pub history_normalization: HistoryNormalization,
    pub history_eps: f32,
    /// Residual learning: the model predicts an increment on the newest snapshot.
    pub residual: bool,
}

impl Default for HistoryPreprocessorConfig {
    fn default() -> Self {
        Self {
            n_channels: 1,
            n_history: 0,
            history_normalization: HistoryNormalization::None,
            history_eps: 1e-6,
            residual: false,
        }
    }
}

impl ConfigSection for HistoryPreprocessorConfig {
    const KEY: &'static str = "preprocessor";
    type Invalid = TensorError;

    fn validate(&self) -> PureResult<()> {
        if self.n_channels == 0 {
            return Err(TensorError::InvalidValue {
                label: "preprocessor_channels",
            });
        }
        if !(self.history_eps >= 0.0) {
            return Err(TensorError::InvalidValue {
                label: "history_eps",
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
struct HistoryStats {
    /// `[batch, channels_per_snapshot]`
    mean: Array2<f32>,
    std: Array2<f32>,
}

/// Concrete preprocessor for stacked-snapshot inputs `[B, (n_history + 1) * C, H, W]`.
#[derive(Clone, Debug)]
pub struct HistoryPreprocessor {
    config: HistoryPreprocessorConfig,
    static_features: Option<FieldTensor>,
    unpredicted: Option<Vec<FieldTensor>>,
    bias_correction: Option<Vec<f32>>,
    step: usize,
    stats: Option<HistoryStats>,
}

impl HistoryPreprocessor {
    pub fn new(config: HistoryPreprocessorConfig) -> PureResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            static_features: None,
            unpredicted: None,
            bias_correction: None,
            step: 0,
            stats: None,
        })
    }

    /// Static features `[1, S, H, W]` appended to every model input.
    pub fn with_static_features(mut self, features: FieldTensor) -> PureResult<Self> {
        if features.batch() != 1 {
            return Err(TensorError::ShapeMismatch {
                left: features.shape().to_vec(),
                right: vec![1, features.channels(), features.nlat(), features.nlon()],
            });
        }
        self.static_features = Some(features);
        Ok(self)
    }

    /// Per-channel offset subtracted from the normalised prediction.
    pub fn with_bias_correction(mut self, bias: Vec<f32>) -> PureResult<Self> {
        if bias.len() != self.config.n_channels {
            return Err(TensorError::DataLength {
                expected: self.config.n_channels,
                got: bias.len(),
            });
        }
        self.bias_correction = Some(bias);
        Ok(self)
    }

    /// Installs the unpredicted (forcing) frames of a rollout, oldest first.
    /// Frame `k` belongs to snapshot `k` of the first input.
    pub fn set_unpredicted(&mut self, frames: Vec<FieldTensor>) {
        self.unpredicted = Some(frames);
    }

    pub fn clear_unpredicted(&mut self) {
        self.unpredicted = None;
    }

    pub fn config(&self) -> &HistoryPreprocessorConfig {
        &self.config
    }

    pub fn snapshots(&self) -> usize {
        self.config.n_history + 1
    }

    /// Rollout step the internal state currently points at.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Captured per-sample means, `[batch, channels_per_snapshot]`.
    pub fn history_mean(&self) -> Option<&Array2<f32>> {
        self.stats.as_ref().map(|stats| &stats.mean)
    }

    pub fn history_std(&self) -> Option<&Array2<f32>> {
        self.stats.as_ref().map(|stats| &stats.std)
    }

    fn expect_channels(&self, input: &FieldTensor, per_snapshot: usize) -> PureResult<()> {
        let expected = self.snapshots() * per_snapshot;
        if input.channels() != expected {
            return Err(TensorError::ShapeMismatch {
                left: input.shape().to_vec(),
                right: vec![input.batch(), expected, input.nlat(), input.nlon()],
            });
        }
        Ok(())
    }

    /// Applies `op(value, mean, std)` with channel `j` mapped onto statistic
    /// `j % n`, where `n` covers all channels of a snapshot or only the
    /// predicted ones for targets.
    fn apply_stats<F>(&self, input: &FieldTensor, target: bool, op: F) -> PureResult<FieldTensor>
    where
        F: Fn(f32, f32, f32) -> f32,
    {
        if self.config.history_normalization == HistoryNormalization::None {
            return Ok(input.clone());
        }
        let stats = self.stats.as_ref().ok_or(TensorError::InvalidValue {
            label: "history_stats_missing",
        })?;
        let per_snapshot = stats.mean.dim().1;
        let width = if target {
            self.config.n_channels.min(per_snapshot)
        } else {
            per_snapshot
        };
        if input.batch() != stats.mean.dim().0 || input.channels() % width != 0 {
            return Err(TensorError::ShapeMismatch {
                left: input.shape().to_vec(),
                right: vec![stats.mean.dim().0, width],
            });
        }
        let mut data = input.data().clone();
        for (b, mut sample) in data.axis_iter_mut(Axis(0)).enumerate() {
            for (c, mut plane) in sample.axis_iter_mut(Axis(0)).enumerate() {
                let mean = stats.mean[[b, c % width]];
                let std = stats.std[[b, c % width]];
                plane.mapv_inplace(|value| op(value, mean, std));
            }
        }
        input.like(data)
    }
}

impl Preprocessor for HistoryPreprocessor {
    fn update_internal_state(&mut self, replace_state: bool) {
        if replace_state {
            self.step = 0;
            self.stats = None;
        } else {
            self.step += 1;
        }
        trace!(step = self.step, replace_state, "preprocessor state updated");
    }

    fn append_unpredicted_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        let Some(frames) = &self.unpredicted else {
            return Ok(input.clone());
        };
        let per_snapshot = self.config.n_channels;
        self.expect_channels(input, per_snapshot)?;
        let mut pieces = Vec::with_capacity(2 * self.snapshots());
        for snapshot in 0..self.snapshots() {
            let frame = frames
                .get(self.step + snapshot)
                .ok_or(TensorError::InvalidValue {
                    label: "unpredicted_frames_exhausted",
                })?;
            pieces.push(input.slice_channels(
                snapshot * per_snapshot,
                (snapshot + 1) * per_snapshot,
            )?);
            pieces.push(frame.clone());
        }
        FieldTensor::concat_channels(&pieces)
    }

    fn history_compute_stats(&mut self, input: &FieldTensor) -> PureResult<()> {
        if self.config.history_normalization == HistoryNormalization::None {
            self.stats = None;
            return Ok(());
        }
        let snapshots = self.snapshots();
        if input.channels() % snapshots != 0 {
            return Err(TensorError::IndivisibleChannels {
                label: "history_snapshots",
                channels: input.channels(),
                groups: snapshots,
            });
        }
        let per_snapshot = input.channels() / snapshots;
        let batch = input.batch();
        let data = input.data();
        let count = (snapshots * input.nlat() * input.nlon()) as f64;
        let mut mean = Array2::zeros((batch, per_snapshot));
        let mut std = Array2::zeros((batch, per_snapshot));
        let mut values = Vec::with_capacity(snapshots * input.nlat() * input.nlon());
        for b in 0..batch {
            for c in 0..per_snapshot {
                values.clear();
                for t in 0..snapshots {
                    values.extend(
                        data.slice(s![b, t * per_snapshot + c, .., ..])
                            .iter()
                            .map(|&v| f64::from(v)),
                    );
                }
                let m = values.iter().sum::<f64>() / count;
                let var = if values.len() > 1 {
                    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (count - 1.0)
                } else {
                    0.0
                };
                mean[[b, c]] = m as f32;
                std[[b, c]] = var.sqrt() as f32 + self.config.history_eps;
            }
        }
        self.stats = Some(HistoryStats { mean, std });
        Ok(())
    }

    fn history_normalize(&mut self, input: &FieldTensor, target: bool) -> PureResult<FieldTensor> {
        self.apply_stats(input, target, |value, mean, std| (value - mean) / std)
    }

    fn add_static_features(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        let Some(features) = &self.static_features else {
            return Ok(input.clone());
        };
        let [batch, _, nlat, nlon] = input.shape();
        let channels = features.channels();
        let broadcast = features
            .data()
            .broadcast((batch, channels, nlat, nlon))
            .ok_or_else(|| TensorError::ShapeMismatch {
                left: input.shape().to_vec(),
                right: features.shape().to_vec(),
            })?
            .to_owned();
        let features = FieldTensor::new(broadcast)?;
        FieldTensor::concat_channels(&[input.clone(), features])
    }

    fn correct_bias(&mut self, input: &FieldTensor) -> PureResult<FieldTensor> {
        let Some(bias) = &self.bias_correction else {
            return Ok(input.clone());
        };
        let width = bias.len();
        if input.channels() % width != 0 {
            return Err(TensorError::IndivisibleChannels {
                label: "bias_correction",
                channels: input.channels(),
                groups: width,
            });
        }
        let mut data: Array4<f32> = input.data().clone();
        for (c, mut plane) in data.axis_iter_mut(Axis(1)).enumerate() {
            let shift = bias[c % width];
            plane.mapv_inplace(|value| value - shift);
        }
        input.like(data)
    }

    fn history_denormalize(
        &mut self,
        input: &FieldTensor,
        target: bool,
    ) -> PureResult<FieldTensor> {
        self.apply_stats(input, target, |value, mean, std| value * std + mean)
    }

    fn add_residual(
        &mut self,
        original: &FieldTensor,
        predicted: &FieldTensor,
    ) -> PureResult<FieldTensor> {
        if !self.config.residual {
            return Ok(predicted.clone());
        }
        let per_snapshot = self.config.n_channels;
        self.expect_channels(original, per_snapshot)?;
        let newest = original.slice_channels(
            (self.snapshots() - 1) * per_snapshot,
            self.snapshots() * per_snapshot,
        )?;
        predicted.add(&newest)
    }

    fn append_history(
        &mut self,
        original: &FieldTensor,
        predicted: &FieldTensor,
        step_index: usize,
    ) -> PureResult<FieldTensor> {
        let per_snapshot = self.config.n_channels;
        self.expect_channels(original, per_snapshot)?;
        if predicted.channels() != per_snapshot {
            return Err(TensorError::ShapeMismatch {
                left: predicted.shape().to_vec(),
                right: vec![predicted.batch(), per_snapshot, predicted.nlat(), predicted.nlon()],
            });
        }
        trace!(step_index, "appending prediction to history");
        if self.snapshots() == 1 {
            return Ok(predicted.clone());
        }
        let kept = original.slice_channels(per_snapshot, original.channels())?;
        FieldTensor::concat_channels(&[kept, predicted.clone()])
    }
}
