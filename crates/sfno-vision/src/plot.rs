// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{VisualizationError, VisualizationResult};
use ndarray::{Array2, ArrayView3, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

type ExtractFn = dyn Fn(ArrayView3<'_, f32>) -> Array2<f32> + Send + Sync;

/// Reduces one `[channel, lat, lon]` sample to the 2D map that gets plotted.
#[derive(Clone)]
pub enum FieldExtractor {
    /// Plots a single channel as-is.
    Channel(usize),
    /// Plots `sqrt(a² + b²)` of two channels, e.g. wind speed from u/v.
    Magnitude(usize, usize),
    Custom(Arc<ExtractFn>),
}

impl FieldExtractor {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(ArrayView3<'_, f32>) -> Array2<f32> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn extract(
        &self,
        field: &str,
        sample: ArrayView3<'_, f32>,
    ) -> VisualizationResult<Array2<f32>> {
        let channels = sample.len_of(Axis(0));
        let check = |channel: usize| {
            if channel < channels {
                Ok(())
            } else {
                Err(VisualizationError::ChannelOutOfRange {
                    field: field.to_string(),
                    channel,
                    channels,
                })
            }
        };
        let map = match self {
            FieldExtractor::Channel(channel) => {
                check(*channel)?;
                sample.index_axis(Axis(0), *channel).to_owned()
            }
            FieldExtractor::Magnitude(a, b) => {
                check(*a)?;
                check(*b)?;
                let mut out = sample.index_axis(Axis(0), *a).to_owned();
                Zip::from(&mut out)
                    .and(sample.index_axis(Axis(0), *b))
                    .for_each(|x, &y| *x = (*x * *x + y * y).sqrt());
                out
            }
            FieldExtractor::Custom(f) => f(sample),
        };
        if map.is_empty() {
            return Err(VisualizationError::EmptyExtraction {
                field: field.to_string(),
                shape: map.shape().to_vec(),
            });
        }
        Ok(map)
    }
}

impl fmt::Debug for FieldExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldExtractor::Channel(c) => f.debug_tuple("Channel").field(c).finish(),
            FieldExtractor::Magnitude(a, b) => {
                f.debug_tuple("Magnitude").field(a).field(b).finish()
            }
            FieldExtractor::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Serializable form of the built-in extractors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorSpec {
    Channel(usize),
    Magnitude([usize; 2]),
}

impl From<ExtractorSpec> for FieldExtractor {
    fn from(spec: ExtractorSpec) -> Self {
        match spec {
            ExtractorSpec::Channel(c) => FieldExtractor::Channel(c),
            ExtractorSpec::Magnitude([a, b]) => FieldExtractor::Magnitude(a, b),
        }
    }
}

/// Plot list entry as it appears in configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotItemSpec {
    pub name: String,
    pub extractor: ExtractorSpec,
    #[serde(default)]
    pub diverging: bool,
}

/// One field that is plotted for every `add` call.
#[derive(Clone, Debug)]
pub struct PlotItem {
    pub name: String,
    pub extractor: FieldExtractor,
    pub diverging: bool,
}

impl PlotItem {
    pub fn new(name: impl Into<String>, extractor: FieldExtractor, diverging: bool) -> Self {
        Self {
            name: name.into(),
            extractor,
            diverging,
        }
    }
}

impl From<PlotItemSpec> for PlotItem {
    fn from(spec: PlotItemSpec) -> Self {
        Self::new(spec.name, spec.extractor.into(), spec.diverging)
    }
}

/// Identifies a rendered plot. Ordering is by field name first, then tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlotToken {
    pub field_name: String,
    pub tag: String,
}

impl PlotToken {
    pub fn new(tag: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for PlotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.field_name, self.tag)
    }
}

/// Colour range shared by the prediction and truth panels.
///
/// Only the truth sets the range so that prediction blow-ups saturate
/// instead of washing out the reference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorLimits {
    pub vmin: f32,
    pub vmax: f32,
}

impl ColorLimits {
    pub fn from_truth(truth: &Array2<f32>, diverging: bool) -> Self {
        let vmax = truth
            .iter()
            .filter(|v| v.is_finite())
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        let vmin = if diverging { -vmax } else { 0.0 };
        Self { vmin, vmax }
    }

    /// Maps `value` into `[0, 1]`; a degenerate range maps to the midpoint.
    pub fn normalize(&self, value: f32) -> f32 {
        let span = self.vmax - self.vmin;
        if !(span > 0.0) || !value.is_finite() {
            return 0.5;
        }
        ((value - self.vmin) / span).clamp(0.0, 1.0)
    }
}

/// Everything a renderer needs to draw one comparison.
#[derive(Clone, Debug)]
pub struct ComparisonPlot {
    pub token: PlotToken,
    pub prediction: Array2<f32>,
    pub truth: Array2<f32>,
    pub diverging: bool,
    pub limits: ColorLimits,
}

impl ComparisonPlot {
    pub fn new(
        token: PlotToken,
        prediction: Array2<f32>,
        truth: Array2<f32>,
        diverging: bool,
    ) -> VisualizationResult<Self> {
        if prediction.dim() != truth.dim() {
            return Err(VisualizationError::ShapeMismatch {
                prediction: prediction.shape().to_vec(),
                target: truth.shape().to_vec(),
            });
        }
        let limits = ColorLimits::from_truth(&truth, diverging);
        Ok(Self {
            token,
            prediction,
            truth,
            diverging,
            limits,
        })
    }
}
