// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::plot::PlotItemSpec;
use crate::{VisualizationError, VisualizationResult};
use serde::{Deserialize, Serialize};
use sfno_config::ConfigSection;

/// Settings of a [`crate::VisualizationWrapper`].
///
/// `scale` and `bias` undo the data normalisation (`scale * x + bias`) and
/// hold either a single value or one value per channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub prefix: String,
    pub scale: Vec<f32>,
    pub bias: Vec<f32>,
    pub num_workers: usize,
    pub generate_video: bool,
    pub thread_name: String,
    pub plot_list: Vec<PlotItemSpec>,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            prefix: "inference".into(),
            scale: vec![1.0],
            bias: vec![0.0],
            num_workers: 1,
            generate_video: true,
            thread_name: "sfno-viz".into(),
            plot_list: Vec::new(),
        }
    }
}

impl VisualizationConfig {
    pub fn validate(&self) -> VisualizationResult<()> {
        if self.scale.is_empty() {
            return Err(VisualizationError::InvalidConfig("scale must not be empty"));
        }
        if self.bias.is_empty() {
            return Err(VisualizationError::InvalidConfig("bias must not be empty"));
        }
        if self.scale.iter().chain(&self.bias).any(|v| !v.is_finite()) {
            return Err(VisualizationError::InvalidConfig(
                "scale and bias must be finite",
            ));
        }
        Ok(())
    }
}

impl ConfigSection for VisualizationConfig {
    const KEY: &'static str = "visualization";
    type Invalid = VisualizationError;

    fn validate(&self) -> VisualizationResult<()> {
        VisualizationConfig::validate(self)
    }
}
