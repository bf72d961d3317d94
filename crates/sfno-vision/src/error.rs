// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use sfno_tensor::TensorError;
use std::path::PathBuf;

pub type VisualizationResult<T> = Result<T, VisualizationError>;

/// Errors raised while queueing, rendering or emitting comparison plots.
#[derive(Debug, thiserror::Error)]
pub enum VisualizationError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("prediction shape {prediction:?} does not match target shape {target:?}")]
    ShapeMismatch {
        prediction: Vec<usize>,
        target: Vec<usize>,
    },
    #[error("{label} has {got} entries but the field has {channels} channels")]
    ChannelBroadcast {
        label: &'static str,
        got: usize,
        channels: usize,
    },
    #[error("plot '{field}' reads channel {channel} of a {channels}-channel field")]
    ChannelOutOfRange {
        field: String,
        channel: usize,
        channels: usize,
    },
    #[error("extractor for '{field}' produced an empty map {shape:?}")]
    EmptyExtraction { field: String, shape: Vec<usize> },
    #[error("frame buffer holds {got} bytes, expected {expected}")]
    FrameSize { expected: usize, got: usize },
    #[error("invalid visualization config: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn render worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("render pool stopped before all jobs completed")]
    PoolClosed,
    #[error("render job for {field}/{tag} panicked")]
    Panicked { field: String, tag: String },
    #[error("render job for {field}/{tag} failed: {message}")]
    Render {
        field: String,
        tag: String,
        message: String,
    },
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode {path:?}: {message}")]
    Encode { path: PathBuf, message: String },
}
