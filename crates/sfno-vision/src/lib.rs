// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Side-by-side prediction/ground-truth plots for rollouts.
//!
//! [`VisualizationWrapper::add`] fans one job per configured field out to a
//! pool of named worker threads; [`VisualizationWrapper::finalize`] waits for
//! them, orders the results by `(field_name, tag)` and hands them to a
//! [`FrameSink`] either as one frame sequence or as standalone images.

mod config;
mod error;
mod plot;
mod pool;
mod render;
mod sink;
mod wrapper;

pub use config::VisualizationConfig;
pub use error::{VisualizationError, VisualizationResult};
pub use plot::{
    ColorLimits, ComparisonPlot, ExtractorSpec, FieldExtractor, PlotItem, PlotItemSpec, PlotToken,
};
pub use pool::RenderPool;
pub use render::{Colormap, ColormapRenderer, ComparisonRenderer, Frame};
pub use sink::{FrameSink, MemorySink, PngDirectorySink, SinkRecord};
pub use wrapper::{RenderedPlot, VisualizationWrapper};
