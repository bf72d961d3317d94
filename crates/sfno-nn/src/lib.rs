// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Spectral neural operator layers and autoregressive steppers.
//!
//! The operators follow the transform → per-mode mixing → inverse transform
//! pattern. Transforms are supplied by the caller through
//! [`transform::ForwardTransform`] / [`transform::InverseTransform`]; a
//! periodic [`transform::RealFft2`] pair ships with the crate. The steppers
//! drive any [`Module`] through a [`Preprocessor`] that owns history buffers
//! and normalisation statistics.

pub mod layers;
pub mod mixed_precision;
pub mod module;
pub mod preprocessor;
pub mod sharding;
pub mod stepper;
pub mod transform;

pub use layers::activation::{ComplexActivationMode, ComplexRelu};
pub use layers::block::SpectralBlock;
pub use layers::dropout::ComplexDropout;
pub use layers::spectral_attention::{
    AttentionOperatorType, SpectralAttention, SpectralAttentionConfig,
};
pub use layers::spectral_conv::{SpectralConv, SpectralConvConfig, SpectralOperatorType};
pub use layers::SpectralOperator;
pub use mixed_precision::{autocast_precision, AutocastGuard};
pub use module::{Module, Parameter, ParameterValue};
pub use preprocessor::{
    HistoryNormalization, HistoryPreprocessor, HistoryPreprocessorConfig, Preprocessor,
};
pub use sharding::{ProcessAxis, SharedAxis, ShardingTable, WeightShardingInfo};
pub use stepper::{MultiStepWrapper, RolloutMode, RolloutReport, SingleStepWrapper, StepperConfig};
pub use transform::{
    ForwardTransform, GridKind, InverseRealFft2, InverseTransform, ModeDistribution,
    ProcessGrid, RealFft2, TransformDescriptor,
};

pub use sfno_tensor::{Complex32, FieldTensor, Precision, PureResult, SpectralTensor, TensorError};
