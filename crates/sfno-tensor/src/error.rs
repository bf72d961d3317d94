// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use core::fmt;
use std::error::Error;

/// Result alias used throughout the sfno crates.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensors, operators and steppers.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorError {
    /// A tensor constructor received a shape with a zero-sized axis.
    InvalidShape { shape: Vec<usize> },
    /// Data provided to a constructor does not match the tensor shape.
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
    /// Channel count is not a multiple of the requested group count.
    IndivisibleChannels {
        label: &'static str,
        channels: usize,
        groups: usize,
    },
    /// Mode counts reported by a transform do not match what the operator expects.
    ModeMismatch {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    /// A configuration string did not name a supported variant.
    UnknownVariant { kind: &'static str, value: String },
    /// Computation received an empty input which would otherwise trigger a panic.
    EmptyInput(&'static str),
    /// Attempted to load a parameter that was missing from the state dict.
    MissingParameter { name: String },
    /// Numeric guard detected a non-finite value.
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    InvalidValue { label: &'static str },
    /// Execution failed inside a collaborator such as a transform provider.
    BackendFailure {
        backend: &'static str,
        message: String,
    },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorError::InvalidShape { shape } => {
                write!(f, "invalid tensor shape {shape:?}; every axis must be non-zero")
            }
            TensorError::DataLength { expected, got } => {
                write!(f, "data length mismatch: expected {expected}, got {got}")
            }
            TensorError::ShapeMismatch { left, right } => {
                write!(
                    f,
                    "shape mismatch: left={left:?}, right={right:?} cannot be combined"
                )
            }
            TensorError::IndivisibleChannels {
                label,
                channels,
                groups,
            } => {
                write!(
                    f,
                    "{label}: {channels} channels cannot be split into {groups} groups"
                )
            }
            TensorError::ModeMismatch {
                label,
                expected,
                got,
            } => {
                write!(f, "{label}: expected {expected} modes, transform reports {got}")
            }
            TensorError::UnknownVariant { kind, value } => {
                write!(f, "unsupported {kind} '{value}'")
            }
            TensorError::EmptyInput(label) => {
                write!(f, "{label} must not be empty for this computation")
            }
            TensorError::MissingParameter { name } => {
                write!(f, "missing parameter '{name}' while loading module state")
            }
            TensorError::NonFiniteValue { label, value } => {
                write!(f, "non-finite value detected for {label}: {value}")
            }
            TensorError::InvalidValue { label } => {
                write!(f, "invalid value: {label}")
            }
            TensorError::BackendFailure { backend, message } => {
                write!(f, "{backend} backend failure: {message}")
            }
        }
    }
}

impl Error for TensorError {}
