// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Parameter;
use ndarray::{Array4, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use sfno_tensor::{Complex32, PureResult, TensorError};
use std::fmt;
use std::str::FromStr;

/// Nonlinearity family applied to complex spectral activations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexActivationMode {
    /// Leaky ReLU on the real part, imaginary part untouched.
    #[default]
    Real,
    /// Leaky ReLU on the real and imaginary parts independently.
    Cartesian,
    /// Shifts the modulus by a learned bias and keeps the phase.
    Modulus,
    Identity,
}

impl ComplexActivationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplexActivationMode::Real => "real",
            ComplexActivationMode::Cartesian => "cartesian",
            ComplexActivationMode::Modulus => "modulus",
            ComplexActivationMode::Identity => "identity",
        }
    }
}

impl fmt::Display for ComplexActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplexActivationMode {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "real" => Ok(ComplexActivationMode::Real),
            "cartesian" => Ok(ComplexActivationMode::Cartesian),
            "modulus" => Ok(ComplexActivationMode::Modulus),
            "identity" => Ok(ComplexActivationMode::Identity),
            other => Err(TensorError::UnknownVariant {
                kind: "complex_activation",
                value: other.to_string(),
            }),
        }
    }
}

fn leaky(value: f32, slope: f32) -> f32 {
    if value >= 0.0 {
        value
    } else {
        slope * value
    }
}

/// Complex ReLU variants acting on `[batch, channel, mode_lat, mode_lon]`.
#[derive(Clone, Debug)]
pub struct ComplexRelu {
    mode: ComplexActivationMode,
    negative_slope: f32,
    bias: Option<Parameter>,
}

impl ComplexRelu {
    /// Builds the activation. Only the modulus mode owns a bias, one entry per
    /// channel initialised to `scale`.
    pub fn new(
        name: impl Into<String>,
        mode: ComplexActivationMode,
        channels: usize,
        scale: f32,
    ) -> Self {
        let bias = (mode == ComplexActivationMode::Modulus).then(|| {
            Parameter::real(
                format!("{}::bias", name.into()),
                ArrayD::from_elem(IxDyn(&[channels, 1, 1]), scale),
            )
        });
        Self {
            mode,
            negative_slope: 0.0,
            bias,
        }
    }

    pub fn with_negative_slope(mut self, negative_slope: f32) -> Self {
        self.negative_slope = negative_slope;
        self
    }

    pub fn mode(&self) -> ComplexActivationMode {
        self.mode
    }

    pub fn negative_slope(&self) -> f32 {
        self.negative_slope
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Parameter> {
        self.bias.as_mut()
    }

    pub fn apply(&self, input: Array4<Complex32>) -> PureResult<Array4<Complex32>> {
        let slope = self.negative_slope;
        match self.mode {
            ComplexActivationMode::Identity => Ok(input),
            ComplexActivationMode::Real => {
                Ok(input.mapv_into(|z| Complex32::new(leaky(z.re, slope), z.im)))
            }
            ComplexActivationMode::Cartesian => {
                Ok(input.mapv_into(|z| Complex32::new(leaky(z.re, slope), leaky(z.im, slope))))
            }
            ComplexActivationMode::Modulus => self.apply_modulus(input),
        }
    }

    fn apply_modulus(&self, mut input: Array4<Complex32>) -> PureResult<Array4<Complex32>> {
        let bias = self
            .bias
            .as_ref()
            .ok_or(TensorError::MissingParameter {
                name: "modulus_bias".into(),
            })?
            .as_real()?;
        let channels = input.dim().1;
        if bias.len() != channels {
            return Err(TensorError::ShapeMismatch {
                left: input.shape().to_vec(),
                right: bias.shape().to_vec(),
            });
        }
        for (shift, mut plane) in bias.iter().zip(input.axis_iter_mut(Axis(1))) {
            plane.mapv_inplace(|z| {
                let modulus = z.norm();
                let shifted = modulus + shift;
                if shifted > 0.0 && modulus > 0.0 {
                    z * (shifted / modulus)
                } else {
                    Complex32::new(0.0, 0.0)
                }
            });
        }
        Ok(input)
    }
}
