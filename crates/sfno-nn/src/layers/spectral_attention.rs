// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::activation::{ComplexActivationMode, ComplexRelu};
use super::dropout::ComplexDropout;
use super::init::complex_normal;
use super::SpectralOperator;
use crate::mixed_precision::AutocastGuard;
use crate::module::{Module, Parameter};
use crate::transform::{
    ensure_matching_modes, local_extent, needs_resampled_residual, ForwardTransform,
    InverseTransform,
};
use ndarray::{Array4, ArrayView4, ArrayViewD, Axis, Ix2, Ix3};
use serde::{Deserialize, Serialize};
use sfno_config::{determinism, ConfigSection};
use sfno_tensor::{Complex32, FieldTensor, PureResult, SpectralTensor, TensorError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

/// Weight sharing across spectral modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttentionOperatorType {
    /// One channel-mixing matrix shared by every mode.
    #[default]
    #[serde(rename = "diagonal")]
    Diagonal,
    /// A separate matrix per latitudinal mode.
    #[serde(rename = "l-dependant", alias = "l-dependent")]
    ModeDependent,
}

impl AttentionOperatorType {
    pub fn as_str(self) -> &'static str {
        match self {
            AttentionOperatorType::Diagonal => "diagonal",
            AttentionOperatorType::ModeDependent => "l-dependant",
        }
    }
}

impl fmt::Display for AttentionOperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttentionOperatorType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diagonal" => Ok(AttentionOperatorType::Diagonal),
            "l-dependant" | "l-dependent" => Ok(AttentionOperatorType::ModeDependent),
            other => Err(TensorError::UnknownVariant {
                kind: "spectral_attention_operator_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Construction parameters of [`SpectralAttention`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralAttentionConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub operator_type: AttentionOperatorType,
    pub hidden_size_factor: f32,
    pub complex_activation: ComplexActivationMode,
    pub bias: bool,
    pub spectral_layers: usize,
    pub drop_rate: f32,
    pub gain: f32,
    pub seed: Option<u64>,
}

impl Default for SpectralAttentionConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            operator_type: AttentionOperatorType::Diagonal,
            hidden_size_factor: 2.0,
            complex_activation: ComplexActivationMode::Real,
            bias: false,
            spectral_layers: 1,
            drop_rate: 0.0,
            gain: 1.0,
            seed: None,
        }
    }
}

impl SpectralAttentionConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            ..Self::default()
        }
    }

    /// Hidden width of the complex MLP, `floor(hidden_size_factor * in_channels)`.
    pub fn hidden_size(&self) -> usize {
        (self.hidden_size_factor * self.in_channels as f32).floor() as usize
    }

    /// Checks channel counts, depth, gain and dropout; returns the hidden width.
    pub fn validate(&self) -> PureResult<usize> {
        if self.in_channels == 0 || self.out_channels == 0 {
            return Err(TensorError::InvalidValue {
                label: "spectral_attention_channels",
            });
        }
        if self.spectral_layers == 0 {
            return Err(TensorError::InvalidValue {
                label: "spectral_layers",
            });
        }
        let hidden_size = self.hidden_size();
        if !self.hidden_size_factor.is_finite() || hidden_size == 0 {
            return Err(TensorError::InvalidValue {
                label: "hidden_size_factor",
            });
        }
        if !(self.gain > 0.0) || !self.gain.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "spectral_attention_gain",
            });
        }
        if !(0.0..1.0).contains(&self.drop_rate) {
            return Err(TensorError::InvalidValue {
                label: "dropout_probability",
            });
        }
        Ok(hidden_size)
    }
}

impl ConfigSection for SpectralAttentionConfig {
    const KEY: &'static str = "spectral_attention";
    type Invalid = TensorError;

    fn validate(&self) -> PureResult<()> {
        SpectralAttentionConfig::validate(self).map(|_| ())
    }
}

type ChannelMix =
    fn(ArrayView4<'_, Complex32>, ArrayViewD<'_, Complex32>) -> PureResult<Array4<Complex32>>;

fn mix_mismatch(x: &ArrayView4<'_, Complex32>, w: &[usize]) -> TensorError {
    TensorError::ShapeMismatch {
        left: x.shape().to_vec(),
        right: w.to_vec(),
    }
}

/// `bixy,io->boxy`
fn mix_shared(
    x: ArrayView4<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array4<Complex32>> {
    let shape = w.shape().to_vec();
    let w = w
        .into_dimensionality::<Ix2>()
        .map_err(|_| mix_mismatch(&x, &shape))?;
    let (batch, inputs, lx, ly) = x.dim();
    let (wi, outputs) = w.dim();
    if wi != inputs {
        return Err(mix_mismatch(&x, &shape));
    }
    Ok(Array4::from_shape_fn((batch, outputs, lx, ly), |(b, o, l, m)| {
        (0..inputs).fold(ZERO, |acc, i| acc + x[[b, i, l, m]] * w[[i, o]])
    }))
}

/// `bixy,xio->boxy`
fn mix_mode_dependent(
    x: ArrayView4<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array4<Complex32>> {
    let shape = w.shape().to_vec();
    let w = w
        .into_dimensionality::<Ix3>()
        .map_err(|_| mix_mismatch(&x, &shape))?;
    let (batch, inputs, lx, ly) = x.dim();
    let (wx, wi, outputs) = w.dim();
    if (wx, wi) != (lx, inputs) {
        return Err(mix_mismatch(&x, &shape));
    }
    Ok(Array4::from_shape_fn((batch, outputs, lx, ly), |(b, o, l, m)| {
        (0..inputs).fold(ZERO, |acc, i| acc + x[[b, i, l, m]] * w[[l, i, o]])
    }))
}

/// Spectral attention: a complex MLP applied per mode between the forward
/// and inverse transform.
pub struct SpectralAttention {
    name: String,
    forward_transform: Arc<dyn ForwardTransform>,
    inverse_transform: Arc<dyn InverseTransform>,
    in_channels: usize,
    out_channels: usize,
    hidden_size: usize,
    operator_type: AttentionOperatorType,
    scale_residual: bool,
    mix: ChannelMix,
    weights: Vec<Parameter>,
    biases: Option<Vec<Parameter>>,
    wout: Parameter,
    activations: Vec<ComplexRelu>,
    dropout: Option<ComplexDropout>,
}

impl fmt::Debug for SpectralAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAttention")
            .field("name", &self.name)
            .field("in_channels", &self.in_channels)
            .field("out_channels", &self.out_channels)
            .field("hidden_size", &self.hidden_size)
            .field("operator_type", &self.operator_type)
            .field("spectral_layers", &self.weights.len())
            .field("scale_residual", &self.scale_residual)
            .field("dropout", &self.dropout)
            .finish()
    }
}

impl SpectralAttention {
    pub fn new(
        name: impl Into<String>,
        forward_transform: Arc<dyn ForwardTransform>,
        inverse_transform: Arc<dyn InverseTransform>,
        config: &SpectralAttentionConfig,
    ) -> PureResult<Self> {
        let name = name.into();
        let SpectralAttentionConfig {
            in_channels,
            out_channels,
            operator_type,
            complex_activation,
            bias,
            spectral_layers,
            drop_rate,
            gain,
            seed,
            ..
        } = *config;
        let hidden_size = config.validate()?;
        let dropout = ComplexDropout::with_seed(drop_rate, seed)?;
        let dropout = (drop_rate > 0.0).then_some(dropout);

        ensure_matching_modes(forward_transform.as_ref(), inverse_transform.as_ref())?;
        let modes_lat = local_extent(inverse_transform.as_ref())?.modes_lat;
        let scale_residual =
            needs_resampled_residual(forward_transform.as_ref(), inverse_transform.as_ref());

        let mode_prefix: Vec<usize> = match operator_type {
            AttentionOperatorType::Diagonal => Vec::new(),
            AttentionOperatorType::ModeDependent => vec![modes_lat],
        };
        let sample = |label: String, dims: [usize; 2], scale: f32| {
            let mut shape = mode_prefix.clone();
            shape.extend(dims);
            let mut rng = determinism::rng_for_parameter(seed, &label);
            Parameter::complex(label, complex_normal(&shape, scale, &mut rng))
        };

        let mut weights = Vec::with_capacity(spectral_layers);
        weights.push(sample(
            format!("{name}::w0"),
            [in_channels, hidden_size],
            (2.0 / in_channels as f32).sqrt(),
        ));
        for layer in 1..spectral_layers {
            weights.push(sample(
                format!("{name}::w{layer}"),
                [hidden_size, hidden_size],
                (2.0 / hidden_size as f32).sqrt(),
            ));
        }
        let out_scale = (gain / in_channels as f32).sqrt();
        let wout = sample(
            format!("{name}::wout"),
            [hidden_size, out_channels],
            out_scale,
        );
        // The mode-dependent variant draws its biases at the scale of the
        // last hidden weight rather than the projection's.
        let bias_scale = match operator_type {
            AttentionOperatorType::Diagonal => out_scale,
            AttentionOperatorType::ModeDependent if spectral_layers > 1 => {
                (2.0 / hidden_size as f32).sqrt()
            }
            AttentionOperatorType::ModeDependent => (2.0 / in_channels as f32).sqrt(),
        };
        let biases = bias.then(|| {
            (0..spectral_layers)
                .map(|layer| {
                    let label = format!("{name}::b{layer}");
                    let mut rng = determinism::rng_for_parameter(seed, &label);
                    Parameter::complex(label, complex_normal(&[hidden_size], bias_scale, &mut rng))
                })
                .collect::<Vec<_>>()
        });
        let activations = (0..spectral_layers)
            .map(|layer| {
                ComplexRelu::new(
                    format!("{name}::act{layer}"),
                    complex_activation,
                    hidden_size,
                    out_scale,
                )
            })
            .collect();
        let mix: ChannelMix = match operator_type {
            AttentionOperatorType::Diagonal => mix_shared,
            AttentionOperatorType::ModeDependent => mix_mode_dependent,
        };
        debug!(
            layer = %name,
            %operator_type,
            in_channels,
            out_channels,
            hidden_size,
            spectral_layers,
            activation = %complex_activation,
            drop_rate,
            scale_residual,
            "built spectral attention"
        );
        Ok(Self {
            name,
            forward_transform,
            inverse_transform,
            in_channels,
            out_channels,
            hidden_size,
            operator_type,
            scale_residual,
            mix,
            weights,
            biases,
            wout,
            activations,
            dropout,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn spectral_layers(&self) -> usize {
        self.weights.len()
    }

    pub fn operator_type(&self) -> AttentionOperatorType {
        self.operator_type
    }

    pub fn scale_residual(&self) -> bool {
        self.scale_residual
    }

    pub fn weights(&self) -> &[Parameter] {
        &self.weights
    }

    pub fn output_weight(&self) -> &Parameter {
        &self.wout
    }

    pub fn biases(&self) -> Option<&[Parameter]> {
        self.biases.as_deref()
    }

    pub fn activations(&self) -> &[ComplexRelu] {
        &self.activations
    }

    fn forward_mlp(&self, input: Array4<Complex32>) -> PureResult<Array4<Complex32>> {
        let mut hidden = input;
        for (layer, weight) in self.weights.iter().enumerate() {
            hidden = (self.mix)(hidden.view(), weight.as_complex()?.view())?;
            if let Some(biases) = &self.biases {
                let bias = biases[layer].as_complex()?;
                for (&shift, mut plane) in bias.iter().zip(hidden.axis_iter_mut(Axis(1))) {
                    plane.mapv_inplace(|z| z + shift);
                }
            }
            hidden = self.activations[layer].apply(hidden)?;
            if let Some(dropout) = &self.dropout {
                hidden = dropout.apply(hidden);
            }
        }
        (self.mix)(hidden.view(), self.wout.as_complex()?.view())
    }
}

impl SpectralOperator for SpectralAttention {
    fn forward_with_residual(
        &self,
        input: &FieldTensor,
    ) -> PureResult<(FieldTensor, FieldTensor)> {
        if input.channels() != self.in_channels {
            return Err(TensorError::ShapeMismatch {
                left: input.shape().to_vec(),
                right: vec![input.batch(), self.in_channels, input.nlat(), input.nlon()],
            });
        }
        let precision = input.precision();
        let x = input.to_full();

        let (spectral, residual) = {
            let _full = AutocastGuard::disable();
            let spectral = self.forward_transform.forward(&x)?;
            let residual = if self.scale_residual {
                self.inverse_transform
                    .inverse(&spectral)?
                    .with_requires_grad(input.requires_grad())
                    .to_precision(precision)
            } else {
                input.clone()
            };
            (spectral, residual)
        };

        let mixed = SpectralTensor::new(self.forward_mlp(spectral.into_data())?)?;

        let out = {
            let _full = AutocastGuard::disable();
            self.inverse_transform.inverse(&mixed)?
        };
        Ok((
            out.with_requires_grad(true).to_precision(precision),
            residual,
        ))
    }
}

impl Module for SpectralAttention {
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.forward_with_residual(input).map(|(out, _)| out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for weight in &self.weights {
            visitor(weight)?;
        }
        if let Some(biases) = &self.biases {
            for bias in biases {
                visitor(bias)?;
            }
        }
        for activation in &self.activations {
            if let Some(bias) = activation.bias() {
                visitor(bias)?;
            }
        }
        visitor(&self.wout)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for weight in &mut self.weights {
            visitor(weight)?;
        }
        if let Some(biases) = &mut self.biases {
            for bias in biases {
                visitor(bias)?;
            }
        }
        for activation in &mut self.activations {
            if let Some(bias) = activation.bias_mut() {
                visitor(bias)?;
            }
        }
        visitor(&mut self.wout)
    }

    fn set_training(&self, training: bool) {
        if let Some(dropout) = &self.dropout {
            dropout.set_training(training);
        }
    }
}
