// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::init::mode_scaled_complex_normal;
use super::SpectralOperator;
use crate::mixed_precision::AutocastGuard;
use crate::module::{Module, Parameter};
use crate::sharding::{ShardingTable, WeightShardingInfo};
use crate::transform::{
    ensure_matching_modes, local_extent, needs_resampled_residual, ForwardTransform,
    InverseTransform, LocalExtent,
};
use ndarray::{
    Array4, Array5, ArrayD, ArrayView, ArrayView5, ArrayViewD, Dimension, Ix3, Ix4, Ix5, IxDyn,
};
use serde::{Deserialize, Serialize};
use sfno_config::{determinism, ConfigSection};
use sfno_tensor::{Complex32, FieldTensor, PureResult, SpectralTensor, TensorError};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

/// How the mode weight is laid out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectralOperatorType {
    /// One weight per latitudinal and longitudinal mode.
    Diagonal,
    /// Weight depends on the latitudinal mode only.
    #[default]
    Dhconv,
}

impl SpectralOperatorType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpectralOperatorType::Diagonal => "diagonal",
            SpectralOperatorType::Dhconv => "dhconv",
        }
    }
}

impl fmt::Display for SpectralOperatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpectralOperatorType {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diagonal" => Ok(SpectralOperatorType::Diagonal),
            "dhconv" => Ok(SpectralOperatorType::Dhconv),
            other => Err(TensorError::UnknownVariant {
                kind: "spectral_operator_type",
                value: other.to_string(),
            }),
        }
    }
}

/// Construction parameters of [`SpectralConv`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_groups: usize,
    pub operator_type: SpectralOperatorType,
    pub separable: bool,
    pub bias: bool,
    pub gain: f32,
    pub seed: Option<u64>,
}

impl Default for SpectralConvConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_channels: 1,
            num_groups: 1,
            operator_type: SpectralOperatorType::Dhconv,
            separable: false,
            bias: false,
            gain: 1.0,
            seed: None,
        }
    }
}

impl SpectralConvConfig {
    pub fn new(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            ..Self::default()
        }
    }

    /// Checks the channel layout and gain without touching any transform.
    pub fn validate(&self) -> PureResult<()> {
        let Self {
            in_channels,
            out_channels,
            num_groups,
            separable,
            gain,
            ..
        } = *self;
        if in_channels == 0 || out_channels == 0 || num_groups == 0 {
            return Err(TensorError::InvalidValue {
                label: "spectral_conv_channels",
            });
        }
        if in_channels % num_groups != 0 {
            return Err(TensorError::IndivisibleChannels {
                label: "in_channels",
                channels: in_channels,
                groups: num_groups,
            });
        }
        if out_channels % num_groups != 0 {
            return Err(TensorError::IndivisibleChannels {
                label: "out_channels",
                channels: out_channels,
                groups: num_groups,
            });
        }
        if separable && in_channels != out_channels {
            return Err(TensorError::InvalidValue {
                label: "separable_requires_equal_channels",
            });
        }
        if !(gain > 0.0) || !gain.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "spectral_conv_gain",
            });
        }
        Ok(())
    }
}

impl ConfigSection for SpectralConvConfig {
    const KEY: &'static str = "spectral_conv";
    type Invalid = TensorError;

    fn validate(&self) -> PureResult<()> {
        SpectralConvConfig::validate(self)
    }
}

/// Contracts grouped spectral input `[b, g, i, x, y]` with the mode weight.
type Contraction =
    fn(ArrayView5<'_, Complex32>, ArrayViewD<'_, Complex32>) -> PureResult<Array5<Complex32>>;

fn contraction_for(operator_type: SpectralOperatorType, separable: bool) -> Contraction {
    match (operator_type, separable) {
        (SpectralOperatorType::Diagonal, false) => contract_diagonal,
        (SpectralOperatorType::Dhconv, false) => contract_dhconv,
        (SpectralOperatorType::Diagonal, true) => contract_diagonal_separable,
        (SpectralOperatorType::Dhconv, true) => contract_dhconv_separable,
    }
}

fn weight_mismatch(x: &ArrayView5<'_, Complex32>, w: &ArrayViewD<'_, Complex32>) -> TensorError {
    TensorError::ShapeMismatch {
        left: x.shape().to_vec(),
        right: w.shape().to_vec(),
    }
}

fn fixed_rank<'a, D: Dimension>(
    x: &ArrayView5<'_, Complex32>,
    w: ArrayViewD<'a, Complex32>,
) -> PureResult<ArrayView<'a, Complex32, D>> {
    let mismatch = weight_mismatch(x, &w);
    w.into_dimensionality::<D>().map_err(|_| mismatch)
}

/// `bgixy,gioxy->bgoxy`
fn contract_diagonal(
    x: ArrayView5<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array5<Complex32>> {
    let (batch, groups, inputs, lx, ly) = x.dim();
    let w = fixed_rank::<Ix5>(&x, w)?;
    let (wg, wi, outputs, wx, wy) = w.dim();
    if (wg, wi, wx, wy) != (groups, inputs, lx, ly) {
        return Err(weight_mismatch(&x, &w.into_dyn()));
    }
    Ok(Array5::from_shape_fn(
        (batch, groups, outputs, lx, ly),
        |(b, g, o, l, m)| {
            (0..inputs).fold(ZERO, |acc, i| acc + x[[b, g, i, l, m]] * w[[g, i, o, l, m]])
        },
    ))
}

/// `bgixy,giox->bgoxy`
fn contract_dhconv(
    x: ArrayView5<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array5<Complex32>> {
    let (batch, groups, inputs, lx, ly) = x.dim();
    let w = fixed_rank::<Ix4>(&x, w)?;
    let (wg, wi, outputs, wx) = w.dim();
    if (wg, wi, wx) != (groups, inputs, lx) {
        return Err(weight_mismatch(&x, &w.into_dyn()));
    }
    Ok(Array5::from_shape_fn(
        (batch, groups, outputs, lx, ly),
        |(b, g, o, l, m)| {
            (0..inputs).fold(ZERO, |acc, i| acc + x[[b, g, i, l, m]] * w[[g, i, o, l]])
        },
    ))
}

/// `bgixy,gixy->bgixy`
fn contract_diagonal_separable(
    x: ArrayView5<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array5<Complex32>> {
    let w = fixed_rank::<Ix4>(&x, w)?;
    let (_, groups, inputs, lx, ly) = x.dim();
    if w.dim() != (groups, inputs, lx, ly) {
        return Err(weight_mismatch(&x, &w.into_dyn()));
    }
    Ok(Array5::from_shape_fn(x.dim(), |(b, g, i, l, m)| {
        x[[b, g, i, l, m]] * w[[g, i, l, m]]
    }))
}

/// `bgixy,gix->bgixy`
fn contract_dhconv_separable(
    x: ArrayView5<'_, Complex32>,
    w: ArrayViewD<'_, Complex32>,
) -> PureResult<Array5<Complex32>> {
    let w = fixed_rank::<Ix3>(&x, w)?;
    let (_, groups, inputs, lx, _) = x.dim();
    if w.dim() != (groups, inputs, lx) {
        return Err(weight_mismatch(&x, &w.into_dyn()));
    }
    Ok(Array5::from_shape_fn(x.dim(), |(b, g, i, l, m)| {
        x[[b, g, i, l, m]] * w[[g, i, l]]
    }))
}

/// Spectral convolution: forward transform, per-mode linear contraction,
/// inverse transform.
pub struct SpectralConv {
    name: String,
    forward_transform: Arc<dyn ForwardTransform>,
    inverse_transform: Arc<dyn InverseTransform>,
    in_channels: usize,
    out_channels: usize,
    num_groups: usize,
    operator_type: SpectralOperatorType,
    separable: bool,
    local: LocalExtent,
    scale_residual: bool,
    contract: Contraction,
    weight: Parameter,
    bias: Option<Parameter>,
}

impl fmt::Debug for SpectralConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralConv")
            .field("name", &self.name)
            .field("in_channels", &self.in_channels)
            .field("out_channels", &self.out_channels)
            .field("num_groups", &self.num_groups)
            .field("operator_type", &self.operator_type)
            .field("separable", &self.separable)
            .field("local", &self.local)
            .field("scale_residual", &self.scale_residual)
            .field("weight", &self.weight)
            .field("bias", &self.bias)
            .finish()
    }
}

impl SpectralConv {
    pub fn new(
        name: impl Into<String>,
        forward_transform: Arc<dyn ForwardTransform>,
        inverse_transform: Arc<dyn InverseTransform>,
        config: &SpectralConvConfig,
    ) -> PureResult<Self> {
        config.validate()?;
        let name = name.into();
        let SpectralConvConfig {
            in_channels,
            out_channels,
            num_groups,
            operator_type,
            separable,
            bias,
            gain,
            seed,
        } = *config;
        ensure_matching_modes(forward_transform.as_ref(), inverse_transform.as_ref())?;
        let local = local_extent(inverse_transform.as_ref())?;
        let scale_residual =
            needs_resampled_residual(forward_transform.as_ref(), inverse_transform.as_ref());

        let mut shape = vec![num_groups, in_channels / num_groups];
        if !separable {
            shape.push(out_channels / num_groups);
        }
        let lat_axis = match operator_type {
            SpectralOperatorType::Diagonal => {
                shape.extend([local.modes_lat, local.modes_lon]);
                shape.len() - 2
            }
            SpectralOperatorType::Dhconv => {
                shape.push(local.modes_lat);
                shape.len() - 1
            }
        };
        let scale = (gain / (in_channels / num_groups) as f32).sqrt();
        let mut rng = determinism::rng_for_parameter(seed, &format!("{name}::weight"));
        let weight = Parameter::complex(
            format!("{name}::weight"),
            mode_scaled_complex_normal(&shape, lat_axis, scale, &mut rng),
        );
        let bias = bias.then(|| {
            Parameter::real(
                format!("{name}::bias"),
                ArrayD::zeros(IxDyn(&[1, out_channels, 1, 1])),
            )
        });
        debug!(
            layer = %name,
            %operator_type,
            separable,
            in_channels,
            out_channels,
            num_groups,
            modes_lat = local.modes_lat,
            modes_lon = local.modes_lon,
            scale_residual,
            "built spectral convolution"
        );
        Ok(Self {
            name,
            forward_transform,
            inverse_transform,
            in_channels,
            out_channels,
            num_groups,
            operator_type,
            separable,
            local,
            scale_residual,
            contract: contraction_for(operator_type, separable),
            weight,
            bias,
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

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn operator_type(&self) -> SpectralOperatorType {
        self.operator_type
    }

    pub fn separable(&self) -> bool {
        self.separable
    }

    /// Local shard of the mode grid the weight covers.
    pub fn local_extent(&self) -> LocalExtent {
        self.local
    }

    pub fn scale_residual(&self) -> bool {
        self.scale_residual
    }

    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    pub fn weight_mut(&mut self) -> &mut Parameter {
        &mut self.weight
    }

    pub fn bias(&self) -> Option<&Parameter> {
        self.bias.as_ref()
    }

    pub fn bias_mut(&mut self) -> Option<&mut Parameter> {
        self.bias.as_mut()
    }

    fn mix(&self, spectral: SpectralTensor) -> PureResult<SpectralTensor> {
        let [batch, channels, lx, ly] = spectral.shape();
        if channels != self.in_channels {
            return Err(TensorError::ShapeMismatch {
                left: spectral.shape().to_vec(),
                right: vec![batch, self.in_channels, lx, ly],
            });
        }
        let per_group = channels / self.num_groups;
        let data = spectral.data();
        let grouped = Array5::from_shape_fn(
            (batch, self.num_groups, per_group, lx, ly),
            |(b, g, i, l, m)| data[[b, g * per_group + i, l, m]],
        );
        let mixed = (self.contract)(grouped.view(), self.weight.as_complex()?.view())?;
        let out_per_group = mixed.dim().2;
        let merged = Array4::from_shape_fn(
            (batch, self.num_groups * out_per_group, lx, ly),
            |(b, c, l, m)| mixed[[b, c / out_per_group, c % out_per_group, l, m]],
        );
        SpectralTensor::new(merged)
    }
}

impl SpectralOperator for SpectralConv {
    fn forward_with_residual(
        &self,
        input: &FieldTensor,
    ) -> PureResult<(FieldTensor, FieldTensor)> {
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

        let mixed = self.mix(spectral)?;

        let mut out = {
            let _full = AutocastGuard::disable();
            self.inverse_transform.inverse(&mixed)?
        };
        if let Some(bias) = &self.bias {
            let values: Vec<f32> = bias.as_real()?.iter().copied().collect();
            out = out.add_channel_bias(&values)?;
        }
        Ok((
            out.with_requires_grad(true).to_precision(precision),
            residual,
        ))
    }
}

impl Module for SpectralConv {
    fn forward(&self, input: &FieldTensor) -> PureResult<FieldTensor> {
        self.forward_with_residual(input).map(|(out, _)| out)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        if let Some(bias) = &self.bias {
            visitor(bias)?;
        }
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        if let Some(bias) = &mut self.bias {
            visitor(bias)?;
        }
        Ok(())
    }

    fn sharding(&self) -> ShardingTable {
        let mut table = ShardingTable::new();
        let rank = self.weight.shape().len();
        let info = match self.operator_type {
            SpectralOperatorType::Dhconv => WeightShardingInfo::dhconv(rank),
            SpectralOperatorType::Diagonal => WeightShardingInfo::diagonal(rank),
        };
        table.insert(self.weight.name(), info);
        if let Some(bias) = &self.bias {
            table.insert(bias.name(), WeightShardingInfo::bias(4));
        }
        table
    }
}
