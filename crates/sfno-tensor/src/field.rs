// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{Precision, PureResult, TensorError};
use ndarray::{concatenate, s, Array4, ArrayView4, Axis, Zip};
use rand::distributions::Distribution;
use rand_distr::StandardNormal;
use sfno_config::determinism;

/// Grid-space field `[batch, channel, lat, lon]`.
///
/// Besides the values the tensor records the precision it logically lives in
/// and whether it still participates in gradient tracking. Element-wise
/// combinations keep the gradient flag alive if either side carries it, while
/// [`FieldTensor::detach`] cuts it.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldTensor {
    data: Array4<f32>,
    precision: Precision,
    requires_grad: bool,
}

impl FieldTensor {
    /// Wraps an existing array as a full-precision field.
    pub fn new(data: Array4<f32>) -> PureResult<Self> {
        if data.is_empty() {
            return Err(TensorError::InvalidShape {
                shape: data.shape().to_vec(),
            });
        }
        Ok(Self {
            data,
            precision: Precision::Full,
            requires_grad: false,
        })
    }

    /// Create a field filled with zeros.
    pub fn zeros(shape: [usize; 4]) -> PureResult<Self> {
        Self::new(Array4::zeros(shape))
    }

    /// Create a field from raw row-major data.
    pub fn from_vec(shape: [usize; 4], data: Vec<f32>) -> PureResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        let array = Array4::from_shape_vec(shape, data).map_err(|_| TensorError::InvalidShape {
            shape: shape.to_vec(),
        })?;
        Self::new(array)
    }

    /// Construct a field by applying a generator to each `(b, c, lat, lon)` index.
    pub fn from_fn<F>(shape: [usize; 4], mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        Self::new(Array4::from_shape_fn(shape, |(b, c, h, w)| f(b, c, h, w)))
    }

    /// Construct a field by sampling a normal distribution.
    ///
    /// When `seed` is provided the RNG becomes deterministic, otherwise the
    /// process-wide determinism settings decide.
    pub fn random_normal(
        shape: [usize; 4],
        mean: f32,
        std: f32,
        seed: Option<u64>,
    ) -> PureResult<Self> {
        if !(std > 0.0) || !std.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let mut rng = determinism::rng_from_optional(seed, "sfno-tensor/field/normal");
        let data = Array4::from_shape_simple_fn(shape, || {
            let sample: f64 = StandardNormal.sample(&mut rng);
            mean + std * sample as f32
        });
        Self::new(data)
    }

    /// Returns `[batch, channel, lat, lon]`.
    pub fn shape(&self) -> [usize; 4] {
        let dims = self.data.dim();
        [dims.0, dims.1, dims.2, dims.3]
    }

    pub fn batch(&self) -> usize {
        self.data.dim().0
    }

    pub fn channels(&self) -> usize {
        self.data.dim().1
    }

    pub fn nlat(&self) -> usize {
        self.data.dim().2
    }

    pub fn nlon(&self) -> usize {
        self.data.dim().3
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> &mut Array4<f32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array4<f32> {
        self.data
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Marks the field as a gradient-tracked leaf (or clears the mark).
    pub fn with_requires_grad(mut self, requires_grad: bool) -> Self {
        self.requires_grad = requires_grad;
        self
    }

    /// Returns a copy that no longer participates in gradient tracking.
    pub fn detach(&self) -> Self {
        Self {
            data: self.data.clone(),
            precision: self.precision,
            requires_grad: false,
        }
    }

    /// Casts into `precision`, rounding values when the target is reduced.
    pub fn to_precision(&self, precision: Precision) -> Self {
        let data = if precision.is_reduced() && precision != self.precision {
            self.data.mapv(|value| precision.round(value))
        } else {
            self.data.clone()
        };
        Self {
            data,
            precision,
            requires_grad: self.requires_grad,
        }
    }

    /// Re-tags the values as full precision without touching them.
    pub fn to_full(&self) -> Self {
        self.to_precision(Precision::Full)
    }

    /// Builds a field that inherits this tensor's precision and gradient flag.
    pub fn like(&self, data: Array4<f32>) -> PureResult<Self> {
        let mut out = Self::new(data)?;
        out.precision = self.precision;
        out.requires_grad = self.requires_grad;
        Ok(out)
    }

    fn guard_shape(&self, other: &FieldTensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape().to_vec(),
                right: other.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn combine<F>(&self, other: &FieldTensor, op: F) -> PureResult<Self>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.guard_shape(other)?;
        let mut data = self.data.clone();
        Zip::from(&mut data)
            .and(&other.data)
            .for_each(|lhs, &rhs| *lhs = op(*lhs, rhs));
        Ok(Self {
            data,
            precision: self.precision,
            requires_grad: self.requires_grad || other.requires_grad,
        })
    }

    pub fn add(&self, other: &FieldTensor) -> PureResult<Self> {
        self.combine(other, |a, b| a + b)
    }

    pub fn sub(&self, other: &FieldTensor) -> PureResult<Self> {
        self.combine(other, |a, b| a - b)
    }

    pub fn hadamard(&self, other: &FieldTensor) -> PureResult<Self> {
        self.combine(other, |a, b| a * b)
    }

    pub fn scale(&self, value: f32) -> Self {
        Self {
            data: self.data.mapv(|v| v * value),
            precision: self.precision,
            requires_grad: self.requires_grad,
        }
    }

    /// Adds a per-channel offset broadcast over batch and grid.
    pub fn add_channel_bias(&self, bias: &[f32]) -> PureResult<Self> {
        if bias.len() != self.channels() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape().to_vec(),
                right: vec![1, bias.len(), 1, 1],
            });
        }
        let mut data = self.data.clone();
        for (c, mut plane) in data.axis_iter_mut(Axis(1)).enumerate() {
            plane += bias[c];
        }
        self.like(data)
    }

    /// Copies channels `[start, end)` into a new field.
    pub fn slice_channels(&self, start: usize, end: usize) -> PureResult<Self> {
        if start >= end || end > self.channels() {
            return Err(TensorError::InvalidValue {
                label: "channel_slice_bounds",
            });
        }
        self.like(self.data.slice(s![.., start..end, .., ..]).to_owned())
    }

    /// Concatenates fields along the channel axis.
    pub fn concat_channels(fields: &[FieldTensor]) -> PureResult<Self> {
        let Some(first) = fields.first() else {
            return Err(TensorError::EmptyInput("concat_channels"));
        };
        let [batch, _, nlat, nlon] = first.shape();
        for field in fields.iter().skip(1) {
            let [b, _, h, w] = field.shape();
            if (b, h, w) != (batch, nlat, nlon) {
                return Err(TensorError::ShapeMismatch {
                    left: first.shape().to_vec(),
                    right: field.shape().to_vec(),
                });
            }
        }
        let views: Vec<_> = fields.iter().map(|field| field.data.view()).collect();
        let data = concatenate(Axis(1), &views).map_err(|err| TensorError::BackendFailure {
            backend: "ndarray",
            message: err.to_string(),
        })?;
        let mut out = first.like(data)?;
        out.requires_grad = fields.iter().any(|field| field.requires_grad);
        Ok(out)
    }

    /// Largest absolute element-wise difference.
    pub fn max_abs_diff(&self, other: &FieldTensor) -> PureResult<f32> {
        self.guard_shape(other)?;
        Ok(Zip::from(&self.data)
            .and(&other.data)
            .fold(0.0f32, |acc, &a, &b| acc.max((a - b).abs())))
    }

    /// Squared L2 norm accumulated in double precision.
    pub fn squared_l2_norm(&self) -> f64 {
        self.data.iter().map(|&v| (v as f64) * (v as f64)).sum()
    }

    /// Fails when any element is NaN or infinite.
    pub fn ensure_finite(&self, label: &'static str) -> PureResult<()> {
        match self.data.iter().find(|value| !value.is_finite()) {
            Some(&value) => Err(TensorError::NonFiniteValue { label, value }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_axes_and_wrong_lengths() {
        assert!(FieldTensor::zeros([1, 0, 2, 2]).is_err());
        let err = FieldTensor::from_vec([1, 1, 2, 2], vec![0.0; 3]).unwrap_err();
        assert_eq!(err, TensorError::DataLength { expected: 4, got: 3 });
    }

    #[test]
    fn precision_cast_rounds_and_keeps_grad_flag() {
        let field = FieldTensor::from_vec([1, 1, 1, 2], vec![1.0 + 1.0 / 512.0, 3.0])
            .unwrap()
            .with_requires_grad(true);
        let bf = field.to_precision(Precision::BFloat16);
        assert_eq!(bf.precision(), Precision::BFloat16);
        assert!(bf.requires_grad());
        assert_eq!(bf.data()[[0, 0, 0, 0]], 1.0);
        let back = bf.to_full();
        assert_eq!(back.precision(), Precision::Full);
        assert_eq!(back.data(), bf.data());
    }

    #[test]
    fn detach_clears_gradient_tracking_only() {
        let field = FieldTensor::from_fn([1, 2, 2, 2], |_, c, h, w| (c + h + w) as f32)
            .unwrap()
            .with_requires_grad(true);
        let detached = field.detach();
        assert!(!detached.requires_grad());
        assert_eq!(detached.data(), field.data());
    }

    #[test]
    fn concat_and_slice_channels_round_trip() {
        let a = FieldTensor::from_fn([2, 1, 2, 3], |b, _, h, w| (b * 10 + h * 3 + w) as f32).unwrap();
        let b = a.scale(-1.0).with_requires_grad(true);
        let joined = FieldTensor::concat_channels(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(joined.shape(), [2, 2, 2, 3]);
        assert!(joined.requires_grad());
        assert_eq!(joined.slice_channels(0, 1).unwrap().data(), a.data());
        assert_eq!(joined.slice_channels(1, 2).unwrap().data(), b.data());
        assert!(joined.slice_channels(1, 3).is_err());
    }

    #[test]
    fn channel_bias_broadcasts_over_grid() {
        let field = FieldTensor::zeros([2, 2, 2, 2]).unwrap();
        let shifted = field.add_channel_bias(&[1.0, -2.0]).unwrap();
        assert!(shifted
            .data()
            .slice(s![.., 0, .., ..])
            .iter()
            .all(|&v| v == 1.0));
        assert!(shifted
            .data()
            .slice(s![.., 1, .., ..])
            .iter()
            .all(|&v| v == -2.0));
        assert!(field.add_channel_bias(&[1.0]).is_err());
    }
}
