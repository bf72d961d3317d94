// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::{PureResult, TensorError};
use ndarray::{Array4, Zip};
use num_complex::Complex32;

/// Spectral coefficients `[batch, channel, mode_lat, mode_lon]`.
///
/// Spectral tensors are always computed in full precision; the precision of
/// the surrounding grid tensors is restored by the operator that owns them.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralTensor {
    data: Array4<Complex32>,
}

impl SpectralTensor {
    pub fn new(data: Array4<Complex32>) -> PureResult<Self> {
        if data.is_empty() {
            return Err(TensorError::InvalidShape {
                shape: data.shape().to_vec(),
            });
        }
        Ok(Self { data })
    }

    pub fn zeros(shape: [usize; 4]) -> PureResult<Self> {
        Self::new(Array4::from_elem(shape, Complex32::new(0.0, 0.0)))
    }

    /// Returns `[batch, channel, mode_lat, mode_lon]`.
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

    pub fn modes_lat(&self) -> usize {
        self.data.dim().2
    }

    pub fn modes_lon(&self) -> usize {
        self.data.dim().3
    }

    pub fn data(&self) -> &Array4<Complex32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array4<Complex32> {
        &mut self.data
    }

    pub fn into_data(self) -> Array4<Complex32> {
        self.data
    }

    /// Applies `f` to every coefficient.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(Complex32) -> Complex32,
    {
        Self {
            data: self.data.mapv(f),
        }
    }

    /// Largest coefficient-wise modulus of the difference.
    pub fn max_abs_diff(&self, other: &SpectralTensor) -> PureResult<f32> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape().to_vec(),
                right: other.shape().to_vec(),
            });
        }
        Ok(Zip::from(&self.data)
            .and(&other.data)
            .fold(0.0f32, |acc, &a, &b| acc.max((a - b).norm())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_preserves_shape() {
        let spec = SpectralTensor::new(Array4::from_shape_fn((1, 2, 3, 2), |(_, c, l, m)| {
            Complex32::new(c as f32, (l + m) as f32)
        }))
        .unwrap();
        let conj = spec.map(|z| z.conj());
        assert_eq!(conj.shape(), [1, 2, 3, 2]);
        assert_eq!(conj.data()[[0, 1, 2, 1]], Complex32::new(1.0, -3.0));
        assert!(spec.max_abs_diff(&conj).unwrap() > 0.0);
        assert!(SpectralTensor::zeros([1, 1, 0, 1]).is_err());
    }
}
