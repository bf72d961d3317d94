// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{ForwardTransform, GridKind, InverseTransform, TransformDescriptor};
use crate::mixed_precision::autocast_precision;
use ndarray::{s, Array2, Array4, ArrayView2};
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use sfno_config::determinism;
use sfno_tensor::{Complex32, FieldTensor, PureResult, SpectralTensor, TensorError};
use std::fmt;
use std::sync::Arc;

const ZERO: Complex32 = Complex32::new(0.0, 0.0);

fn periodic_descriptor(
    nlat: usize,
    nlon: usize,
    lmax: Option<usize>,
    mmax: Option<usize>,
) -> PureResult<TransformDescriptor> {
    if nlat == 0 || nlon == 0 {
        return Err(TensorError::InvalidShape {
            shape: vec![nlat, nlon],
        });
    }
    let lmax = lmax.unwrap_or(nlat).min(nlat);
    let mmax = mmax.unwrap_or(nlon / 2 + 1).min(nlon / 2 + 1);
    if lmax == 0 || mmax == 0 {
        return Err(TensorError::InvalidValue {
            label: "fft_mode_count",
        });
    }
    Ok(TransformDescriptor {
        nlat,
        nlon,
        lmax,
        mmax,
        grid: GridKind::Periodic,
    })
}

/// Number of kept positive and negative latitudinal frequencies.
fn lat_mode_split(lmax: usize) -> (usize, usize) {
    (lmax.div_ceil(2), lmax / 2)
}

/// Maps every `(batch, channel)` plane, in parallel unless determinism asks
/// for a fixed execution order.
fn map_planes<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if determinism::lock_reduction_order() {
        (0..count).map(f).collect()
    } else {
        (0..count).into_par_iter().map(f).collect()
    }
}

/// Rounds spectral output to the ambient autocast precision.
fn round_to_autocast(data: &mut Array4<Complex32>) {
    if let Some(precision) = autocast_precision() {
        data.mapv_inplace(|z| Complex32::new(precision.round(z.re), precision.round(z.im)));
    }
}

/// Orthonormal 2D real FFT with mode truncation.
///
/// The longitudinal axis keeps the first `mmax` non-negative frequencies, the
/// latitudinal axis keeps `ceil(lmax / 2)` leading and `floor(lmax / 2)`
/// trailing (negative) frequencies.
pub struct RealFft2 {
    descriptor: TransformDescriptor,
    lat_fft: Arc<dyn Fft<f32>>,
    lon_fft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for RealFft2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealFft2")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl RealFft2 {
    pub fn new(
        nlat: usize,
        nlon: usize,
        lmax: Option<usize>,
        mmax: Option<usize>,
    ) -> PureResult<Self> {
        let descriptor = periodic_descriptor(nlat, nlon, lmax, mmax)?;
        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            descriptor,
            lat_fft: planner.plan_fft_forward(nlat),
            lon_fft: planner.plan_fft_forward(nlon),
        })
    }

    fn forward_plane(&self, plane: ArrayView2<'_, f32>) -> Array2<Complex32> {
        let TransformDescriptor {
            nlat,
            nlon,
            lmax,
            mmax,
            ..
        } = self.descriptor;
        let lon_norm = (nlon as f32).sqrt().recip();
        let lat_norm = (nlat as f32).sqrt().recip();

        let mut rows = Array2::from_elem((nlat, mmax), ZERO);
        let mut buffer = vec![ZERO; nlon];
        for (lat, row) in plane.outer_iter().enumerate() {
            for (slot, &value) in buffer.iter_mut().zip(row.iter()) {
                *slot = Complex32::new(value, 0.0);
            }
            self.lon_fft.process(&mut buffer);
            for m in 0..mmax {
                rows[[lat, m]] = buffer[m] * lon_norm;
            }
        }

        let (high, low) = lat_mode_split(lmax);
        let mut out = Array2::from_elem((lmax, mmax), ZERO);
        let mut column = vec![ZERO; nlat];
        for m in 0..mmax {
            for (lat, slot) in column.iter_mut().enumerate() {
                *slot = rows[[lat, m]];
            }
            self.lat_fft.process(&mut column);
            for l in 0..high {
                out[[l, m]] = column[l] * lat_norm;
            }
            for j in 0..low {
                out[[high + j, m]] = column[nlat - low + j] * lat_norm;
            }
        }
        out
    }
}

impl ForwardTransform for RealFft2 {
    fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    fn forward(&self, field: &FieldTensor) -> PureResult<SpectralTensor> {
        let [batch, channels, nlat, nlon] = field.shape();
        if (nlat, nlon) != (self.descriptor.nlat, self.descriptor.nlon) {
            return Err(TensorError::ShapeMismatch {
                left: field.shape().to_vec(),
                right: vec![batch, channels, self.descriptor.nlat, self.descriptor.nlon],
            });
        }
        let data = field.data();
        let planes = map_planes(batch * channels, |idx| {
            self.forward_plane(data.slice(s![idx / channels, idx % channels, .., ..]))
        });

        let mut out = Array4::from_elem(
            (batch, channels, self.descriptor.lmax, self.descriptor.mmax),
            ZERO,
        );
        for (idx, plane) in planes.into_iter().enumerate() {
            out.slice_mut(s![idx / channels, idx % channels, .., ..])
                .assign(&plane);
        }
        round_to_autocast(&mut out);
        SpectralTensor::new(out)
    }
}

/// Inverse of [`RealFft2`]: zero-pads the truncated modes and runs an
/// orthonormal complex-to-real 2D FFT.
pub struct InverseRealFft2 {
    descriptor: TransformDescriptor,
    lat_ifft: Arc<dyn Fft<f32>>,
    lon_ifft: Arc<dyn Fft<f32>>,
}

impl fmt::Debug for InverseRealFft2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InverseRealFft2")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl InverseRealFft2 {
    pub fn new(
        nlat: usize,
        nlon: usize,
        lmax: Option<usize>,
        mmax: Option<usize>,
    ) -> PureResult<Self> {
        let descriptor = periodic_descriptor(nlat, nlon, lmax, mmax)?;
        let mut planner = FftPlanner::<f32>::new();
        Ok(Self {
            descriptor,
            lat_ifft: planner.plan_fft_inverse(nlat),
            lon_ifft: planner.plan_fft_inverse(nlon),
        })
    }

    fn inverse_plane(&self, plane: ArrayView2<'_, Complex32>, used_m: usize) -> Array2<f32> {
        let TransformDescriptor {
            nlat, nlon, lmax, ..
        } = self.descriptor;
        let lon_norm = (nlon as f32).sqrt().recip();
        let lat_norm = (nlat as f32).sqrt().recip();
        let (high, low) = lat_mode_split(lmax);

        let mut rows = Array2::from_elem((nlat, used_m), ZERO);
        let mut column = vec![ZERO; nlat];
        for m in 0..used_m {
            column.fill(ZERO);
            for l in 0..high {
                column[l] = plane[[l, m]];
            }
            for j in 0..low {
                column[nlat - low + j] = plane[[high + j, m]];
            }
            self.lat_ifft.process(&mut column);
            for (lat, value) in column.iter().enumerate() {
                rows[[lat, m]] = value * lat_norm;
            }
        }

        // Rebuild the Hermitian spectrum; the real part of the complex inverse
        // then matches a c2r transform (imaginary DC/Nyquist parts drop out).
        let mut out = Array2::zeros((nlat, nlon));
        let mut buffer = vec![ZERO; nlon];
        for lat in 0..nlat {
            buffer.fill(ZERO);
            for m in 0..used_m {
                let value = rows[[lat, m]];
                buffer[m] = value;
                if m > 0 && nlon - m != m {
                    buffer[nlon - m] = value.conj();
                }
            }
            self.lon_ifft.process(&mut buffer);
            for (lon, value) in buffer.iter().enumerate() {
                out[[lat, lon]] = value.re * lon_norm;
            }
        }
        out
    }
}

impl InverseTransform for InverseRealFft2 {
    fn descriptor(&self) -> &TransformDescriptor {
        &self.descriptor
    }

    fn inverse(&self, spectral: &SpectralTensor) -> PureResult<FieldTensor> {
        let [batch, channels, modes_lat, modes_lon] = spectral.shape();
        if modes_lat != self.descriptor.lmax {
            return Err(TensorError::ModeMismatch {
                label: "inverse_fft_lmax",
                expected: self.descriptor.lmax,
                got: modes_lat,
            });
        }
        let used_m = modes_lon.min(self.descriptor.mmax);
        let data = spectral.data();
        let planes = map_planes(batch * channels, |idx| {
            self.inverse_plane(data.slice(s![idx / channels, idx % channels, .., ..]), used_m)
        });

        let mut out = Array4::zeros((batch, channels, self.descriptor.nlat, self.descriptor.nlon));
        for (idx, plane) in planes.into_iter().enumerate() {
            out.slice_mut(s![idx / channels, idx % channels, .., ..])
                .assign(&plane);
        }
        if let Some(precision) = autocast_precision() {
            out.mapv_inplace(|value| precision.round(value));
        }
        FieldTensor::new(out)
    }
}
