// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Transform provider contract used by the spectral operators.
//!
//! Spherical harmonic transforms live outside this crate and plug in through
//! [`ForwardTransform`] / [`InverseTransform`]. The periodic [`RealFft2`]
//! pair is provided for planar domains and tests.

mod distributed;
mod fft;

pub use distributed::{split_shapes, ModeDistribution, ProcessGrid};
pub use fft::{InverseRealFft2, RealFft2};

use serde::{Deserialize, Serialize};
use sfno_tensor::{FieldTensor, PureResult, SpectralTensor, TensorError};
use std::fmt;

/// Sampling of the physical grid a transform operates on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GridKind {
    #[default]
    Equiangular,
    LegendreGauss,
    Lobatto,
    /// Doubly periodic planar grid.
    Periodic,
}

/// Static attributes of a transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformDescriptor {
    pub nlat: usize,
    pub nlon: usize,
    pub lmax: usize,
    pub mmax: usize,
    pub grid: GridKind,
}

impl TransformDescriptor {
    /// Two transforms sample the same grid when size and sampling agree.
    pub fn same_grid(&self, other: &TransformDescriptor) -> bool {
        self.nlat == other.nlat && self.nlon == other.nlon && self.grid == other.grid
    }
}

/// Maps a grid-space field to spectral coefficients.
pub trait ForwardTransform: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &TransformDescriptor;

    /// Mode/grid split across the process grid, `None` for a local transform.
    fn distribution(&self) -> Option<&ModeDistribution> {
        None
    }

    fn forward(&self, field: &FieldTensor) -> PureResult<SpectralTensor>;
}

/// Maps spectral coefficients back onto the grid.
pub trait InverseTransform: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &TransformDescriptor;

    fn distribution(&self) -> Option<&ModeDistribution> {
        None
    }

    fn inverse(&self, spectral: &SpectralTensor) -> PureResult<FieldTensor>;
}

/// Mode and grid extents owned by the local process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalExtent {
    pub modes_lat: usize,
    pub modes_lon: usize,
    pub nlat: usize,
    pub nlon: usize,
}

/// Resolves the local shard of the inverse transform's mode grid.
pub fn local_extent(inverse: &dyn InverseTransform) -> PureResult<LocalExtent> {
    let descriptor = inverse.descriptor();
    match inverse.distribution() {
        None => Ok(LocalExtent {
            modes_lat: descriptor.lmax,
            modes_lon: descriptor.mmax,
            nlat: descriptor.nlat,
            nlon: descriptor.nlon,
        }),
        Some(dist) => dist.local_extent(),
    }
}

/// Checks that both transforms agree on the global mode counts.
pub fn ensure_matching_modes(
    forward: &dyn ForwardTransform,
    inverse: &dyn InverseTransform,
) -> PureResult<()> {
    let fwd = forward.descriptor();
    let inv = inverse.descriptor();
    if fwd.lmax != inv.lmax {
        return Err(TensorError::ModeMismatch {
            label: "lmax",
            expected: inv.lmax,
            got: fwd.lmax,
        });
    }
    if fwd.mmax != inv.mmax {
        return Err(TensorError::ModeMismatch {
            label: "mmax",
            expected: inv.mmax,
            got: fwd.mmax,
        });
    }
    Ok(())
}

/// The residual path has to be resampled when the transforms disagree on the grid.
pub fn needs_resampled_residual(
    forward: &dyn ForwardTransform,
    inverse: &dyn InverseTransform,
) -> bool {
    !forward.descriptor().same_grid(inverse.descriptor())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_comparison_ignores_mode_counts() {
        let a = TransformDescriptor {
            nlat: 8,
            nlon: 16,
            lmax: 8,
            mmax: 9,
            grid: GridKind::Periodic,
        };
        let b = TransformDescriptor { lmax: 4, mmax: 3, ..a };
        assert!(a.same_grid(&b));
        let c = TransformDescriptor {
            grid: GridKind::LegendreGauss,
            ..a
        };
        assert!(!a.same_grid(&c));
    }

    #[test]
    fn mode_mismatch_is_reported() {
        let forward = RealFft2::new(8, 8, Some(4), None).unwrap();
        let inverse = InverseRealFft2::new(8, 8, Some(6), None).unwrap();
        let err = ensure_matching_modes(&forward, &inverse).unwrap_err();
        assert!(matches!(err, TensorError::ModeMismatch { label: "lmax", .. }));
        assert!(!needs_resampled_residual(&forward, &inverse));
        let extent = local_extent(&inverse).unwrap();
        assert_eq!((extent.modes_lat, extent.modes_lon), (6, 5));
    }
}
