// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::{LocalExtent, TransformDescriptor};
use serde::{Deserialize, Serialize};
use sfno_tensor::{PureResult, TensorError};

/// Position of the local process inside the 2D (lat × lon) process grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessGrid {
    pub h_rank: usize,
    pub h_size: usize,
    pub w_rank: usize,
    pub w_size: usize,
}

impl ProcessGrid {
    pub fn new(h_rank: usize, h_size: usize, w_rank: usize, w_size: usize) -> PureResult<Self> {
        if h_size == 0 || w_size == 0 {
            return Err(TensorError::InvalidValue {
                label: "process_grid_size",
            });
        }
        if h_rank >= h_size || w_rank >= w_size {
            return Err(TensorError::InvalidValue {
                label: "process_grid_rank",
            });
        }
        Ok(Self {
            h_rank,
            h_size,
            w_rank,
            w_size,
        })
    }

    pub fn single() -> Self {
        Self {
            h_rank: 0,
            h_size: 1,
            w_rank: 0,
            w_size: 1,
        }
    }
}

/// Splits `size` into `chunks` contiguous pieces.
///
/// Every rank receives `ceil(size / chunks)` entries except the last one,
/// which takes the remainder. When that would leave the last rank empty the
/// chunk shrinks to `floor(size / chunks)`.
pub fn split_shapes(size: usize, chunks: usize) -> Vec<usize> {
    if chunks <= 1 {
        return vec![size];
    }
    let mut chunk = size.div_ceil(chunks);
    let mut last = size.saturating_sub(chunk * (chunks - 1));
    if last == 0 {
        chunk = size / chunks;
        last = size - chunk * (chunks - 1);
    }
    let mut shapes = vec![chunk; chunks - 1];
    shapes.push(last);
    shapes
}

/// How a distributed transform splits modes and grid points across ranks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeDistribution {
    pub grid: ProcessGrid,
    pub l_shapes: Vec<usize>,
    pub m_shapes: Vec<usize>,
    pub lat_shapes: Vec<usize>,
    pub lon_shapes: Vec<usize>,
}

impl ModeDistribution {
    /// Balanced split: latitudinal modes and latitudes over `H`, longitudinal
    /// modes and longitudes over `W`.
    pub fn balanced(grid: ProcessGrid, descriptor: &TransformDescriptor) -> Self {
        Self {
            grid,
            l_shapes: split_shapes(descriptor.lmax, grid.h_size),
            m_shapes: split_shapes(descriptor.mmax, grid.w_size),
            lat_shapes: split_shapes(descriptor.nlat, grid.h_size),
            lon_shapes: split_shapes(descriptor.nlon, grid.w_size),
        }
    }

    pub fn local_extent(&self) -> PureResult<LocalExtent> {
        let pick = |shapes: &[usize], rank: usize, label: &'static str| {
            shapes
                .get(rank)
                .copied()
                .ok_or(TensorError::InvalidValue { label })
        };
        Ok(LocalExtent {
            modes_lat: pick(&self.l_shapes, self.grid.h_rank, "l_shapes_rank")?,
            modes_lon: pick(&self.m_shapes, self.grid.w_rank, "m_shapes_rank")?,
            nlat: pick(&self.lat_shapes, self.grid.h_rank, "lat_shapes_rank")?,
            nlon: pick(&self.lon_shapes, self.grid.w_rank, "lon_shapes_rank")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::GridKind;

    #[test]
    fn split_shapes_follows_balanced_rule() {
        assert_eq!(split_shapes(10, 4), vec![3, 3, 3, 1]);
        assert_eq!(split_shapes(9, 4), vec![2, 2, 2, 3]);
        assert_eq!(split_shapes(12, 3), vec![4, 4, 4]);
        assert_eq!(split_shapes(7, 1), vec![7]);
        assert_eq!(split_shapes(2, 4), vec![0, 0, 0, 2]);
        for (size, chunks) in [(10, 4), (9, 4), (721, 8), (1440, 6)] {
            assert_eq!(split_shapes(size, chunks).iter().sum::<usize>(), size);
        }
    }

    #[test]
    fn local_extent_uses_rank_positions() {
        let descriptor = TransformDescriptor {
            nlat: 10,
            nlon: 16,
            lmax: 10,
            mmax: 9,
            grid: GridKind::Equiangular,
        };
        let grid = ProcessGrid::new(3, 4, 1, 2).unwrap();
        let dist = ModeDistribution::balanced(grid, &descriptor);
        let extent = dist.local_extent().unwrap();
        assert_eq!(extent.modes_lat, 1);
        assert_eq!(extent.modes_lon, 4);
        assert_eq!(extent.nlat, 1);
        assert_eq!(extent.nlon, 8);
        assert!(ProcessGrid::new(4, 4, 0, 1).is_err());
    }
}
