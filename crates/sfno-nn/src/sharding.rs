// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Distribution metadata attached to parameters.
//!
//! An external parallelism layer reads the table to decide which gradients
//! need reductions and which axes of a weight live on a single shard.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Process-grid axis along which spectral modes are split.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAxis {
    /// Latitudinal (row) process group.
    H,
    /// Longitudinal (column) process group.
    W,
}

/// Communicator over which a parameter is replicated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedAxis {
    Model,
    Matmul,
    Spatial(ProcessAxis),
}

/// Per-parameter sharding labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightShardingInfo {
    pub is_shared: Vec<SharedAxis>,
    /// One entry per tensor axis; `None` marks an unsharded axis.
    pub sharded_dims: Vec<Option<ProcessAxis>>,
}

impl WeightShardingInfo {
    /// Replicated everywhere, no sharded axis.
    pub fn replicated(rank: usize, shared: Vec<SharedAxis>) -> Self {
        Self {
            is_shared: shared,
            sharded_dims: vec![None; rank],
        }
    }

    /// Dhconv weights vary only with the latitudinal mode, which is split
    /// across `H`. They are therefore replicated along `W`.
    pub fn dhconv(rank: usize) -> Self {
        let mut info = Self::replicated(
            rank,
            vec![SharedAxis::Matmul, SharedAxis::Spatial(ProcessAxis::W)],
        );
        if let Some(last) = info.sharded_dims.last_mut() {
            *last = Some(ProcessAxis::H);
        }
        info
    }

    /// Diagonal weights carry both mode axes, split across `H` and `W`.
    pub fn diagonal(rank: usize) -> Self {
        let mut info = Self::replicated(rank, vec![SharedAxis::Matmul]);
        if rank >= 2 {
            info.sharded_dims[rank - 2] = Some(ProcessAxis::H);
            info.sharded_dims[rank - 1] = Some(ProcessAxis::W);
        }
        info
    }

    /// Per-channel bias, replicated over the model communicator.
    pub fn bias(rank: usize) -> Self {
        Self::replicated(rank, vec![SharedAxis::Model])
    }

    pub fn is_sharded(&self) -> bool {
        self.sharded_dims.iter().any(Option::is_some)
    }
}

/// Side table mapping parameter names to their sharding labels.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingTable {
    entries: BTreeMap<String, WeightShardingInfo>,
}

impl ShardingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, info: WeightShardingInfo) {
        self.entries.insert(name.into(), info);
    }

    pub fn get(&self, name: &str) -> Option<&WeightShardingInfo> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightShardingInfo)> {
        self.entries.iter().map(|(name, info)| (name.as_str(), info))
    }

    /// Merges another table, prefixing its names with `prefix::`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: ShardingTable) {
        for (name, info) in other.entries {
            self.entries.insert(format!("{prefix}::{name}"), info);
        }
    }
}
