//! Kernel configuration.

use fornax_types::Coordinate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Static parameters of one node's kernel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KernelConfig {
    pub chain_coord: Coordinate,
    /// Consecutive blocks one formulator produces before rotation.
    pub max_blocks_per_formulator: u32,
    /// Hard cap on transactions per generated block.
    pub max_transactions_per_block: usize,
    /// How long block generation keeps popping the pool.
    pub generation_window: Duration,
}

impl KernelConfig {
    pub fn new(chain_coord: Coordinate) -> Self {
        Self {
            chain_coord,
            max_blocks_per_formulator: 10,
            max_transactions_per_block: 5_000,
            generation_window: Duration::from_millis(200),
        }
    }
}
