//! The pending-transaction pool.
//!
//! Content-addressed and sequence-aware: account transactions bucket per
//! sender in sequence order and pop only when their sequence is exactly the
//! next one the staging context expects; UTXO transactions take a FIFO
//! lane. The [`ExpireQueue`] drives rebroadcast and eventual eviction of
//! transactions that never make it into a block.

mod expire;
mod pool;

pub use expire::{ExpireQueue, ExpiredItem};
pub use pool::{LockedPool, PoolItem, TransactionPool};

use thiserror::Error;

/// Pool error kinds.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TxPoolError {
    #[error("exist transaction")]
    ExistTransaction,
    #[error("processing transaction")]
    ProcessingTransaction,
    #[error("past seq")]
    PastSeq,
    #[error("too far seq")]
    TooFarSeq,
    #[error("transaction queue overflowed")]
    TxQueueOverflowed,
}
