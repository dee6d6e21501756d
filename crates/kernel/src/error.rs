//! Kernel error kinds.

use fornax_consensus::ConsensusError;
use fornax_ledger::LedgerError;
use fornax_reward::RewardError;
use fornax_store::StoreError;
use fornax_txpool::TxPoolError;
use fornax_types::CryptoError;
use thiserror::Error;

/// Errors raised by the block pipeline.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("kernel closed")]
    KernelClosed,
    #[error("invalid chain coordinate")]
    InvalidChainCoord,
    #[error("invalid height")]
    InvalidHeight,
    #[error("invalid version")]
    InvalidVersion,
    #[error("invalid prev hash")]
    InvalidPrevHash,
    #[error("invalid signature count")]
    InvalidSignatureCount,
    #[error("invalid top signature")]
    InvalidTopSignature,
    #[error("fork detected")]
    ForkDetected,
    #[error("invalid level root hash")]
    InvalidLevelRootHash,
    #[error("invalid context hash")]
    InvalidContextHash,
    #[error("dirty context")]
    DirtyContext,
    #[error("invalid genesis hash")]
    InvalidGenesisHash,
    #[error("no policy registered for the chain coordinate")]
    UnknownChainPolicy,
    #[error("missing consensus save data")]
    NotExistConsensusSaveData,
    #[error("missing reward save data")]
    NotExistRewardSaveData,
    #[error(transparent)]
    TxPool(#[from] TxPoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Reward(#[from] RewardError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
