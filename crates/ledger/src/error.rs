//! Ledger error kinds.

use fornax_types::CryptoError;
use thiserror::Error;

/// Errors raised by ledger reads, context mutation and transaction code.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid sequence")]
    InvalidSequence,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("exist address")]
    ExistAddress,
    #[error("exist account name")]
    ExistAccountName,
    #[error("not exist account")]
    NotExistAccount,
    #[error("deleted account")]
    DeletedAccount,
    #[error("exist utxo")]
    ExistUtxo,
    #[error("not exist utxo")]
    NotExistUtxo,
    #[error("invalid chain coordinate")]
    InvalidChainCoord,
    #[error("dirty context")]
    DirtyContext,
    #[error("invalid account type")]
    InvalidAccountType,
    #[error("invalid account name")]
    InvalidAccountName,
    #[error("invalid account signer")]
    InvalidAccountSigner,
    #[error("invalid signer count")]
    InvalidSignerCount,
    #[error("unknown transaction type {0}")]
    UnknownTransactionType(u8),
    #[error("store closed")]
    StoreClosed,
    #[error("storage backend: {0}")]
    Backend(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
