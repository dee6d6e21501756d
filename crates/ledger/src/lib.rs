//! Hybrid account/UTXO ledger for the fornax chain.
//!
//! This crate owns everything between raw bytes and the execution pipeline:
//!
//! - [`Account`]: the polymorphic account set (key, multi-sig, formulation)
//! - [`UTXO`]: unspent outputs with (height, tx-index, output-index) ids
//! - [`LockedBalance`]: amounts released at a future height
//! - [`ContextData`]: the mutation journal produced by executing a block
//! - [`Context`]: nestable snapshot/revert staging over a [`Loader`]
//! - [`Transactor`]: the transaction registry with decode/validate/execute
//!
//! The [`Loader`] trait is the read seam: the store implements it for
//! persisted state and [`Context`] layers staged mutations on top of any
//! loader, so transaction code never knows whether it reads disk or stage.

mod account;
mod chain;
mod context;
mod data;
mod error;
mod event;
mod loader;
mod locked;
mod transaction;
mod transactor;
mod utxo;

pub use account::{
    Account, AccountType, FormulationAccount, FormulationType, KeyAccount, MultiSigAccount,
};
pub use chain::{observer_sign_hash, Block, Body, ChainData};
pub use context::Context;
pub use data::ContextData;
pub use error::LedgerError;
pub use event::{marshal_event_id, EventRecord};
pub use loader::Loader;
pub use locked::LockedBalance;
pub use transaction::{
    CreateFormulation, RevokeFormulation, Transaction, Transfer, TxKind, TAG_CREATE_FORMULATION,
    TAG_REVOKE_FORMULATION, TAG_TRANSFER,
};
pub use transactor::{Transactor, TransactorConfig};
pub use utxo::{TxIn, TxOut, UTXO};
