//! The block execution pipeline.
//!
//! The kernel glues the ranking engine, the transactor, the pool and the
//! store into the proof-of-formulation pipeline:
//!
//! - [`Kernel::validate`]: check an incoming block and execute it into a
//!   fresh [`fornax_ledger::Context`]
//! - [`Kernel::process`]: commit a finalized block bundle atomically
//! - [`Kernel::generate_block`]: assemble a candidate block from the pool
//! - [`Kernel::add_transaction`]: admit a transaction into the pool
//!
//! The kernel owns exactly one live context during block execution and
//! serializes the store-mutating path behind a coarse mutex.

mod config;
mod error;
mod handler;
mod kernel;

pub use config::KernelConfig;
pub use error::KernelError;
pub use handler::{EventHandler, TransactionMessage};
pub use kernel::{genesis_hash, Kernel, KernelParams};
