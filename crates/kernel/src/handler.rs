//! Event-handler fan-out.

use crate::error::KernelError;
use crate::kernel::Kernel;
use fornax_ledger::{Block, Context, Transaction};
use fornax_types::Signature;

/// A pooled transaction with its signatures, as rebroadcast on expiry.
#[derive(Clone, Debug)]
pub struct TransactionMessage {
    pub transaction: Transaction,
    pub signatures: Vec<Signature>,
}

/// A sink for kernel lifecycle events.
///
/// Handlers are registered in order and called in order; every method has a
/// no-op default so implementors pick the hooks they care about. A failing
/// `on_process_block` or `on_push_transaction` aborts the operation.
pub trait EventHandler: Send + Sync {
    /// Called before a validated block is committed.
    fn on_process_block(
        &self,
        _kernel: &Kernel,
        _block: &Block,
        _ctx: &Context,
    ) -> Result<(), KernelError> {
        Ok(())
    }

    /// Called after a block has been committed to the store.
    fn after_process_block(&self, _kernel: &Kernel, _block: &Block) {}

    /// Called before a transaction enters the pool.
    fn on_push_transaction(
        &self,
        _kernel: &Kernel,
        _tx: &Transaction,
        _sigs: &[Signature],
    ) -> Result<(), KernelError> {
        Ok(())
    }

    /// Called after a transaction entered the pool.
    fn after_push_transaction(&self, _kernel: &Kernel, _tx: &Transaction, _sigs: &[Signature]) {}

    /// Called when an expiring transaction should be rebroadcast.
    fn do_transaction_broadcast(&self, _kernel: &Kernel, _msg: &TransactionMessage) {}

    /// Free-form diagnostics fan-out.
    fn debug_log(&self, _kernel: &Kernel, _message: &str) {}
}
