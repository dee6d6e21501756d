//! The read seam between execution and state.

use crate::account::Account;
use crate::error::LedgerError;
use crate::utxo::UTXO;
use fornax_types::{Address, Coordinate, Hash256};

/// Read access to chain state.
///
/// Implemented by the persisted store and by [`crate::Context`], which
/// layers staged mutations over another loader. Transaction validation and
/// execution code is written against this trait only.
pub trait Loader: Send + Sync {
    /// The chain this state belongs to.
    fn chain_coord(&self) -> Coordinate;

    /// The height the next block will have.
    fn target_height(&self) -> u32;

    /// Hash of the last committed block.
    fn last_hash(&self) -> Hash256;

    /// The committed sequence of the address (0 if never used).
    fn seq(&self, address: Address) -> u64;

    fn account(&self, address: Address) -> Result<Account, LedgerError>;

    fn is_exist_account(&self, address: Address) -> Result<bool, LedgerError>;

    fn address_by_name(&self, name: &str) -> Result<Address, LedgerError>;

    fn is_exist_account_name(&self, name: &str) -> Result<bool, LedgerError>;

    /// Raw per-account data; `None` when absent.
    fn account_data(&self, address: Address, key: &[u8]) -> Option<Vec<u8>>;

    /// All data keys of the account with the given prefix (prefix stripped
    /// of the address, kept on the key).
    fn account_data_keys(
        &self,
        address: Address,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>, LedgerError>;

    fn utxo(&self, id: u64) -> Result<UTXO, LedgerError>;

    fn is_exist_utxo(&self, id: u64) -> Result<bool, LedgerError>;
}
