//! Staged mutation over a loader, with nestable snapshot/revert.

use crate::account::Account;
use crate::data::ContextData;
use crate::error::LedgerError;
use crate::event::EventRecord;
use crate::loader::Loader;
use crate::locked::LockedBalance;
use crate::utxo::{TxOut, UTXO};
use fornax_types::{Address, Coordinate, Hash256};
use std::collections::BTreeSet;
use std::sync::Arc;

/// In-memory staging over a [`Loader`].
///
/// A context is a stack of [`ContextData`] frames. Reads walk the stack
/// top-down and fall through to the loader; writes land in the top frame.
/// [`Context::snapshot`] pushes a frame, [`Context::revert`] discards back
/// to a snapshot, [`Context::commit`] folds frames down. The stack must be
/// back to size 1 before the context hash is taken or the journal is
/// committed to the store.
pub struct Context {
    loader: Arc<dyn Loader>,
    stack: Vec<ContextData>,
}

impl Context {
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self {
            loader,
            stack: vec![ContextData::default()],
        }
    }

    fn top_mut(&mut self) -> &mut ContextData {
        self.stack.last_mut().expect("context stack is never empty")
    }

    // ───────────────────────────────────────────────────────────────────
    // Snapshot discipline
    // ───────────────────────────────────────────────────────────────────

    /// Push a snapshot frame. Returns the marker to pass to
    /// [`Context::revert`] or [`Context::commit`].
    pub fn snapshot(&mut self) -> usize {
        self.stack.push(ContextData::default());
        self.stack.len()
    }

    /// Discard every change made at or above the snapshot marker.
    pub fn revert(&mut self, snapshot: usize) {
        while self.stack.len() >= snapshot && self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Keep the changes made at or above the snapshot marker, folding them
    /// into the frame below.
    pub fn commit(&mut self, snapshot: usize) {
        while self.stack.len() >= snapshot && self.stack.len() > 1 {
            let child = self.stack.pop().expect("stack len checked above");
            self.top_mut().merge(child);
        }
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    /// Hash of the base journal. Callers ensure the stack is fully
    /// committed (size 1) first; the kernel rejects dirty contexts.
    pub fn hash(&self) -> Hash256 {
        self.stack[0].hash()
    }

    /// Flatten into a single journal, folding any remaining frames.
    pub fn into_data(mut self) -> ContextData {
        while self.stack.len() > 1 {
            let child = self.stack.pop().expect("stack len checked above");
            self.top_mut().merge(child);
        }
        self.stack.pop().expect("context stack is never empty")
    }

    /// The base journal (stack frame 0).
    pub fn base(&self) -> &ContextData {
        &self.stack[0]
    }

    // ───────────────────────────────────────────────────────────────────
    // Sequence counters
    // ───────────────────────────────────────────────────────────────────

    /// Increment the staged sequence of the address.
    pub fn add_seq(&mut self, address: Address) {
        let next = self.seq(address) + 1;
        self.top_mut().seq_map.insert(address, next);
    }

    // ───────────────────────────────────────────────────────────────────
    // Accounts
    // ───────────────────────────────────────────────────────────────────

    /// Mutable access to an account, materializing it in the top frame.
    pub fn account_mut(&mut self, address: Address) -> Result<&mut Account, LedgerError> {
        let in_top_created = self
            .stack
            .last()
            .expect("context stack is never empty")
            .created_account_map
            .contains_key(&address);
        let in_top_modified = self
            .stack
            .last()
            .expect("context stack is never empty")
            .account_map
            .contains_key(&address);
        if !in_top_created && !in_top_modified {
            let account = self.account(address)?;
            self.top_mut().account_map.insert(address, account);
        }
        let top = self.top_mut();
        if in_top_created {
            return Ok(top
                .created_account_map
                .get_mut(&address)
                .expect("checked above"));
        }
        Ok(top.account_map.get_mut(&address).expect("inserted above"))
    }

    /// Stage a new account. The address and any non-empty name must be
    /// globally unused.
    pub fn create_account(&mut self, account: Account) -> Result<(), LedgerError> {
        let address = account.address();
        if self.is_exist_account(address)? {
            return Err(LedgerError::ExistAddress);
        }
        if !account.name().is_empty() && self.is_exist_account_name(account.name())? {
            return Err(LedgerError::ExistAccountName);
        }
        self.top_mut().created_account_map.insert(address, account);
        Ok(())
    }

    /// Stage the deletion of an existing account.
    pub fn delete_account(&mut self, address: Address) -> Result<(), LedgerError> {
        let account = self.account(address)?;
        let top = self.top_mut();
        if top.created_account_map.remove(&address).is_some() {
            return Ok(());
        }
        top.account_map.remove(&address);
        top.deleted_account_map.insert(address, account);
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Per-account data
    // ───────────────────────────────────────────────────────────────────

    pub fn set_account_data(&mut self, address: Address, key: &[u8], value: Vec<u8>) {
        let top = self.top_mut();
        top.deleted_account_data_map
            .remove(&(address, key.to_vec()));
        top.account_data_map.insert((address, key.to_vec()), value);
    }

    pub fn remove_account_data(&mut self, address: Address, key: &[u8]) {
        let top = self.top_mut();
        top.account_data_map.remove(&(address, key.to_vec()));
        top.deleted_account_data_map.insert((address, key.to_vec()));
    }

    // ───────────────────────────────────────────────────────────────────
    // UTXOs
    // ───────────────────────────────────────────────────────────────────

    pub fn create_utxo(&mut self, id: u64, tx_out: TxOut) -> Result<(), LedgerError> {
        if self.is_exist_utxo(id)? {
            return Err(LedgerError::ExistUtxo);
        }
        self.top_mut().created_utxo_map.insert(id, tx_out);
        Ok(())
    }

    /// Stage the consumption of an existing UTXO.
    pub fn delete_utxo(&mut self, id: u64) -> Result<(), LedgerError> {
        if !self.is_exist_utxo(id)? {
            return Err(LedgerError::NotExistUtxo);
        }
        let top = self.top_mut();
        if top.created_utxo_map.remove(&id).is_some() {
            return Ok(());
        }
        top.utxo_map.remove(&id);
        top.deleted_utxo_map.insert(id);
        Ok(())
    }

    /// Replace the output of an existing UTXO.
    pub fn set_utxo(&mut self, id: u64, tx_out: TxOut) -> Result<(), LedgerError> {
        if !self.is_exist_utxo(id)? {
            return Err(LedgerError::NotExistUtxo);
        }
        let top = self.top_mut();
        if let Some(created) = top.created_utxo_map.get_mut(&id) {
            *created = tx_out;
            return Ok(());
        }
        top.utxo_map.insert(id, UTXO { id, tx_out });
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────────
    // Locked balances & events
    // ───────────────────────────────────────────────────────────────────

    pub fn add_locked_balance(&mut self, lb: LockedBalance) {
        self.top_mut().locked_balances.push(lb);
    }

    pub fn remove_locked_balance(&mut self, lb: LockedBalance) {
        self.top_mut().deleted_locked_balances.push(lb);
    }

    /// Emit an event at the given execution coordinate. The intra-slot
    /// index is assigned in emission order.
    pub fn emit_event(&mut self, coord: Coordinate, event_type: u64, payload: Vec<u8>) {
        let index = self
            .stack
            .iter()
            .flat_map(|frame| frame.events.iter())
            .filter(|ev| ev.coord == coord)
            .count() as u16;
        self.top_mut().events.push(EventRecord {
            coord,
            index,
            event_type,
            payload,
        });
    }
}

impl Loader for Context {
    fn chain_coord(&self) -> Coordinate {
        self.loader.chain_coord()
    }

    fn target_height(&self) -> u32 {
        self.loader.target_height()
    }

    fn last_hash(&self) -> Hash256 {
        self.loader.last_hash()
    }

    fn seq(&self, address: Address) -> u64 {
        for frame in self.stack.iter().rev() {
            if let Some(seq) = frame.seq_map.get(&address) {
                return *seq;
            }
        }
        self.loader.seq(address)
    }

    fn account(&self, address: Address) -> Result<Account, LedgerError> {
        for frame in self.stack.iter().rev() {
            if frame.deleted_account_map.contains_key(&address) {
                return Err(LedgerError::NotExistAccount);
            }
            if let Some(acc) = frame.account_map.get(&address) {
                return Ok(acc.clone());
            }
            if let Some(acc) = frame.created_account_map.get(&address) {
                return Ok(acc.clone());
            }
        }
        self.loader.account(address)
    }

    fn is_exist_account(&self, address: Address) -> Result<bool, LedgerError> {
        for frame in self.stack.iter().rev() {
            if frame.deleted_account_map.contains_key(&address) {
                return Ok(false);
            }
            if frame.account_map.contains_key(&address)
                || frame.created_account_map.contains_key(&address)
            {
                return Ok(true);
            }
        }
        self.loader.is_exist_account(address)
    }

    fn address_by_name(&self, name: &str) -> Result<Address, LedgerError> {
        for frame in self.stack.iter().rev() {
            for acc in frame
                .created_account_map
                .values()
                .chain(frame.account_map.values())
            {
                if acc.name() == name {
                    return Ok(acc.address());
                }
            }
            if frame
                .deleted_account_map
                .values()
                .any(|acc| acc.name() == name)
            {
                return Err(LedgerError::NotExistAccount);
            }
        }
        self.loader.address_by_name(name)
    }

    fn is_exist_account_name(&self, name: &str) -> Result<bool, LedgerError> {
        match self.address_by_name(name) {
            Ok(_) => Ok(true),
            Err(LedgerError::NotExistAccount) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn account_data(&self, address: Address, key: &[u8]) -> Option<Vec<u8>> {
        let lookup = (address, key.to_vec());
        for frame in self.stack.iter().rev() {
            if frame.deleted_account_data_map.contains(&lookup) {
                return None;
            }
            if let Some(value) = frame.account_data_map.get(&lookup) {
                return Some(value.clone());
            }
            if frame.deleted_account_map.contains_key(&address) {
                return None;
            }
        }
        self.loader.account_data(address, key)
    }

    fn account_data_keys(
        &self,
        address: Address,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>, LedgerError> {
        let mut keys: BTreeSet<Vec<u8>> = self
            .loader
            .account_data_keys(address, prefix)?
            .into_iter()
            .collect();
        for frame in self.stack.iter() {
            if frame.deleted_account_map.contains_key(&address) {
                keys.clear();
            }
            for (addr, key) in frame.deleted_account_data_map.iter() {
                if *addr == address {
                    keys.remove(key);
                }
            }
            for (addr, key) in frame.account_data_map.keys() {
                if *addr == address && key.starts_with(prefix) {
                    keys.insert(key.clone());
                }
            }
        }
        Ok(keys.into_iter().collect())
    }

    fn utxo(&self, id: u64) -> Result<UTXO, LedgerError> {
        for frame in self.stack.iter().rev() {
            if frame.deleted_utxo_map.contains(&id) {
                return Err(LedgerError::NotExistUtxo);
            }
            if let Some(utxo) = frame.utxo_map.get(&id) {
                return Ok(*utxo);
            }
            if let Some(tx_out) = frame.created_utxo_map.get(&id) {
                return Ok(UTXO {
                    id,
                    tx_out: *tx_out,
                });
            }
        }
        self.loader.utxo(id)
    }

    fn is_exist_utxo(&self, id: u64) -> Result<bool, LedgerError> {
        for frame in self.stack.iter().rev() {
            if frame.deleted_utxo_map.contains(&id) {
                return Ok(false);
            }
            if frame.utxo_map.contains_key(&id) || frame.created_utxo_map.contains_key(&id) {
                return Ok(true);
            }
        }
        self.loader.is_exist_utxo(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::KeyAccount;
    use fornax_types::{Amount, KeyPair};

    /// An empty chain backing for context tests.
    struct EmptyLoader;

    impl Loader for EmptyLoader {
        fn chain_coord(&self) -> Coordinate {
            Coordinate::new(0, 0)
        }
        fn target_height(&self) -> u32 {
            1
        }
        fn last_hash(&self) -> Hash256 {
            Hash256::ZERO
        }
        fn seq(&self, _address: Address) -> u64 {
            0
        }
        fn account(&self, _address: Address) -> Result<Account, LedgerError> {
            Err(LedgerError::NotExistAccount)
        }
        fn is_exist_account(&self, _address: Address) -> Result<bool, LedgerError> {
            Ok(false)
        }
        fn address_by_name(&self, _name: &str) -> Result<Address, LedgerError> {
            Err(LedgerError::NotExistAccount)
        }
        fn is_exist_account_name(&self, _name: &str) -> Result<bool, LedgerError> {
            Ok(false)
        }
        fn account_data(&self, _address: Address, _key: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn account_data_keys(
            &self,
            _address: Address,
            _prefix: &[u8],
        ) -> Result<Vec<Vec<u8>>, LedgerError> {
            Ok(vec![])
        }
        fn utxo(&self, _id: u64) -> Result<UTXO, LedgerError> {
            Err(LedgerError::NotExistUtxo)
        }
        fn is_exist_utxo(&self, _id: u64) -> Result<bool, LedgerError> {
            Ok(false)
        }
    }

    fn test_context() -> Context {
        Context::new(Arc::new(EmptyLoader))
    }

    fn key_account(n: u64, balance: u64) -> Account {
        Account::Key(KeyAccount {
            address: Address::with_coordinate(Coordinate::new(0, 0), n),
            name: format!("account{n}"),
            balance: Amount::coins(balance),
            key_hash: KeyPair::generate().public_hash(),
        })
    }

    #[test]
    fn revert_restores_observable_hash() {
        let mut ctx = test_context();
        ctx.create_account(key_account(1, 10)).unwrap();
        let before = ctx.stack[0].hash();

        let sn = ctx.snapshot();
        ctx.create_account(key_account(2, 20)).unwrap();
        ctx.add_seq(Address::with_coordinate(Coordinate::new(0, 0), 1));
        ctx.revert(sn);

        assert_eq!(ctx.stack_size(), 1);
        assert_eq!(ctx.stack[0].hash(), before);
    }

    #[test]
    fn commit_folds_changes_down() {
        let mut ctx = test_context();
        let sn = ctx.snapshot();
        ctx.create_account(key_account(1, 10)).unwrap();
        ctx.commit(sn);

        assert_eq!(ctx.stack_size(), 1);
        let addr = Address::with_coordinate(Coordinate::new(0, 0), 1);
        assert!(ctx.is_exist_account(addr).unwrap());
    }

    #[test]
    fn reads_fall_through_frames() {
        let mut ctx = test_context();
        ctx.create_account(key_account(1, 10)).unwrap();
        let addr = Address::with_coordinate(Coordinate::new(0, 0), 1);

        let _sn = ctx.snapshot();
        assert_eq!(ctx.account(addr).unwrap().balance(), Amount::coins(10));

        ctx.account_mut(addr).unwrap().add_balance(Amount::coins(5));
        assert_eq!(ctx.account(addr).unwrap().balance(), Amount::coins(15));
    }

    #[test]
    fn deleted_account_is_invisible() {
        let mut ctx = test_context();
        ctx.create_account(key_account(1, 10)).unwrap();
        let addr = Address::with_coordinate(Coordinate::new(0, 0), 1);

        let sn = ctx.snapshot();
        ctx.delete_account(addr).unwrap();
        assert!(matches!(
            ctx.account(addr),
            Err(LedgerError::NotExistAccount)
        ));
        assert!(!ctx.is_exist_account(addr).unwrap());

        ctx.revert(sn);
        assert!(ctx.is_exist_account(addr).unwrap());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut ctx = test_context();
        ctx.create_account(key_account(1, 0)).unwrap();
        let mut dup = key_account(2, 0);
        if let Account::Key(k) = &mut dup {
            k.name = "account1".into();
        }
        assert!(matches!(
            ctx.create_account(dup),
            Err(LedgerError::ExistAccountName)
        ));
    }

    #[test]
    fn utxo_lifecycle() {
        let mut ctx = test_context();
        let out = TxOut {
            amount: Amount::coins(4),
            public_hash: KeyPair::generate().public_hash(),
        };
        ctx.create_utxo(7, out).unwrap();
        assert!(ctx.is_exist_utxo(7).unwrap());
        assert!(matches!(
            ctx.create_utxo(7, out),
            Err(LedgerError::ExistUtxo)
        ));

        let sn = ctx.snapshot();
        ctx.delete_utxo(7).unwrap();
        assert!(!ctx.is_exist_utxo(7).unwrap());
        ctx.revert(sn);
        assert!(ctx.is_exist_utxo(7).unwrap());
    }

    #[test]
    fn seq_increments_stack_aware() {
        let mut ctx = test_context();
        let addr = Address::with_coordinate(Coordinate::new(0, 0), 1);
        assert_eq!(ctx.seq(addr), 0);
        ctx.add_seq(addr);
        assert_eq!(ctx.seq(addr), 1);

        let sn = ctx.snapshot();
        ctx.add_seq(addr);
        assert_eq!(ctx.seq(addr), 2);
        ctx.revert(sn);
        assert_eq!(ctx.seq(addr), 1);
    }
}
