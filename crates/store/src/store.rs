//! The RocksDB-backed store.
//!
//! All operations are synchronous blocking I/O. Every mutating call builds
//! one `WriteBatch` and commits it with `sync=true`, so a single block
//! commit is atomic across all affected keys and survives a crash at any
//! point.

use crate::keys;
use fornax_ledger::{
    Account, ChainData, ContextData, EventRecord, LedgerError, Loader, LockedBalance, TxIn, UTXO,
};
use fornax_types::{Address, Amount, Codec, Coordinate, Hash256, Header, ADDRESS_SIZE};
use parking_lot::{Mutex, RwLock};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Interval of the background compaction pass.
const COMPACTION_INTERVAL: Duration = Duration::from_secs(300);

/// Store error kinds.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store closed")]
    Closed,
    #[error("not exist key")]
    NotExistKey,
    #[error("already genesised")]
    AlreadyGenesised,
    #[error("invalid txin key")]
    InvalidTxInKey,
    #[error("backend: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Closed => LedgerError::StoreClosed,
            other => LedgerError::Backend(other.to_string()),
        }
    }
}

#[derive(Default)]
struct HeightCache {
    cached: bool,
    height: u32,
    hash: Hash256,
    data: Option<ChainData>,
}

/// Crash-consistent persisted chain state.
///
/// The close read-lock lets in-flight reads finish before shutdown; after
/// [`Store::close`] every public call fails with [`StoreError::Closed`].
pub struct Store {
    db: Arc<DB>,
    version: u16,
    chain_coord: Coordinate,
    seq_cache: Mutex<HashMap<Address, u64>>,
    height_cache: Mutex<HeightCache>,
    close_lock: RwLock<()>,
    is_close: AtomicBool,
    compaction_stop: Arc<AtomicBool>,
    compaction_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Store {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        version: u16,
        chain_coord: Coordinate,
    ) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_keep_log_file_num(8);
        let db = Arc::new(DB::open(&opts, path)?);

        let compaction_stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let db = Arc::clone(&db);
            let stop = Arc::clone(&compaction_stop);
            std::thread::spawn(move || loop {
                let mut waited = Duration::ZERO;
                while waited < COMPACTION_INTERVAL {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                    waited += Duration::from_secs(1);
                }
                debug!("running periodic compaction");
                db.compact_range(None::<&[u8]>, None::<&[u8]>);
            })
        };

        let store = Self {
            db,
            version,
            chain_coord,
            seq_cache: Mutex::new(HashMap::new()),
            height_cache: Mutex::new(HeightCache::default()),
            close_lock: RwLock::new(()),
            is_close: AtomicBool::new(false),
            compaction_stop,
            compaction_handle: Mutex::new(Some(handle)),
        };
        info!(height = store.height(), "store opened");
        Ok(store)
    }

    /// Terminate the store. In-flight reads complete first.
    pub fn close(&self) {
        self.is_close.store(true, Ordering::Release);
        let _write = self.close_lock.write();
        self.compaction_stop.store(true, Ordering::Release);
        if let Some(handle) = self.compaction_handle.lock().take() {
            let _ = handle.join();
        }
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "flush on close failed");
        }
    }

    fn guard(&self) -> Result<parking_lot::RwLockReadGuard<'_, ()>, StoreError> {
        let guard = self.close_lock.read();
        if self.is_close.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(guard)
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Box<[u8]>, Box<[u8]>)> {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .take_while(|item| match item {
                Ok((key, _)) => key.starts_with(prefix),
                Err(_) => false,
            })
            .filter_map(|item| item.ok())
            .collect()
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        Ok(self.db.write_opt(batch, &write_opts)?)
    }

    // ───────────────────────────────────────────────────────────────────
    // Chain reads
    // ───────────────────────────────────────────────────────────────────

    /// The committed height. Returns 0 when the store is closed or empty.
    pub fn height(&self) -> u32 {
        let Ok(_guard) = self.guard() else { return 0 };
        {
            let cache = self.height_cache.lock();
            if cache.cached {
                return cache.height;
            }
        }
        match self.get(keys::HEIGHT_KEY) {
            Ok(Some(bytes)) => <[u8; 4]>::try_from(bytes.as_slice())
                .map(u32::from_le_bytes)
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn hash(&self, height: u32) -> Result<Hash256, StoreError> {
        let _guard = self.guard()?;
        {
            let cache = self.height_cache.lock();
            if cache.cached && cache.height == height {
                return Ok(cache.hash);
            }
        }
        let bytes = self
            .get(&keys::to_height_hash_key(height))?
            .ok_or(StoreError::NotExistKey)?;
        Hash256::from_slice(&bytes).ok_or(StoreError::NotExistKey)
    }

    /// Height of a known block hash.
    pub fn height_of(&self, hash: Hash256) -> Result<u32, StoreError> {
        let _guard = self.guard()?;
        let bytes = self
            .get(&keys::to_hash_height_key(hash))?
            .ok_or(StoreError::NotExistKey)?;
        <[u8; 4]>::try_from(bytes.as_slice())
            .map(u32::from_le_bytes)
            .map_err(|_| StoreError::NotExistKey)
    }

    pub fn header(&self, height: u32) -> Result<Header, StoreError> {
        let _guard = self.guard()?;
        if height < 1 {
            return Err(StoreError::NotExistKey);
        }
        {
            let cache = self.height_cache.lock();
            if cache.cached && cache.height == height {
                if let Some(data) = &cache.data {
                    return Ok(data.header.clone());
                }
            }
        }
        let bytes = self
            .get(&keys::to_height_header_key(height))?
            .ok_or(StoreError::NotExistKey)?;
        Ok(Header::from_bytes(&bytes)?)
    }

    pub fn data(&self, height: u32) -> Result<ChainData, StoreError> {
        let _guard = self.guard()?;
        if height < 1 {
            return Err(StoreError::NotExistKey);
        }
        {
            let cache = self.height_cache.lock();
            if cache.cached && cache.height == height {
                if let Some(data) = &cache.data {
                    return Ok(data.clone());
                }
            }
        }
        let bytes = self
            .get(&keys::to_height_data_key(height))?
            .ok_or(StoreError::NotExistKey)?;
        Ok(ChainData::from_bytes(&bytes)?)
    }

    // ───────────────────────────────────────────────────────────────────
    // Account reads
    // ───────────────────────────────────────────────────────────────────

    pub fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let _guard = self.guard()?;
        let mut list = Vec::new();
        for (_, value) in self.scan_prefix(&keys::TAG_ACCOUNT) {
            list.push(Account::from_bytes(&value)?);
        }
        Ok(list)
    }

    fn account_opt(&self, address: Address) -> Result<Option<Account>, StoreError> {
        let _guard = self.guard()?;
        match self.get(&keys::to_account_key(address))? {
            Some(bytes) => Ok(Some(Account::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ───────────────────────────────────────────────────────────────────
    // Locked balances
    // ───────────────────────────────────────────────────────────────────

    pub fn locked_balances(&self, address: Address) -> Result<Vec<LockedBalance>, StoreError> {
        let _guard = self.guard()?;
        let mut list = Vec::new();
        for (key, value) in self.scan_prefix(&keys::to_locked_balance_prefix(address)) {
            if let (Some((address, unlock_height)), Ok(amount)) =
                (keys::from_locked_balance_key(&key), Amount::from_bytes(&value))
            {
                list.push(LockedBalance {
                    address,
                    amount,
                    unlock_height,
                });
            }
        }
        Ok(list)
    }

    pub fn locked_balances_by_height(
        &self,
        height: u32,
    ) -> Result<Vec<LockedBalance>, StoreError> {
        let _guard = self.guard()?;
        let mut list = Vec::new();
        for (key, value) in self.scan_prefix(&keys::to_locked_balance_height_prefix(height)) {
            if let (Some((address, unlock_height)), Ok(amount)) = (
                keys::from_locked_balance_height_key(&key),
                Amount::from_bytes(&value),
            ) {
                list.push(LockedBalance {
                    address,
                    amount,
                    unlock_height,
                });
            }
        }
        Ok(list)
    }

    // ───────────────────────────────────────────────────────────────────
    // UTXO reads
    // ───────────────────────────────────────────────────────────────────

    pub fn utxos(&self) -> Result<Vec<UTXO>, StoreError> {
        let _guard = self.guard()?;
        let mut list = Vec::new();
        for (key, value) in self.scan_prefix(&keys::TAG_UTXO) {
            if let Some(id) = keys::from_utxo_key(&key) {
                list.push(UTXO {
                    id,
                    tx_out: Codec::from_bytes(&value)?,
                });
            }
        }
        Ok(list)
    }

    // ───────────────────────────────────────────────────────────────────
    // Custom data & events
    // ───────────────────────────────────────────────────────────────────

    pub fn custom_data(&self, key: &str) -> Option<Vec<u8>> {
        let _guard = self.guard().ok()?;
        self.get(&keys::to_custom_key(key)).ok().flatten()
    }

    pub fn set_custom_data(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let mut batch = WriteBatch::default();
        batch.put(keys::to_custom_key(key), value);
        self.write_batch(batch)
    }

    pub fn delete_custom_data(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let mut batch = WriteBatch::default();
        batch.delete(keys::to_custom_key(key));
        self.write_batch(batch)
    }

    /// Events emitted in the height range `[from, to]`.
    pub fn events(&self, from: u32, to: u32) -> Result<Vec<EventRecord>, StoreError> {
        let _guard = self.guard()?;
        let start = keys::to_event_key(fornax_ledger::marshal_event_id(
            Coordinate::new(from, 0),
            0,
        ));
        let end_id = fornax_ledger::marshal_event_id(Coordinate::new(to, u16::MAX), u16::MAX);
        let mut list = Vec::new();
        for item in self
            .db
            .iterator(IteratorMode::From(&start, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&keys::TAG_EVENT) {
                break;
            }
            let Some(id) = keys::from_event_key(&key) else {
                break;
            };
            if id > end_id {
                break;
            }
            if value.len() < 8 {
                continue;
            }
            let event_type =
                u64::from_le_bytes(<[u8; 8]>::try_from(&value[..8]).expect("8 bytes"));
            let txin = TxIn::from_id(id);
            list.push(EventRecord {
                coord: Coordinate::new(txin.height, txin.index),
                index: txin.n,
                event_type,
                payload: value[8..].to_vec(),
            });
        }
        Ok(list)
    }

    // ───────────────────────────────────────────────────────────────────
    // Writes
    // ───────────────────────────────────────────────────────────────────

    /// Store the genesis state at height 0.
    pub fn store_genesis(
        &self,
        genesis_hash: Hash256,
        ctd: &ContextData,
        custom: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        if self.get(keys::HEIGHT_KEY)?.is_some() {
            return Err(StoreError::AlreadyGenesised);
        }
        let mut batch = WriteBatch::default();
        batch.put(keys::to_height_hash_key(0), genesis_hash.as_bytes());
        batch.put(keys::to_hash_height_key(genesis_hash), 0u32.to_le_bytes());
        batch.put(keys::HEIGHT_KEY, 0u32.to_le_bytes());
        self.apply_context_data(&mut batch, ctd)?;
        for (key, value) in custom {
            batch.put(keys::to_custom_key(key), value);
        }
        self.write_batch(batch)?;

        let mut cache = self.height_cache.lock();
        *cache = HeightCache {
            cached: true,
            height: 0,
            hash: genesis_hash,
            data: None,
        };
        info!(genesis_hash = %genesis_hash, "genesis stored");
        Ok(())
    }

    /// Atomically commit one block: chain rows, the full context journal and
    /// the custom blobs, in a single synced batch.
    pub fn store_data(
        &self,
        cd: ChainData,
        ctd: &ContextData,
        custom: &BTreeMap<String, Vec<u8>>,
    ) -> Result<(), StoreError> {
        let _guard = self.guard()?;
        let height = cd.header.height;
        let data_hash = cd.header.hash();

        let mut batch = WriteBatch::default();
        batch.put(keys::to_height_data_key(height), cd.to_bytes());
        batch.put(keys::to_height_header_key(height), cd.header.to_bytes());
        batch.put(keys::to_height_hash_key(height), data_hash.as_bytes());
        batch.put(keys::to_hash_height_key(data_hash), height.to_le_bytes());
        batch.put(keys::HEIGHT_KEY, height.to_le_bytes());
        self.apply_context_data(&mut batch, ctd)?;
        for (key, value) in custom {
            batch.put(keys::to_custom_key(key), value);
        }
        self.write_batch(batch)?;

        {
            let mut seq_cache = self.seq_cache.lock();
            for (address, seq) in &ctd.seq_map {
                seq_cache.insert(*address, *seq);
            }
        }
        let mut cache = self.height_cache.lock();
        *cache = HeightCache {
            cached: true,
            height,
            hash: data_hash,
            data: Some(cd),
        };
        Ok(())
    }

    fn apply_context_data(
        &self,
        batch: &mut WriteBatch,
        ctd: &ContextData,
    ) -> Result<(), StoreError> {
        for (address, seq) in &ctd.seq_map {
            batch.put(keys::to_account_seq_key(*address), seq.to_le_bytes());
        }

        // Locked-balance additions fold into any amount already persisted
        // under the same (address, height); both indexes carry the sum.
        let mut locked_sums: BTreeMap<(Address, u32), Amount> = BTreeMap::new();
        for lb in &ctd.locked_balances {
            let entry = locked_sums
                .entry((lb.address, lb.unlock_height))
                .or_insert(Amount::ZERO);
            *entry = *entry + lb.amount;
        }
        for ((address, unlock_height), added) in locked_sums {
            let existing = self
                .get(&keys::to_locked_balance_key(address, unlock_height))?
                .map(|bytes| Amount::from_bytes(&bytes))
                .transpose()?
                .unwrap_or(Amount::ZERO);
            let sum = (existing + added).to_bytes();
            batch.put(keys::to_locked_balance_key(address, unlock_height), &sum);
            batch.put(
                keys::to_locked_balance_height_key(unlock_height, address),
                &sum,
            );
        }
        for lb in &ctd.deleted_locked_balances {
            batch.delete(keys::to_locked_balance_key(lb.address, lb.unlock_height));
            batch.delete(keys::to_locked_balance_height_key(
                lb.unlock_height,
                lb.address,
            ));
        }

        for (address, account) in ctd.account_map.iter().chain(&ctd.created_account_map) {
            batch.put(keys::to_account_key(*address), account.to_bytes());
            batch.put(
                keys::to_account_balance_key(*address),
                account.balance().to_bytes(),
            );
            if !account.name().is_empty() {
                batch.put(keys::to_account_name_key(account.name()), address.as_bytes());
            }
        }
        for (address, account) in &ctd.deleted_account_map {
            batch.delete(keys::to_account_key(*address));
            batch.delete(keys::to_account_balance_key(*address));
            if !account.name().is_empty() {
                batch.delete(keys::to_account_name_key(account.name()));
            }
            for (key, _) in self.scan_prefix(&keys::to_account_data_prefix(*address)) {
                batch.delete(key);
            }
        }

        for ((address, key), value) in &ctd.account_data_map {
            batch.put(keys::to_account_data_key(*address, key), value);
        }
        for (address, key) in &ctd.deleted_account_data_map {
            batch.delete(keys::to_account_data_key(*address, key));
        }

        for (id, utxo) in &ctd.utxo_map {
            if utxo.id != *id {
                return Err(StoreError::InvalidTxInKey);
            }
            batch.put(keys::to_utxo_key(*id), utxo.tx_out.to_bytes());
        }
        for (id, tx_out) in &ctd.created_utxo_map {
            batch.put(keys::to_utxo_key(*id), tx_out.to_bytes());
        }
        for id in &ctd.deleted_utxo_map {
            batch.delete(keys::to_utxo_key(*id));
        }

        for event in &ctd.events {
            let mut value = Vec::with_capacity(8 + event.payload.len());
            value.extend_from_slice(&event.event_type.to_le_bytes());
            value.extend_from_slice(&event.payload);
            batch.put(keys::to_event_key(event.id()), value);
        }
        Ok(())
    }
}

impl Loader for Store {
    fn chain_coord(&self) -> Coordinate {
        self.chain_coord
    }

    fn target_height(&self) -> u32 {
        self.height() + 1
    }

    fn last_hash(&self) -> Hash256 {
        match self.hash(self.height()) {
            Ok(hash) => hash,
            // Closed store or pre-genesis: the zero hash.
            Err(StoreError::Closed) | Err(StoreError::NotExistKey) => Hash256::ZERO,
            // A height row exists whose hash row is missing: the batch that
            // wrote it was atomic, so this cannot happen.
            Err(e) => panic!("hash missing for committed height: {e}"),
        }
    }

    fn seq(&self, address: Address) -> u64 {
        let Ok(_guard) = self.guard() else { return 0 };
        let mut cache = self.seq_cache.lock();
        if let Some(seq) = cache.get(&address) {
            return *seq;
        }
        let seq = match self.get(&keys::to_account_seq_key(address)) {
            Ok(Some(bytes)) => <[u8; 8]>::try_from(bytes.as_slice())
                .map(u64::from_le_bytes)
                .unwrap_or(0),
            _ => return 0,
        };
        cache.insert(address, seq);
        seq
    }

    fn account(&self, address: Address) -> Result<Account, LedgerError> {
        self.account_opt(address)?
            .ok_or(LedgerError::NotExistAccount)
    }

    fn is_exist_account(&self, address: Address) -> Result<bool, LedgerError> {
        Ok(self.account_opt(address)?.is_some())
    }

    fn address_by_name(&self, name: &str) -> Result<Address, LedgerError> {
        let _guard = self.guard().map_err(StoreError::into)?;
        let bytes = self
            .get(&keys::to_account_name_key(name))
            .map_err(StoreError::into)?
            .ok_or(LedgerError::NotExistAccount)?;
        Address::from_slice(&bytes).ok_or(LedgerError::NotExistAccount)
    }

    fn is_exist_account_name(&self, name: &str) -> Result<bool, LedgerError> {
        match self.address_by_name(name) {
            Ok(_) => Ok(true),
            Err(LedgerError::NotExistAccount) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn account_data(&self, address: Address, key: &[u8]) -> Option<Vec<u8>> {
        let _guard = self.guard().ok()?;
        self.get(&keys::to_account_data_key(address, key))
            .ok()
            .flatten()
    }

    fn account_data_keys(
        &self,
        address: Address,
        prefix: &[u8],
    ) -> Result<Vec<Vec<u8>>, LedgerError> {
        let _guard = self.guard().map_err(StoreError::into)?;
        let scan_prefix = keys::to_account_data_key(address, prefix);
        let strip = 2 + ADDRESS_SIZE;
        Ok(self
            .scan_prefix(&scan_prefix)
            .into_iter()
            .map(|(key, _)| key[strip..].to_vec())
            .collect())
    }

    fn utxo(&self, id: u64) -> Result<UTXO, LedgerError> {
        let _guard = self.guard().map_err(StoreError::into)?;
        let bytes = self
            .get(&keys::to_utxo_key(id))
            .map_err(StoreError::into)?
            .ok_or(LedgerError::NotExistUtxo)?;
        Ok(UTXO {
            id,
            tx_out: Codec::from_bytes(&bytes).map_err(LedgerError::Io)?,
        })
    }

    fn is_exist_utxo(&self, id: u64) -> Result<bool, LedgerError> {
        let _guard = self.guard().map_err(StoreError::into)?;
        Ok(self
            .get(&keys::to_utxo_key(id))
            .map_err(StoreError::into)?
            .is_some())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.compaction_stop.store(true, Ordering::Release);
        if let Some(handle) = self.compaction_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_ledger::{Body, KeyAccount, TxOut};
    use fornax_types::{double_hash, KeyPair};
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> Store {
        Store::open(dir.path(), 1, Coordinate::new(0, 0)).unwrap()
    }

    fn addr(n: u64) -> Address {
        Address::with_coordinate(Coordinate::new(0, 0), n)
    }

    fn key_account(n: u64, balance: u64) -> Account {
        Account::Key(KeyAccount {
            address: addr(n),
            name: format!("account{n}"),
            balance: Amount::coins(balance),
            key_hash: KeyPair::generate().public_hash(),
        })
    }

    fn genesis_data(accounts: &[Account]) -> ContextData {
        let mut ctd = ContextData::default();
        for acc in accounts {
            ctd.created_account_map.insert(acc.address(), acc.clone());
        }
        ctd
    }

    fn sample_chain_data(height: u32, prev_hash: Hash256, ctd: &ContextData) -> ChainData {
        let key = KeyPair::generate();
        let header = Header {
            version: 1,
            height,
            prev_hash,
            timestamp: 1,
            chain_coord: Coordinate::new(0, 0),
            formulator: addr(1),
            timeout_count: 0,
            context_hash: ctd.hash(),
            level_root_hash: double_hash(b"root"),
        };
        let sig = key.sign(&header.hash()).unwrap();
        ChainData {
            header,
            body: Body::default(),
            signatures: vec![sig],
        }
    }

    #[test]
    fn genesis_then_block_commit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let genesis_hash = double_hash(b"genesis");
        let ctd = genesis_data(&[key_account(1, 1000), key_account(2, 0)]);
        store
            .store_genesis(genesis_hash, &ctd, &BTreeMap::new())
            .unwrap();

        assert_eq!(store.height(), 0);
        assert_eq!(store.hash(0).unwrap(), genesis_hash);
        assert_eq!(store.last_hash(), genesis_hash);
        assert!(matches!(
            store.store_genesis(genesis_hash, &ctd, &BTreeMap::new()),
            Err(StoreError::AlreadyGenesised)
        ));
        assert_eq!(
            store.account(addr(1)).unwrap().balance(),
            Amount::coins(1000)
        );

        let mut block_ctd = ContextData::default();
        block_ctd.seq_map.insert(addr(1), 1);
        let cd = sample_chain_data(1, genesis_hash, &block_ctd);
        let block_hash = cd.header.hash();
        store.store_data(cd, &block_ctd, &BTreeMap::new()).unwrap();

        assert_eq!(store.height(), 1);
        assert_eq!(store.hash(1).unwrap(), block_hash);
        assert_eq!(store.height_of(block_hash).unwrap(), 1);
        assert_eq!(store.seq(addr(1)), 1);
        assert_eq!(store.header(1).unwrap().height, 1);
        // store.Hash(h) equals the double hash of the stored header.
        assert_eq!(store.data(1).unwrap().header.hash(), block_hash);
    }

    #[test]
    fn locked_balance_double_index() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .store_genesis(
                double_hash(b"g"),
                &genesis_data(&[key_account(1, 10)]),
                &BTreeMap::new(),
            )
            .unwrap();

        let lb = LockedBalance {
            address: addr(1),
            amount: Amount::coins(3),
            unlock_height: 9,
        };
        let mut ctd = ContextData::default();
        ctd.locked_balances.push(lb);
        let cd = sample_chain_data(1, store.last_hash(), &ctd);
        store.store_data(cd, &ctd, &BTreeMap::new()).unwrap();

        let by_addr = store.locked_balances(addr(1)).unwrap();
        let by_height = store.locked_balances_by_height(9).unwrap();
        assert_eq!(by_addr, vec![lb]);
        assert_eq!(by_height, vec![lb]);

        // Release deletes both rows.
        let mut release = ContextData::default();
        release.deleted_locked_balances.push(lb);
        let cd = sample_chain_data(2, store.last_hash(), &release);
        store.store_data(cd, &release, &BTreeMap::new()).unwrap();
        assert!(store.locked_balances(addr(1)).unwrap().is_empty());
        assert!(store.locked_balances_by_height(9).unwrap().is_empty());
    }

    #[test]
    fn crash_consistency_reopen() {
        let dir = TempDir::new().unwrap();
        let genesis_hash = double_hash(b"genesis");
        let block_hash;
        {
            let store = open_store(&dir);
            store
                .store_genesis(
                    genesis_hash,
                    &genesis_data(&[key_account(1, 10)]),
                    &BTreeMap::new(),
                )
                .unwrap();
            let mut ctd = ContextData::default();
            ctd.seq_map.insert(addr(1), 4);
            let cd = sample_chain_data(1, genesis_hash, &ctd);
            block_hash = cd.header.hash();
            store.store_data(cd, &ctd, &BTreeMap::new()).unwrap();
            // Dropped without close(): the synced batch is already durable,
            // only the in-memory caches are lost.
        }
        let store = open_store(&dir);
        assert_eq!(store.height(), 1);
        assert_eq!(store.hash(1).unwrap(), block_hash);
        assert_eq!(store.last_hash(), block_hash);
        assert_eq!(store.seq(addr(1)), 4);
    }

    #[test]
    fn account_deletion_cascades() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let acc = key_account(1, 10);
        store
            .store_genesis(double_hash(b"g"), &genesis_data(&[acc.clone()]), &BTreeMap::new())
            .unwrap();

        let mut ctd = ContextData::default();
        ctd.account_data_map
            .insert((addr(1), b"k1".to_vec()), b"v1".to_vec());
        let cd = sample_chain_data(1, store.last_hash(), &ctd);
        store.store_data(cd, &ctd, &BTreeMap::new()).unwrap();
        assert_eq!(store.account_data(addr(1), b"k1"), Some(b"v1".to_vec()));
        assert_eq!(store.address_by_name("account1").unwrap(), addr(1));

        let mut del = ContextData::default();
        del.deleted_account_map.insert(addr(1), acc);
        let cd = sample_chain_data(2, store.last_hash(), &del);
        store.store_data(cd, &del, &BTreeMap::new()).unwrap();

        assert!(!store.is_exist_account(addr(1)).unwrap());
        assert_eq!(store.account_data(addr(1), b"k1"), None);
        assert!(!store.is_exist_account_name("account1").unwrap());
    }

    #[test]
    fn utxo_and_event_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .store_genesis(double_hash(b"g"), &ContextData::default(), &BTreeMap::new())
            .unwrap();

        let id = TxIn::new(1, 0, 0).id();
        let mut ctd = ContextData::default();
        ctd.created_utxo_map.insert(
            id,
            TxOut {
                amount: Amount::coins(2),
                public_hash: KeyPair::generate().public_hash(),
            },
        );
        ctd.events.push(EventRecord {
            coord: Coordinate::new(1, 0),
            index: 0,
            event_type: 42,
            payload: b"payload".to_vec(),
        });
        let cd = sample_chain_data(1, store.last_hash(), &ctd);
        store.store_data(cd, &ctd, &BTreeMap::new()).unwrap();

        assert!(store.is_exist_utxo(id).unwrap());
        assert_eq!(store.utxo(id).unwrap().tx_out.amount, Amount::coins(2));
        let events = store.events(1, 1).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, 42);
        assert_eq!(events[0].payload, b"payload");

        let mut spend = ContextData::default();
        spend.deleted_utxo_map.insert(id);
        let cd = sample_chain_data(2, store.last_hash(), &spend);
        store.store_data(cd, &spend, &BTreeMap::new()).unwrap();
        assert!(!store.is_exist_utxo(id).unwrap());
    }

    #[test]
    fn custom_data_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.custom_data("consensus").is_none());
        store.set_custom_data("consensus", b"blob").unwrap();
        assert_eq!(store.custom_data("consensus"), Some(b"blob".to_vec()));
        store.delete_custom_data("consensus").unwrap();
        assert!(store.custom_data("consensus").is_none());
    }

    #[test]
    fn closed_store_rejects_reads() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.close();
        assert!(matches!(store.hash(0), Err(StoreError::Closed)));
        assert_eq!(store.height(), 0);
        assert!(store.custom_data("x").is_none());
        assert!(matches!(
            store.set_custom_data("x", b"y"),
            Err(StoreError::Closed)
        ));
    }
}
