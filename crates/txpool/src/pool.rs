//! The bucketed pool.

use crate::TxPoolError;
use fornax_ledger::{Loader, Transaction, TxKind};
use fornax_types::{Address, Hash256, Signature};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::trace;

/// One pooled transaction with its sender signatures.
#[derive(Clone, Debug)]
pub struct PoolItem {
    pub tx_hash: Hash256,
    pub transaction: Transaction,
    pub signatures: Vec<Signature>,
}

enum Slot {
    Account { from: Address, seq: u64 },
    Utxo,
}

#[derive(Default)]
struct PoolInner {
    /// hash → where the item lives.
    index: HashMap<Hash256, Slot>,
    /// Per-sender sequence-ordered buckets.
    buckets: HashMap<Address, BTreeMap<u64, PoolItem>>,
    /// Senders in first-insertion order; rotated on successful pops.
    sender_order: VecDeque<Address>,
    /// FIFO lane for UTXO transactions.
    utxo_queue: VecDeque<PoolItem>,
}

/// Content-addressed pending-transaction buffer.
///
/// The kernel holds the pool lock for the whole block-generation window via
/// [`TransactionPool::lock`], so pops and concurrent pushes cannot
/// interleave mid-block.
#[derive(Default)]
pub struct TransactionPool {
    inner: Mutex<PoolInner>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    pub fn is_exist(&self, tx_hash: Hash256) -> bool {
        self.inner.lock().index.contains_key(&tx_hash)
    }

    /// Insert a transaction. Duplicates by hash or by (sender, seq) slot are
    /// rejected.
    pub fn push(&self, transaction: Transaction, signatures: Vec<Signature>) -> Result<(), TxPoolError> {
        let tx_hash = transaction.hash();
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&tx_hash) {
            return Err(TxPoolError::ExistTransaction);
        }
        let item = PoolItem {
            tx_hash,
            transaction,
            signatures,
        };
        match item.transaction.kind() {
            TxKind::Account { from, seq } => {
                let bucket = inner.buckets.entry(from).or_default();
                if bucket.contains_key(&seq) {
                    return Err(TxPoolError::ExistTransaction);
                }
                let first_for_sender = bucket.is_empty();
                bucket.insert(seq, item);
                if first_for_sender {
                    inner.sender_order.push_back(from);
                }
                inner.index.insert(tx_hash, Slot::Account { from, seq });
            }
            TxKind::Utxo { .. } => {
                inner.utxo_queue.push_back(item);
                inner.index.insert(tx_hash, Slot::Utxo);
            }
        }
        trace!(tx_hash = %tx_hash, pool_size = inner.index.len(), "transaction pooled");
        Ok(())
    }

    /// Remove a transaction (after block inclusion or final expiry).
    pub fn remove(&self, tx_hash: Hash256) {
        let mut inner = self.inner.lock();
        match inner.index.remove(&tx_hash) {
            Some(Slot::Account { from, seq }) => {
                if let Some(bucket) = inner.buckets.get_mut(&from) {
                    bucket.remove(&seq);
                    if bucket.is_empty() {
                        inner.buckets.remove(&from);
                        inner.sender_order.retain(|a| *a != from);
                    }
                }
            }
            Some(Slot::Utxo) => {
                inner.utxo_queue.retain(|item| item.tx_hash != tx_hash);
            }
            None => {}
        }
    }

    /// Acquire the pool lock for a popping session.
    pub fn lock(&self) -> LockedPool<'_> {
        LockedPool {
            inner: self.inner.lock(),
        }
    }
}

/// The locked pool. Holding this guard blocks pushes; pops are only valid
/// while it is held so the sequence checks stay coherent with the staging
/// context.
pub struct LockedPool<'a> {
    inner: MutexGuard<'a, PoolInner>,
}

impl LockedPool<'_> {
    /// Pop the next executable candidate: a UTXO transaction if one is
    /// queued, otherwise the first sender (in rotation order) whose head
    /// transaction carries exactly `seq(from) + 1` under `loader`.
    ///
    /// Stale entries (sequence already committed) are dropped on the way.
    pub fn pop(&mut self, loader: &dyn Loader) -> Option<PoolItem> {
        if let Some(item) = self.inner.utxo_queue.pop_front() {
            self.inner.index.remove(&item.tx_hash);
            return Some(item);
        }

        let sender_count = self.inner.sender_order.len();
        for _ in 0..sender_count {
            let from = *self.inner.sender_order.front()?;
            let next_seq = loader.seq(from) + 1;

            let mut popped = None;
            let mut stale_hashes = Vec::new();
            let mut exhausted = false;
            if let Some(bucket) = self.inner.buckets.get_mut(&from) {
                // Drop entries whose sequence can never execute again.
                while let Some((&seq, _)) = bucket.iter().next() {
                    if seq < next_seq {
                        if let Some(stale) = bucket.remove(&seq) {
                            stale_hashes.push(stale.tx_hash);
                        }
                    } else {
                        if seq == next_seq {
                            popped = bucket.remove(&seq);
                        }
                        break;
                    }
                }
                exhausted = bucket.is_empty();
            }
            for stale in stale_hashes {
                self.inner.index.remove(&stale);
            }

            if exhausted {
                self.inner.buckets.remove(&from);
                self.inner.sender_order.pop_front();
            } else {
                // Rotate for cross-sender fairness.
                self.inner.sender_order.rotate_left(1);
            }
            if let Some(item) = popped {
                self.inner.index.remove(&item.tx_hash);
                return Some(item);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_ledger::{Account, LedgerError, Transfer, UTXO};
    use fornax_types::{Amount, Coordinate};
    use std::sync::Mutex as StdMutex;

    /// A loader whose sequences advance as the test "commits" transactions.
    struct SeqLoader {
        seqs: StdMutex<HashMap<Address, u64>>,
    }

    impl SeqLoader {
        fn new() -> Self {
            Self {
                seqs: StdMutex::new(HashMap::new()),
            }
        }

        fn set(&self, address: Address, seq: u64) {
            self.seqs.lock().unwrap().insert(address, seq);
        }
    }

    impl Loader for SeqLoader {
        fn chain_coord(&self) -> Coordinate {
            Coordinate::new(0, 0)
        }
        fn target_height(&self) -> u32 {
            1
        }
        fn last_hash(&self) -> fornax_types::Hash256 {
            fornax_types::Hash256::ZERO
        }
        fn seq(&self, address: Address) -> u64 {
            *self.seqs.lock().unwrap().get(&address).unwrap_or(&0)
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

    fn addr(n: u64) -> Address {
        Address::with_coordinate(Coordinate::new(0, 0), n)
    }

    fn transfer(from: u64, seq: u64) -> Transaction {
        Transaction::Transfer(Transfer {
            chain_coord: Coordinate::new(0, 0),
            timestamp: seq,
            seq,
            from: addr(from),
            to: addr(99),
            amount: Amount::coins(1),
        })
    }

    #[test]
    fn pops_in_sequence_order_despite_reverse_insertion() {
        let pool = TransactionPool::new();
        let loader = SeqLoader::new();
        // Submit n+3, n+2, n+1 in reverse order (n = 0).
        for seq in [3u64, 2, 1] {
            pool.push(transfer(1, seq), vec![]).unwrap();
        }

        let mut locked = pool.lock();
        let first = locked.pop(&loader).unwrap();
        assert_eq!(matches!(first.transaction.kind(), TxKind::Account { seq, .. } if seq == 1), true);

        // n+2 cannot pop before n+1 is committed.
        loader.set(addr(1), 1);
        let second = locked.pop(&loader).unwrap();
        assert!(matches!(second.transaction.kind(), TxKind::Account { seq, .. } if seq == 2));
        loader.set(addr(1), 2);
        let third = locked.pop(&loader).unwrap();
        assert!(matches!(third.transaction.kind(), TxKind::Account { seq, .. } if seq == 3));
        assert!(locked.pop(&loader).is_none());
    }

    #[test]
    fn gap_blocks_popping() {
        let pool = TransactionPool::new();
        let loader = SeqLoader::new();
        pool.push(transfer(1, 2), vec![]).unwrap();
        // seq 1 missing: nothing is executable.
        assert!(pool.lock().pop(&loader).is_none());
        // The gapped transaction stays pooled for later.
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn duplicate_hash_and_slot_rejected() {
        let pool = TransactionPool::new();
        pool.push(transfer(1, 1), vec![]).unwrap();
        assert_eq!(
            pool.push(transfer(1, 1), vec![]),
            Err(TxPoolError::ExistTransaction)
        );
    }

    #[test]
    fn stale_entries_are_dropped() {
        let pool = TransactionPool::new();
        let loader = SeqLoader::new();
        pool.push(transfer(1, 1), vec![]).unwrap();
        pool.push(transfer(1, 2), vec![]).unwrap();
        // Both sequences already committed elsewhere.
        loader.set(addr(1), 5);
        assert!(pool.lock().pop(&loader).is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn rotates_across_senders() {
        let pool = TransactionPool::new();
        let loader = SeqLoader::new();
        pool.push(transfer(1, 1), vec![]).unwrap();
        pool.push(transfer(2, 1), vec![]).unwrap();

        let mut locked = pool.lock();
        let first = locked.pop(&loader).unwrap();
        let second = locked.pop(&loader).unwrap();
        let froms: Vec<Address> = [first, second]
            .iter()
            .map(|i| match i.transaction.kind() {
                TxKind::Account { from, .. } => from,
                _ => unreachable!(),
            })
            .collect();
        assert!(froms.contains(&addr(1)) && froms.contains(&addr(2)));
    }

    #[test]
    fn remove_cleans_the_slot() {
        let pool = TransactionPool::new();
        let tx = transfer(1, 1);
        let hash = tx.hash();
        pool.push(tx.clone(), vec![]).unwrap();
        pool.remove(hash);
        assert!(!pool.is_exist(hash));
        // The slot is free again.
        pool.push(tx, vec![]).unwrap();
    }
}
