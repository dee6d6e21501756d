//! The candidate table and its rotation.

use crate::rank::Rank;
use crate::ConsensusError;
use fornax_ledger::{Account, ContextData};
use fornax_types::{
    double_hash, read_u32, read_u64, read_u8, write_u32, write_u64, write_u8, Address, Codec,
    Hash256, Header, PublicHash,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tracing::debug;

struct EngineInner {
    /// Number of blocks folded into the table.
    height: u64,
    /// Sorted by (phase, hash-space, address), head first.
    candidates: Vec<Rank>,
    /// Address → ranked public hash, for O(1) membership checks.
    rank_map: HashMap<Address, PublicHash>,
}

impl EngineInner {
    fn largest_phase(&self) -> u32 {
        self.candidates.last().map(Rank::phase).unwrap_or(0)
    }

    fn insert_sorted(&mut self, rank: Rank) {
        let idx = self.candidates.partition_point(|r| r < &rank);
        self.candidates.insert(idx, rank);
    }

    fn add_rank(&mut self, rank: Rank) -> Result<(), ConsensusError> {
        if let Some(head) = self.candidates.first() {
            if rank.phase() < head.phase() {
                return Err(ConsensusError::InvalidPhase);
            }
        }
        if self.rank_map.contains_key(&rank.address) {
            return Err(ConsensusError::ExistAddress);
        }
        self.rank_map.insert(rank.address, rank.public_hash);
        self.insert_sorted(rank);
        Ok(())
    }

    fn remove_rank(&mut self, address: Address) {
        if self.rank_map.remove(&address).is_some() {
            self.candidates.retain(|r| r.address != address);
        }
    }

    /// Rotate the table for one produced block.
    ///
    /// The first `timeout_count` iterations each demote the head by one
    /// phase (it failed to produce); the final step advances the producing
    /// head and re-seeds its hash-space with the produced block hash.
    fn forward_candidates(
        &mut self,
        timeout_count: u32,
        header_hash: Hash256,
    ) -> Result<(), ConsensusError> {
        if timeout_count as usize >= self.candidates.len() {
            return Err(ConsensusError::ExceedCandidateCount);
        }
        for _ in 0..timeout_count {
            let mut head = self.candidates.remove(0);
            head.set_phase(head.phase() + 1);
            self.insert_sorted(head);
        }
        let mut top = self.candidates.remove(0);
        top.set(top.phase() + 1, header_hash);
        self.insert_sorted(top);
        self.height += 1;
        Ok(())
    }

    /// Fold account creations/deletions into the table.
    fn apply_accounts(&mut self, ctd: &ContextData) -> Result<(), ConsensusError> {
        let phase = self.largest_phase() + 1;
        for account in ctd.created_account_map.values() {
            if let Account::Formulation(f) = account {
                self.add_rank(Rank::new(
                    f.address,
                    f.key_hash,
                    phase,
                    double_hash(f.address.as_bytes()),
                ))?;
            }
        }
        for account in ctd.deleted_account_map.values() {
            if matches!(account, Account::Formulation(_)) {
                self.remove_rank(account.address());
            }
        }
        Ok(())
    }

    fn build_save_data(&self, observers: &HashSet<PublicHash>) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u64(&mut buf, self.height).expect("write to Vec");
        write_u32(&mut buf, self.candidates.len() as u32).expect("write to Vec");
        for rank in &self.candidates {
            rank.write_to(&mut buf).expect("write to Vec");
        }
        let mut sorted: Vec<&PublicHash> = observers.iter().collect();
        sorted.sort();
        write_u8(&mut buf, sorted.len() as u8).expect("write to Vec");
        for pubhash in sorted {
            pubhash.write_to(&mut buf).expect("write to Vec");
        }
        buf
    }
}

/// The deterministic formulator rank table.
///
/// Guarded by its own mutex (§5): the kernel calls in from the block
/// pipeline, the observer state machine reads the top rank concurrently.
pub struct RankingEngine {
    inner: Mutex<EngineInner>,
    observer_set: HashSet<PublicHash>,
}

impl RankingEngine {
    pub fn new(observer_set: HashSet<PublicHash>) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                height: 0,
                candidates: Vec::new(),
                rank_map: HashMap::new(),
            }),
            observer_set,
        }
    }

    /// The fixed observer key set.
    pub fn observer_set(&self) -> &HashSet<PublicHash> {
        &self.observer_set
    }

    pub fn candidate_count(&self) -> usize {
        self.inner.lock().candidates.len()
    }

    /// The candidate at position `timeout_count` from the head.
    pub fn top_rank(&self, timeout_count: u32) -> Result<Rank, ConsensusError> {
        let inner = self.inner.lock();
        inner
            .candidates
            .get(timeout_count as usize)
            .cloned()
            .ok_or(ConsensusError::InsufficientCandidates)
    }

    /// The head-most rank whose address is in `formulators`, with its index.
    pub fn top_rank_in_set(
        &self,
        formulators: &HashSet<Address>,
    ) -> Result<(Rank, usize), ConsensusError> {
        if formulators.is_empty() {
            return Err(ConsensusError::InsufficientCandidates);
        }
        let inner = self.inner.lock();
        inner
            .candidates
            .iter()
            .enumerate()
            .find(|(_, r)| formulators.contains(&r.address))
            .map(|(i, r)| (r.clone(), i))
            .ok_or(ConsensusError::InsufficientCandidates)
    }

    /// Whether `address` is ranked with exactly this public hash.
    pub fn is_formulator(&self, address: Address, public_hash: PublicHash) -> bool {
        self.inner.lock().rank_map.get(&address) == Some(&public_hash)
    }

    /// Seed the table from the genesis context. Returns the save blob.
    pub fn apply_genesis(&self, ctd: &ContextData) -> Result<Vec<u8>, ConsensusError> {
        let mut inner = self.inner.lock();
        inner.apply_accounts(ctd)?;
        debug!(candidates = inner.candidates.len(), "ranking seeded from genesis");
        Ok(inner.build_save_data(&self.observer_set))
    }

    /// Fold one committed block into the table. Returns the save blob.
    pub fn process_context(
        &self,
        ctd: &ContextData,
        header_hash: Hash256,
        header: &Header,
    ) -> Result<Vec<u8>, ConsensusError> {
        let mut inner = self.inner.lock();
        inner.forward_candidates(header.timeout_count, header_hash)?;
        inner.apply_accounts(ctd)?;
        Ok(inner.build_save_data(&self.observer_set))
    }

    /// Restore the table from a save blob.
    pub fn load_from_save_data(&self, data: &[u8]) -> Result<(), ConsensusError> {
        let mut r = Cursor::new(data);
        let height = read_u64(&mut r)?;
        let count = read_u32(&mut r)? as usize;
        let mut candidates = Vec::with_capacity(count);
        let mut rank_map = HashMap::with_capacity(count);
        for _ in 0..count {
            let rank = Rank::read_from(&mut r)?;
            rank_map.insert(rank.address, rank.public_hash);
            candidates.push(rank);
        }
        // The observer tail is fixed at genesis; read and discard.
        let observer_count = read_u8(&mut r)? as usize;
        for _ in 0..observer_count {
            PublicHash::read_from(&mut r)?;
        }
        let mut inner = self.inner.lock();
        inner.height = height;
        inner.candidates = candidates;
        inner.rank_map = rank_map;
        Ok(())
    }
}
