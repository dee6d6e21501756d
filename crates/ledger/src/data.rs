//! The mutation journal of one execution frame.

use crate::account::Account;
use crate::event::EventRecord;
use crate::locked::LockedBalance;
use crate::utxo::{TxOut, UTXO};
use fornax_types::{
    double_hash, write_bytes, write_u32, write_u64, write_u8, Address, Codec, Hash256,
};
use std::collections::{BTreeMap, BTreeSet};

/// Every mutation staged by one snapshot frame (or, after a block fully
/// executes with stack size 1, by the whole block).
///
/// Ordered maps keep iteration deterministic: the frame hash and the store's
/// write order are both derived from it.
#[derive(Clone, Debug, Default)]
pub struct ContextData {
    /// Address → new sequence value.
    pub seq_map: BTreeMap<Address, u64>,
    /// Modified pre-existing accounts.
    pub account_map: BTreeMap<Address, Account>,
    /// Accounts created in this frame.
    pub created_account_map: BTreeMap<Address, Account>,
    /// Accounts deleted in this frame (with their last value, for cascades).
    pub deleted_account_map: BTreeMap<Address, Account>,
    /// (address, key) → value edits of per-account data.
    pub account_data_map: BTreeMap<(Address, Vec<u8>), Vec<u8>>,
    /// (address, key) deletions of per-account data.
    pub deleted_account_data_map: BTreeSet<(Address, Vec<u8>)>,
    /// Modified pre-existing UTXOs.
    pub utxo_map: BTreeMap<u64, UTXO>,
    /// UTXOs created in this frame.
    pub created_utxo_map: BTreeMap<u64, TxOut>,
    /// UTXOs consumed in this frame.
    pub deleted_utxo_map: BTreeSet<u64>,
    /// Locked balances added in this frame.
    pub locked_balances: Vec<LockedBalance>,
    /// Locked balances released in this frame.
    pub deleted_locked_balances: Vec<LockedBalance>,
    /// Events emitted in this frame, in emission order.
    pub events: Vec<EventRecord>,
}

impl ContextData {
    pub fn is_empty(&self) -> bool {
        self.seq_map.is_empty()
            && self.account_map.is_empty()
            && self.created_account_map.is_empty()
            && self.deleted_account_map.is_empty()
            && self.account_data_map.is_empty()
            && self.deleted_account_data_map.is_empty()
            && self.utxo_map.is_empty()
            && self.created_utxo_map.is_empty()
            && self.deleted_utxo_map.is_empty()
            && self.locked_balances.is_empty()
            && self.deleted_locked_balances.is_empty()
            && self.events.is_empty()
    }

    /// Fold a child frame into this one.
    ///
    /// The child saw this frame as its base, so child entries win. A child
    /// deletion of an account this frame created cancels the creation; any
    /// other deletion supersedes prior modification.
    pub fn merge(&mut self, child: ContextData) {
        self.seq_map.extend(child.seq_map);

        for (addr, acc) in child.account_map {
            if let Some(created) = self.created_account_map.get_mut(&addr) {
                *created = acc;
            } else {
                self.account_map.insert(addr, acc);
            }
        }
        for (addr, acc) in child.created_account_map {
            if self.deleted_account_map.remove(&addr).is_some() {
                // Re-creation after deletion below us: the net effect on the
                // base is a plain modification.
                self.account_map.insert(addr, acc);
            } else {
                self.created_account_map.insert(addr, acc);
            }
        }
        for (addr, acc) in child.deleted_account_map {
            if self.created_account_map.remove(&addr).is_some() {
                continue;
            }
            self.account_map.remove(&addr);
            self.deleted_account_map.insert(addr, acc);
        }

        for (key, value) in child.account_data_map {
            self.deleted_account_data_map.remove(&key);
            self.account_data_map.insert(key, value);
        }
        for key in child.deleted_account_data_map {
            self.account_data_map.remove(&key);
            self.deleted_account_data_map.insert(key);
        }

        for (id, utxo) in child.utxo_map {
            if let Some(created) = self.created_utxo_map.get_mut(&id) {
                *created = utxo.tx_out;
            } else {
                self.utxo_map.insert(id, utxo);
            }
        }
        for (id, tx_out) in child.created_utxo_map {
            if self.deleted_utxo_map.remove(&id) {
                self.utxo_map.insert(id, UTXO { id, tx_out });
            } else {
                self.created_utxo_map.insert(id, tx_out);
            }
        }
        for id in child.deleted_utxo_map {
            if self.created_utxo_map.remove(&id).is_some() {
                continue;
            }
            self.utxo_map.remove(&id);
            self.deleted_utxo_map.insert(id);
        }

        self.locked_balances.extend(child.locked_balances);
        self.deleted_locked_balances
            .extend(child.deleted_locked_balances);
        self.events.extend(child.events);
    }

    /// The canonical hash of this journal.
    ///
    /// Serialization iterates the ordered maps, so two journals with the
    /// same content hash identically regardless of mutation order.
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        let w = &mut buf;
        write_u32(w, self.seq_map.len() as u32).expect("write to Vec");
        for (addr, seq) in &self.seq_map {
            addr.write_to(w).expect("write to Vec");
            write_u64(w, *seq).expect("write to Vec");
        }
        for (label, map) in [
            (1u8, &self.account_map),
            (2u8, &self.created_account_map),
            (3u8, &self.deleted_account_map),
        ] {
            write_u8(w, label).expect("write to Vec");
            write_u32(w, map.len() as u32).expect("write to Vec");
            for (addr, acc) in map {
                addr.write_to(w).expect("write to Vec");
                acc.write_to(w).expect("write to Vec");
            }
        }
        write_u32(w, self.account_data_map.len() as u32).expect("write to Vec");
        for ((addr, key), value) in &self.account_data_map {
            addr.write_to(w).expect("write to Vec");
            write_bytes(w, key).expect("write to Vec");
            write_bytes(w, value).expect("write to Vec");
        }
        write_u32(w, self.deleted_account_data_map.len() as u32).expect("write to Vec");
        for (addr, key) in &self.deleted_account_data_map {
            addr.write_to(w).expect("write to Vec");
            write_bytes(w, key).expect("write to Vec");
        }
        write_u32(w, self.utxo_map.len() as u32).expect("write to Vec");
        for utxo in self.utxo_map.values() {
            utxo.write_to(w).expect("write to Vec");
        }
        write_u32(w, self.created_utxo_map.len() as u32).expect("write to Vec");
        for (id, tx_out) in &self.created_utxo_map {
            write_u64(w, *id).expect("write to Vec");
            tx_out.write_to(w).expect("write to Vec");
        }
        write_u32(w, self.deleted_utxo_map.len() as u32).expect("write to Vec");
        for id in &self.deleted_utxo_map {
            write_u64(w, *id).expect("write to Vec");
        }
        write_u32(w, self.locked_balances.len() as u32).expect("write to Vec");
        for lb in &self.locked_balances {
            lb.write_to(w).expect("write to Vec");
        }
        write_u32(w, self.deleted_locked_balances.len() as u32).expect("write to Vec");
        for lb in &self.deleted_locked_balances {
            lb.write_to(w).expect("write to Vec");
        }
        write_u32(w, self.events.len() as u32).expect("write to Vec");
        for ev in &self.events {
            ev.write_to(w).expect("write to Vec");
        }
        double_hash(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, KeyAccount};
    use fornax_types::{Amount, Coordinate, KeyPair};

    fn key_account(n: u64, balance: u64) -> Account {
        Account::Key(KeyAccount {
            address: Address::with_coordinate(Coordinate::new(0, 0), n),
            name: String::new(),
            balance: Amount::coins(balance),
            key_hash: KeyPair::generate().public_hash(),
        })
    }

    #[test]
    fn hash_ignores_insertion_order() {
        let a = key_account(1, 5);
        let b = key_account(2, 7);

        let mut first = ContextData::default();
        first.created_account_map.insert(a.address(), a.clone());
        first.created_account_map.insert(b.address(), b.clone());

        let mut second = ContextData::default();
        second.created_account_map.insert(b.address(), b);
        second.created_account_map.insert(a.address(), a);

        assert_eq!(first.hash(), second.hash());
    }

    #[test]
    fn merge_deletion_cancels_creation() {
        let acc = key_account(1, 5);
        let addr = acc.address();

        let mut parent = ContextData::default();
        parent.created_account_map.insert(addr, acc.clone());

        let mut child = ContextData::default();
        child.deleted_account_map.insert(addr, acc);

        parent.merge(child);
        assert!(parent.created_account_map.is_empty());
        assert!(parent.deleted_account_map.is_empty());
    }

    #[test]
    fn merge_child_wins() {
        let old = key_account(1, 5);
        let addr = old.address();
        let mut new = old.clone();
        new.add_balance(Amount::coins(1));

        let mut parent = ContextData::default();
        parent.account_map.insert(addr, old);
        let mut child = ContextData::default();
        child.account_map.insert(addr, new.clone());

        parent.merge(child);
        assert_eq!(parent.account_map.get(&addr), Some(&new));
    }
}
