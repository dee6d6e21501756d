//! Transaction types.
//!
//! Transactions are a closed tagged-variant set; the tag byte leads the
//! canonical serialization. The transaction hash signed by senders is the
//! double hash of that serialization.

use crate::account::FormulationType;
use crate::utxo::TxIn;
use fornax_types::{
    hash_of, read_string, read_u64, read_u8, write_string, write_u64, write_u8, Address, Amount,
    Codec, Coordinate, Hash256, PublicHash,
};
use std::io::{self, Read, Write};

pub const TAG_TRANSFER: u8 = 0x10;
pub const TAG_CREATE_FORMULATION: u8 = 0x30;
pub const TAG_REVOKE_FORMULATION: u8 = 0x31;

/// An account-to-account coin transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub chain_coord: Coordinate,
    pub timestamp: u64,
    pub seq: u64,
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
}

/// Creates a formulation account at the executing coordinate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateFormulation {
    pub chain_coord: Coordinate,
    pub timestamp: u64,
    pub seq: u64,
    pub from: Address,
    pub name: String,
    pub formulation_type: FormulationType,
    pub key_hash: PublicHash,
}

/// Deletes a formulation account, refunding its balance and deposit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevokeFormulation {
    pub chain_coord: Coordinate,
    pub timestamp: u64,
    pub seq: u64,
    pub from: Address,
    pub formulation_address: Address,
}

/// A ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transaction {
    Transfer(Transfer),
    CreateFormulation(CreateFormulation),
    RevokeFormulation(RevokeFormulation),
}

/// How a transaction sources its inputs.
pub enum TxKind<'a> {
    /// Sequence-numbered, debiting a sender account.
    Account { from: Address, seq: u64 },
    /// Consuming existing UTXOs.
    Utxo { vins: &'a [TxIn] },
}

impl Transaction {
    pub fn type_tag(&self) -> u8 {
        match self {
            Transaction::Transfer(_) => TAG_TRANSFER,
            Transaction::CreateFormulation(_) => TAG_CREATE_FORMULATION,
            Transaction::RevokeFormulation(_) => TAG_REVOKE_FORMULATION,
        }
    }

    pub fn chain_coord(&self) -> Coordinate {
        match self {
            Transaction::Transfer(tx) => tx.chain_coord,
            Transaction::CreateFormulation(tx) => tx.chain_coord,
            Transaction::RevokeFormulation(tx) => tx.chain_coord,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Transaction::Transfer(tx) => tx.timestamp,
            Transaction::CreateFormulation(tx) => tx.timestamp,
            Transaction::RevokeFormulation(tx) => tx.timestamp,
        }
    }

    pub fn kind(&self) -> TxKind<'_> {
        match self {
            Transaction::Transfer(tx) => TxKind::Account {
                from: tx.from,
                seq: tx.seq,
            },
            Transaction::CreateFormulation(tx) => TxKind::Account {
                from: tx.from,
                seq: tx.seq,
            },
            Transaction::RevokeFormulation(tx) => TxKind::Account {
                from: tx.from,
                seq: tx.seq,
            },
        }
    }

    pub fn hash(&self) -> Hash256 {
        hash_of(self)
    }
}

impl Codec for Transaction {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u8(w, self.type_tag())?;
        match self {
            Transaction::Transfer(tx) => {
                tx.chain_coord.write_to(w)?;
                write_u64(w, tx.timestamp)?;
                write_u64(w, tx.seq)?;
                tx.from.write_to(w)?;
                tx.to.write_to(w)?;
                tx.amount.write_to(w)
            }
            Transaction::CreateFormulation(tx) => {
                tx.chain_coord.write_to(w)?;
                write_u64(w, tx.timestamp)?;
                write_u64(w, tx.seq)?;
                tx.from.write_to(w)?;
                write_string(w, &tx.name)?;
                write_u8(w, tx.formulation_type as u8)?;
                tx.key_hash.write_to(w)
            }
            Transaction::RevokeFormulation(tx) => {
                tx.chain_coord.write_to(w)?;
                write_u64(w, tx.timestamp)?;
                write_u64(w, tx.seq)?;
                tx.from.write_to(w)?;
                tx.formulation_address.write_to(w)
            }
        }
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let tag = read_u8(r)?;
        match tag {
            TAG_TRANSFER => Ok(Transaction::Transfer(Transfer {
                chain_coord: Coordinate::read_from(r)?,
                timestamp: read_u64(r)?,
                seq: read_u64(r)?,
                from: Address::read_from(r)?,
                to: Address::read_from(r)?,
                amount: Amount::read_from(r)?,
            })),
            TAG_CREATE_FORMULATION => Ok(Transaction::CreateFormulation(CreateFormulation {
                chain_coord: Coordinate::read_from(r)?,
                timestamp: read_u64(r)?,
                seq: read_u64(r)?,
                from: Address::read_from(r)?,
                name: read_string(r)?,
                formulation_type: {
                    let tag = read_u8(r)?;
                    FormulationType::from_tag(tag).ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "unknown formulation tag")
                    })?
                },
                key_hash: PublicHash::read_from(r)?,
            })),
            TAG_REVOKE_FORMULATION => Ok(Transaction::RevokeFormulation(RevokeFormulation {
                chain_coord: Coordinate::read_from(r)?,
                timestamp: read_u64(r)?,
                seq: read_u64(r)?,
                from: Address::read_from(r)?,
                formulation_address: Address::read_from(r)?,
            })),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown transaction tag {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::KeyPair;

    fn addr(n: u64) -> Address {
        Address::with_coordinate(Coordinate::new(0, 0), n)
    }

    #[test]
    fn codec_round_trip_all_variants() {
        let txs = [
            Transaction::Transfer(Transfer {
                chain_coord: Coordinate::new(0, 0),
                timestamp: 7,
                seq: 1,
                from: addr(1),
                to: addr(2),
                amount: Amount::coins(100),
            }),
            Transaction::CreateFormulation(CreateFormulation {
                chain_coord: Coordinate::new(0, 0),
                timestamp: 8,
                seq: 2,
                from: addr(1),
                name: "formulator9".into(),
                formulation_type: FormulationType::Alpha,
                key_hash: KeyPair::generate().public_hash(),
            }),
            Transaction::RevokeFormulation(RevokeFormulation {
                chain_coord: Coordinate::new(0, 0),
                timestamp: 9,
                seq: 3,
                from: addr(1),
                formulation_address: addr(7),
            }),
        ];
        for tx in txs {
            let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
            assert_eq!(decoded, tx);
            assert_eq!(decoded.hash(), tx.hash());
        }
    }

    #[test]
    fn hash_commits_to_sequence() {
        let base = Transfer {
            chain_coord: Coordinate::new(0, 0),
            timestamp: 7,
            seq: 1,
            from: addr(1),
            to: addr(2),
            amount: Amount::coins(100),
        };
        let mut bumped = base.clone();
        bumped.seq = 2;
        assert_ne!(
            Transaction::Transfer(base).hash(),
            Transaction::Transfer(bumped).hash()
        );
    }
}
