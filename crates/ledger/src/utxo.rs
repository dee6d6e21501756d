//! Unspent transaction outputs.

use fornax_types::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, Amount, Codec,
    PublicHash,
};
use std::io::{self, Read, Write};

/// A reference to an output: (height, tx-index, output-index).
///
/// The packed 64-bit id is the on-disk and on-wire form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxIn {
    pub height: u32,
    pub index: u16,
    pub n: u16,
}

impl TxIn {
    pub fn new(height: u32, index: u16, n: u16) -> Self {
        Self { height, index, n }
    }

    /// Pack into the 64-bit UTXO id.
    pub fn id(&self) -> u64 {
        (self.height as u64) << 32 | (self.index as u64) << 16 | self.n as u64
    }

    /// Unpack from a 64-bit UTXO id.
    pub fn from_id(id: u64) -> Self {
        Self {
            height: (id >> 32) as u32,
            index: (id >> 16) as u16,
            n: id as u16,
        }
    }
}

impl Codec for TxIn {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.height)?;
        write_u16(w, self.index)?;
        write_u16(w, self.n)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            height: read_u32(r)?,
            index: read_u16(r)?,
            n: read_u16(r)?,
        })
    }
}

/// An output: an amount payable to a key hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub amount: Amount,
    pub public_hash: PublicHash,
}

impl Codec for TxOut {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.amount.write_to(w)?;
        self.public_hash.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            amount: Amount::read_from(r)?,
            public_hash: PublicHash::read_from(r)?,
        })
    }
}

/// An unspent output. Created by an executing transaction, consumed once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UTXO {
    pub id: u64,
    pub tx_out: TxOut,
}

impl Codec for UTXO {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u64(w, self.id)?;
        self.tx_out.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            id: read_u64(r)?,
            tx_out: TxOut::read_from(r)?,
        })
    }
}
