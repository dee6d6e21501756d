//! Blocks and observer-signed chain data.

use crate::transaction::Transaction;
use fornax_types::{
    double_hash, read_u32, read_u8, write_u32, write_u8, Codec, Hash256, Header, Signature,
};
use std::io::{self, Read, Write};

/// The transaction payload of a block.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Body {
    pub transactions: Vec<Transaction>,
    /// Sender signatures, one list per transaction.
    pub transaction_signatures: Vec<Vec<Signature>>,
}

impl Codec for Body {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.transactions.len() as u32)?;
        for tx in &self.transactions {
            tx.write_to(w)?;
        }
        for sigs in &self.transaction_signatures {
            write_u8(w, sigs.len() as u8)?;
            for sig in sigs {
                sig.write_to(w)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let count = read_u32(r)? as usize;
        let mut transactions = Vec::with_capacity(count);
        for _ in 0..count {
            transactions.push(Transaction::read_from(r)?);
        }
        let mut transaction_signatures = Vec::with_capacity(count);
        for _ in 0..count {
            let sig_count = read_u8(r)? as usize;
            let mut sigs = Vec::with_capacity(sig_count);
            for _ in 0..sig_count {
                sigs.push(Signature::read_from(r)?);
            }
            transaction_signatures.push(sigs);
        }
        Ok(Self {
            transactions,
            transaction_signatures,
        })
    }
}

/// A header and its payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub body: Body,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

impl Codec for Block {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        self.body.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            header: Header::read_from(r)?,
            body: Body::read_from(r)?,
        })
    }
}

/// A finalized block bundle: header, body, and the signature set.
///
/// `signatures[0]` is the generator signature over the header hash;
/// `signatures[1..]` are observer signatures over
/// [`observer_sign_hash`]`(header_hash, generator_signature)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainData {
    pub header: Header,
    pub body: Body,
    pub signatures: Vec<Signature>,
}

impl ChainData {
    pub fn generator_signature(&self) -> Option<&Signature> {
        self.signatures.first()
    }

    pub fn observer_signatures(&self) -> &[Signature] {
        if self.signatures.is_empty() {
            &[]
        } else {
            &self.signatures[1..]
        }
    }

    pub fn block(&self) -> Block {
        Block {
            header: self.header.clone(),
            body: self.body.clone(),
        }
    }
}

impl Codec for ChainData {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        self.body.write_to(w)?;
        write_u8(w, self.signatures.len() as u8)?;
        for sig in &self.signatures {
            sig.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let header = Header::read_from(r)?;
        let body = Body::read_from(r)?;
        let count = read_u8(r)? as usize;
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            signatures.push(Signature::read_from(r)?);
        }
        Ok(Self {
            header,
            body,
            signatures,
        })
    }
}

/// The digest observers sign: binds the header hash to the generator
/// signature, so an observer signature set cannot be replayed under a
/// different generator.
pub fn observer_sign_hash(header_hash: Hash256, generator_signature: &Signature) -> Hash256 {
    let mut buf = Vec::with_capacity(32 + 65);
    buf.extend_from_slice(header_hash.as_bytes());
    buf.extend_from_slice(generator_signature.as_bytes());
    double_hash(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transfer;
    use fornax_types::{Address, Amount, Coordinate, KeyPair};

    fn sample_header() -> Header {
        Header {
            version: 1,
            height: 1,
            prev_hash: double_hash(b"genesis"),
            timestamp: 42,
            chain_coord: Coordinate::new(0, 0),
            formulator: Address::with_coordinate(Coordinate::new(0, 0), 1),
            timeout_count: 0,
            context_hash: double_hash(b"ctx"),
            level_root_hash: double_hash(b"root"),
        }
    }

    #[test]
    fn chain_data_round_trip() {
        let key = KeyPair::generate();
        let header = sample_header();
        let tx = Transaction::Transfer(Transfer {
            chain_coord: Coordinate::new(0, 0),
            timestamp: 1,
            seq: 1,
            from: Address::with_coordinate(Coordinate::new(0, 0), 1),
            to: Address::with_coordinate(Coordinate::new(0, 0), 2),
            amount: Amount::coins(10),
        });
        let tx_sig = key.sign(&tx.hash()).unwrap();
        let gen_sig = key.sign(&header.hash()).unwrap();
        let obs_sig = key
            .sign(&observer_sign_hash(header.hash(), &gen_sig))
            .unwrap();

        let cd = ChainData {
            header,
            body: Body {
                transactions: vec![tx],
                transaction_signatures: vec![vec![tx_sig]],
            },
            signatures: vec![gen_sig, obs_sig],
        };
        let decoded = ChainData::from_bytes(&cd.to_bytes()).unwrap();
        assert_eq!(decoded, cd);
        assert_eq!(decoded.observer_signatures().len(), 1);
    }

    #[test]
    fn observer_sign_hash_binds_generator() {
        let key = KeyPair::generate();
        let header = sample_header();
        let sig_a = key.sign(&header.hash()).unwrap();
        let sig_b = key.sign(&double_hash(b"other")).unwrap();
        assert_ne!(
            observer_sign_hash(header.hash(), &sig_a),
            observer_sign_hash(header.hash(), &sig_b)
        );
    }
}
