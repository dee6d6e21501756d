//! Vote payloads and the framed wire message set.

use fornax_kernel::TransactionMessage;
use fornax_ledger::{Block, ChainData, Transaction};
use fornax_types::{
    hash_of, read_bool, read_u32, read_u64, read_u8, write_bool, write_u32, write_u64, write_u8,
    Address, Codec, Coordinate, Hash256, Header, PublicHash, Signature,
};
use std::cmp::Ordering;
use std::io::{self, Read, Write};

// Frame type ids (`u64 LE type | payload`). MSG_PING lives in the mesh.
pub const MSG_ROUND_VOTE: u64 = 0x10;
pub const MSG_ROUND_VOTE_ACK: u64 = 0x11;
pub const MSG_BLOCK_GEN: u64 = 0x12;
pub const MSG_BLOCK_VOTE: u64 = 0x13;
pub const MSG_TRANSACTION: u64 = 0x20;
pub const MSG_BLOCK_REQUEST: u64 = 0x30;
pub const MSG_CHAIN_DATA: u64 = 0x31;
pub const MSG_STATUS_PING: u64 = 0x32;

/// Phase-1 payload: one observer's proposal for the next round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundVote {
    pub chain_coord: Coordinate,
    pub last_hash: Hash256,
    pub vote_target_height: u32,
    pub timeout_count: u32,
    pub formulator: Address,
    pub formulator_public_hash: PublicHash,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub is_reply: bool,
}

impl RoundVote {
    pub fn hash(&self) -> Hash256 {
        hash_of(self)
    }

    /// The deterministic total order used for min-selection: the consensus
    /// fields first, the full serialization as the final tiebreaker.
    pub fn cmp_consensus(&self, other: &Self) -> Ordering {
        self.chain_coord
            .cmp(&other.chain_coord)
            .then_with(|| self.last_hash.cmp(&other.last_hash))
            .then_with(|| self.vote_target_height.cmp(&other.vote_target_height))
            .then_with(|| self.timeout_count.cmp(&other.timeout_count))
            .then_with(|| self.formulator.cmp(&other.formulator))
            .then_with(|| self.formulator_public_hash.cmp(&other.formulator_public_hash))
            .then_with(|| self.to_bytes().cmp(&other.to_bytes()))
    }

    /// Whether two votes agree on the consensus-relevant fields.
    pub fn agrees_with(&self, other: &Self) -> bool {
        self.chain_coord == other.chain_coord
            && self.last_hash == other.last_hash
            && self.vote_target_height == other.vote_target_height
            && self.timeout_count == other.timeout_count
            && self.formulator == other.formulator
            && self.formulator_public_hash == other.formulator_public_hash
    }
}

impl Codec for RoundVote {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.chain_coord.write_to(w)?;
        self.last_hash.write_to(w)?;
        write_u32(w, self.vote_target_height)?;
        write_u32(w, self.timeout_count)?;
        self.formulator.write_to(w)?;
        self.formulator_public_hash.write_to(w)?;
        write_u64(w, self.timestamp)?;
        write_bool(w, self.is_reply)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            chain_coord: Coordinate::read_from(r)?,
            last_hash: Hash256::read_from(r)?,
            vote_target_height: read_u32(r)?,
            timeout_count: read_u32(r)?,
            formulator: Address::read_from(r)?,
            formulator_public_hash: PublicHash::read_from(r)?,
            timestamp: read_u64(r)?,
            is_reply: read_bool(r)?,
        })
    }
}

/// Phase-2 payload: an observer's confirmation of the selected round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundVoteAck {
    pub vote_target_height: u32,
    pub timeout_count: u32,
    pub formulator: Address,
    pub formulator_public_hash: PublicHash,
    /// The acknowledging observer.
    pub public_hash: PublicHash,
    pub timestamp: u64,
    pub is_reply: bool,
}

impl RoundVoteAck {
    pub fn hash(&self) -> Hash256 {
        hash_of(self)
    }

    /// Whether the ack confirms the given selected round vote.
    pub fn agrees_with(&self, vote: &RoundVote) -> bool {
        self.vote_target_height == vote.vote_target_height
            && self.timeout_count == vote.timeout_count
            && self.formulator == vote.formulator
            && self.formulator_public_hash == vote.formulator_public_hash
    }

    pub fn cmp_consensus(&self, other: &Self) -> Ordering {
        self.vote_target_height
            .cmp(&other.vote_target_height)
            .then_with(|| self.timeout_count.cmp(&other.timeout_count))
            .then_with(|| self.formulator.cmp(&other.formulator))
            .then_with(|| self.formulator_public_hash.cmp(&other.formulator_public_hash))
            .then_with(|| self.to_bytes().cmp(&other.to_bytes()))
    }
}

impl Codec for RoundVoteAck {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.vote_target_height)?;
        write_u32(w, self.timeout_count)?;
        self.formulator.write_to(w)?;
        self.formulator_public_hash.write_to(w)?;
        self.public_hash.write_to(w)?;
        write_u64(w, self.timestamp)?;
        write_bool(w, self.is_reply)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            vote_target_height: read_u32(r)?,
            timeout_count: read_u32(r)?,
            formulator: Address::read_from(r)?,
            formulator_public_hash: PublicHash::read_from(r)?,
            public_hash: PublicHash::read_from(r)?,
            timestamp: read_u64(r)?,
            is_reply: read_bool(r)?,
        })
    }
}

/// Phase-3 payload: an observer's signature over a produced block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockVote {
    pub vote_target_height: u32,
    pub header: Header,
    pub generator_signature: Signature,
    pub observer_signature: Signature,
    pub is_reply: bool,
}

impl BlockVote {
    pub fn hash(&self) -> Hash256 {
        hash_of(self)
    }
}

impl Codec for BlockVote {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.vote_target_height)?;
        self.header.write_to(w)?;
        self.generator_signature.write_to(w)?;
        self.observer_signature.write_to(w)?;
        write_bool(w, self.is_reply)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            vote_target_height: read_u32(r)?,
            header: Header::read_from(r)?,
            generator_signature: Signature::read_from(r)?,
            observer_signature: Signature::read_from(r)?,
            is_reply: read_bool(r)?,
        })
    }
}

macro_rules! signed_message {
    ($name:ident, $payload:ty, $field:ident) => {
        /// A signed wrapper; the sender is recovered from the signature
        /// over the payload hash.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            pub $field: $payload,
            pub signature: Signature,
        }

        impl $name {
            /// Recover the sender's public hash.
            pub fn sender(&self) -> Result<PublicHash, fornax_types::CryptoError> {
                fornax_types::recover_public_hash(self.$field.hash(), &self.signature)
            }
        }

        impl Codec for $name {
            fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                self.$field.write_to(w)?;
                self.signature.write_to(w)
            }

            fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                Ok(Self {
                    $field: <$payload>::read_from(r)?,
                    signature: Signature::read_from(r)?,
                })
            }
        }
    };
}

signed_message!(RoundVoteMessage, RoundVote, round_vote);
signed_message!(RoundVoteAckMessage, RoundVoteAck, round_vote_ack);
signed_message!(BlockVoteMessage, BlockVote, block_vote);

/// The formulator's produced block, sent to every observer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockGenMessage {
    pub block: Block,
    pub generator_signature: Signature,
    pub is_reply: bool,
}

impl Codec for BlockGenMessage {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.block.write_to(w)?;
        self.generator_signature.write_to(w)?;
        write_bool(w, self.is_reply)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            block: Block::read_from(r)?,
            generator_signature: Signature::read_from(r)?,
            is_reply: read_bool(r)?,
        })
    }
}

/// Every frameable message of the voting and sync paths.
#[derive(Clone, Debug)]
pub enum Message {
    RoundVote(RoundVoteMessage),
    RoundVoteAck(RoundVoteAckMessage),
    BlockGen(BlockGenMessage),
    BlockVote(BlockVoteMessage),
    Transaction(TransactionMessage),
    /// Ask a peer for the chain data at a height.
    BlockRequest { height: u32 },
    /// Response to a block request; also pushed to lagging peers.
    ChainData(ChainData),
    /// Periodic status advertisement.
    StatusPing {
        height: u32,
        last_hash: Hash256,
        timestamp: u64,
    },
}

impl Message {
    pub fn type_id(&self) -> u64 {
        match self {
            Message::RoundVote(_) => MSG_ROUND_VOTE,
            Message::RoundVoteAck(_) => MSG_ROUND_VOTE_ACK,
            Message::BlockGen(_) => MSG_BLOCK_GEN,
            Message::BlockVote(_) => MSG_BLOCK_VOTE,
            Message::Transaction(_) => MSG_TRANSACTION,
            Message::BlockRequest { .. } => MSG_BLOCK_REQUEST,
            Message::ChainData(_) => MSG_CHAIN_DATA,
            Message::StatusPing { .. } => MSG_STATUS_PING,
        }
    }

    /// Encode to a `(type, payload)` frame for the mesh.
    pub fn to_frame(&self) -> (u64, Vec<u8>) {
        let mut payload = Vec::new();
        let w = &mut payload;
        match self {
            Message::RoundVote(m) => m.write_to(w).expect("write to Vec"),
            Message::RoundVoteAck(m) => m.write_to(w).expect("write to Vec"),
            Message::BlockGen(m) => m.write_to(w).expect("write to Vec"),
            Message::BlockVote(m) => m.write_to(w).expect("write to Vec"),
            Message::Transaction(m) => {
                m.transaction.write_to(w).expect("write to Vec");
                write_u8(w, m.signatures.len() as u8).expect("write to Vec");
                for sig in &m.signatures {
                    sig.write_to(w).expect("write to Vec");
                }
            }
            Message::BlockRequest { height } => write_u32(w, *height).expect("write to Vec"),
            Message::ChainData(cd) => cd.write_to(w).expect("write to Vec"),
            Message::StatusPing {
                height,
                last_hash,
                timestamp,
            } => {
                write_u32(w, *height).expect("write to Vec");
                last_hash.write_to(w).expect("write to Vec");
                write_u64(w, *timestamp).expect("write to Vec");
            }
        }
        (self.type_id(), payload)
    }

    /// Decode from a `(type, payload)` frame.
    pub fn from_frame(type_id: u64, payload: &[u8]) -> io::Result<Self> {
        let mut r = io::Cursor::new(payload);
        match type_id {
            MSG_ROUND_VOTE => Ok(Message::RoundVote(RoundVoteMessage::read_from(&mut r)?)),
            MSG_ROUND_VOTE_ACK => Ok(Message::RoundVoteAck(RoundVoteAckMessage::read_from(
                &mut r,
            )?)),
            MSG_BLOCK_GEN => Ok(Message::BlockGen(BlockGenMessage::read_from(&mut r)?)),
            MSG_BLOCK_VOTE => Ok(Message::BlockVote(BlockVoteMessage::read_from(&mut r)?)),
            MSG_TRANSACTION => {
                let transaction = Transaction::read_from(&mut r)?;
                let count = read_u8(&mut r)? as usize;
                let mut signatures = Vec::with_capacity(count);
                for _ in 0..count {
                    signatures.push(Signature::read_from(&mut r)?);
                }
                Ok(Message::Transaction(TransactionMessage {
                    transaction,
                    signatures,
                }))
            }
            MSG_BLOCK_REQUEST => Ok(Message::BlockRequest {
                height: read_u32(&mut r)?,
            }),
            MSG_CHAIN_DATA => Ok(Message::ChainData(ChainData::read_from(&mut r)?)),
            MSG_STATUS_PING => Ok(Message::StatusPing {
                height: read_u32(&mut r)?,
                last_hash: Hash256::read_from(&mut r)?,
                timestamp: read_u64(&mut r)?,
            }),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message type {other}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::KeyPair;

    fn sample_vote(n: u64, timeout_count: u32) -> RoundVote {
        RoundVote {
            chain_coord: Coordinate::new(0, 0),
            last_hash: fornax_types::double_hash(b"last"),
            vote_target_height: 5,
            timeout_count,
            formulator: Address::with_coordinate(Coordinate::new(0, 0), n),
            formulator_public_hash: PublicHash::default(),
            timestamp: 1,
            is_reply: false,
        }
    }

    #[test]
    fn signed_message_sender_round_trip() {
        let key = KeyPair::generate();
        let vote = sample_vote(1, 0);
        let msg = RoundVoteMessage {
            signature: key.sign(&vote.hash()).unwrap(),
            round_vote: vote,
        };
        assert_eq!(msg.sender().unwrap(), key.public_hash());

        let decoded = RoundVoteMessage::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn consensus_order_is_total_and_antisymmetric() {
        let a = sample_vote(1, 0);
        let b = sample_vote(2, 0);
        let c = sample_vote(1, 1);
        assert_eq!(a.cmp_consensus(&b), b.cmp_consensus(&a).reverse());
        // Lower timeout count sorts first regardless of address.
        assert_eq!(b.cmp_consensus(&c), Ordering::Less);
        assert_eq!(a.cmp_consensus(&a), Ordering::Equal);
    }

    #[test]
    fn frame_round_trip() {
        let key = KeyPair::generate();
        let vote = sample_vote(1, 0);
        let msg = Message::RoundVote(RoundVoteMessage {
            signature: key.sign(&vote.hash()).unwrap(),
            round_vote: vote,
        });
        let (type_id, payload) = msg.to_frame();
        assert_eq!(type_id, MSG_ROUND_VOTE);
        let decoded = Message::from_frame(type_id, &payload).unwrap();
        assert!(matches!(decoded, Message::RoundVote(_)));

        let status = Message::StatusPing {
            height: 4,
            last_hash: fornax_types::double_hash(b"h"),
            timestamp: 99,
        };
        let (type_id, payload) = status.to_frame();
        let decoded = Message::from_frame(type_id, &payload).unwrap();
        assert!(
            matches!(decoded, Message::StatusPing { height: 4, timestamp: 99, .. })
        );
    }
}
