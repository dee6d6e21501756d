//! The observer voting protocol.
//!
//! A fixed quorum of observers finalizes every block through three phases:
//!
//! 1. **RoundVote**: observers agree on who formulates the next block
//! 2. **RoundVoteAck**: observers confirm the agreed round
//! 3. **BlockVote**: observers validate the produced block and sign it
//!
//! [`ObserverState`] is a synchronous state machine: the runner feeds it
//! [`ObserverEvent`]s (authenticated mesh messages and the round timer) and
//! executes the returned [`ObserverAction`]s. All I/O lives in the runner;
//! determinism lives here. Min-selection over votes is totally ordered, so
//! any two honest observers that saw a majority of the same votes pick the
//! identical round regardless of arrival order.

mod messages;
mod round;
mod runner;
mod state;

pub use messages::{
    BlockGenMessage, BlockVote, BlockVoteMessage, Message, RoundVote, RoundVoteAck,
    RoundVoteAckMessage, RoundVoteMessage, MSG_BLOCK_GEN, MSG_BLOCK_REQUEST, MSG_BLOCK_VOTE,
    MSG_CHAIN_DATA, MSG_ROUND_VOTE, MSG_ROUND_VOTE_ACK, MSG_STATUS_PING, MSG_TRANSACTION,
};
pub use round::{BlockRound, RoundState, VoteRound};
pub use runner::ObserverNode;
pub use state::{ObserverAction, ObserverConfig, ObserverEvent, ObserverState};

use thiserror::Error;

/// Observer-layer error kinds. Failures on inbound messages are logged and
/// dropped by the state machine; these surface mostly in tests.
#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("not allowed public hash")]
    NotAllowedPublicHash,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("invalid vote")]
    InvalidVote,
    #[error("invalid round state")]
    InvalidRoundState,
    #[error(transparent)]
    Kernel(#[from] fornax_kernel::KernelError),
    #[error(transparent)]
    Crypto(#[from] fornax_types::CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
