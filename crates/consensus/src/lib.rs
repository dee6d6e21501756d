//! Proof-of-formulation consensus ranking.
//!
//! The ranking engine keeps a deterministic, byzantine-resistant table of
//! block-producer candidates. Each candidate is a [`Rank`] ordered by
//! (phase, hash-space, address); the head of the table is the next expected
//! formulator. Producing a block advances the head's phase and re-seeds its
//! hash-space with the block hash; failing to produce (a round timeout)
//! advances the phase alone, demoting the head behind its peers.
//!
//! The engine is a pure function of (prior state, context data, header),
//! with no clocks and no randomness, so every honest node derives the
//! identical table from the identical chain.

mod engine;
mod policy;
mod rank;

pub use engine::RankingEngine;
pub use policy::{ConsensusPolicy, PolicyTable};
pub use rank::Rank;

use thiserror::Error;

/// Consensus-layer error kinds.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid phase")]
    InvalidPhase,
    #[error("exist address")]
    ExistAddress,
    #[error("insufficient candidate count")]
    InsufficientCandidates,
    #[error("exceed candidate count")]
    ExceedCandidateCount,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
