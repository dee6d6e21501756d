//! Reward accumulation and payout.
//!
//! Every committed block credits its formulator with reward power weighted
//! by the formulation type; hyper formulators additionally collect power
//! for their stakers. Accumulated power is paid out pro-rata every
//! `pay_reward_every_blocks` blocks. Reward state is persisted alongside
//! each block under the `"reward"` custom-data key.

mod rewarder;
mod staking;

pub use rewarder::{Rewarder, StandardRewarder};
pub use staking::{address_from_staking_key, auto_staking_key, staking_key, TAG_STAKING};

use thiserror::Error;

/// Reward-layer error kinds.
#[derive(Debug, Error)]
pub enum RewardError {
    #[error("invalid account type")]
    InvalidAccountType,
    #[error("invalid staking address")]
    InvalidStakingAddress,
    #[error(transparent)]
    Ledger(#[from] fornax_ledger::LedgerError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
