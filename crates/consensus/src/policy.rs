//! Chain-wide consensus policy.

use fornax_types::{read_u32, write_u32, Amount, Codec, Coordinate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{self, Read, Write};

/// The economic and rotation parameters of one chain.
///
/// The policy is part of the genesis hash preimage, so two nodes with
/// different policies can never agree on a chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    /// Reward efficiency per formulation type, in thousandths.
    pub alpha_efficiency_1000: u32,
    pub sigma_efficiency_1000: u32,
    pub omega_efficiency_1000: u32,
    pub hyper_efficiency_1000: u32,
    /// Staked-balance efficiency for hyper formulators, in thousandths.
    pub staking_efficiency_1000: u32,
    pub reward_per_block: Amount,
    pub pay_reward_every_blocks: u32,
    /// Deposit charged by CreateFormulation and refunded on revoke.
    pub formulation_cost: Amount,
    /// Consecutive blocks one formulator produces before rotation.
    pub max_blocks_per_formulator: u32,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            alpha_efficiency_1000: 1000,
            sigma_efficiency_1000: 1150,
            omega_efficiency_1000: 1300,
            hyper_efficiency_1000: 1300,
            staking_efficiency_1000: 700,
            reward_per_block: Amount(fornax_types::COIN / 2),
            pay_reward_every_blocks: 500,
            formulation_cost: Amount::coins(200_000),
            max_blocks_per_formulator: 10,
        }
    }
}

impl Codec for ConsensusPolicy {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.alpha_efficiency_1000)?;
        write_u32(w, self.sigma_efficiency_1000)?;
        write_u32(w, self.omega_efficiency_1000)?;
        write_u32(w, self.hyper_efficiency_1000)?;
        write_u32(w, self.staking_efficiency_1000)?;
        self.reward_per_block.write_to(w)?;
        write_u32(w, self.pay_reward_every_blocks)?;
        self.formulation_cost.write_to(w)?;
        write_u32(w, self.max_blocks_per_formulator)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            alpha_efficiency_1000: read_u32(r)?,
            sigma_efficiency_1000: read_u32(r)?,
            omega_efficiency_1000: read_u32(r)?,
            hyper_efficiency_1000: read_u32(r)?,
            staking_efficiency_1000: read_u32(r)?,
            reward_per_block: Amount::read_from(r)?,
            pay_reward_every_blocks: read_u32(r)?,
            formulation_cost: Amount::read_from(r)?,
            max_blocks_per_formulator: read_u32(r)?,
        })
    }
}

/// Explicit (chain-coord → policy) lookup, passed to the kernel as a
/// dependency instead of living in process-global state.
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    policies: HashMap<Coordinate, ConsensusPolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, chain_coord: Coordinate, policy: ConsensusPolicy) -> Self {
        self.policies.insert(chain_coord, policy);
        self
    }

    pub fn register(&mut self, chain_coord: Coordinate, policy: ConsensusPolicy) {
        self.policies.insert(chain_coord, policy);
    }

    pub fn get(&self, chain_coord: Coordinate) -> Option<&ConsensusPolicy> {
        self.policies.get(&chain_coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip() {
        let policy = ConsensusPolicy::default();
        let decoded = ConsensusPolicy::from_bytes(&policy.to_bytes()).unwrap();
        assert_eq!(decoded, policy);
    }

    #[test]
    fn table_lookup() {
        let coord = Coordinate::new(0, 0);
        let table = PolicyTable::new().with_policy(coord, ConsensusPolicy::default());
        assert!(table.get(coord).is_some());
        assert!(table.get(Coordinate::new(1, 0)).is_none());
    }
}
