//! The standard power-map rewarder.

use crate::staking::{address_from_staking_key, auto_staking_key, staking_key, TAG_STAKING};
use crate::RewardError;
use fornax_consensus::ConsensusPolicy;
use fornax_ledger::{Account, Context, ContextData, FormulationType, LedgerError, Loader};
use fornax_types::{read_u32, write_u32, Address, Amount, Codec, COIN};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::debug;

/// Accumulates reward power per block and pays it out on schedule.
pub trait Rewarder: Send + Sync {
    /// Initialize from the genesis context. Returns the save blob.
    fn apply_genesis(&self, ctd: &ContextData) -> Result<Vec<u8>, RewardError>;

    /// Credit the block's formulator and run a payout when due.
    /// Returns the save blob persisted with the block.
    fn process_reward(&self, formulator: Address, ctx: &mut Context)
        -> Result<Vec<u8>, RewardError>;

    /// Restore accumulated state from a save blob.
    fn load_from_save_data(&self, data: &[u8]) -> Result<(), RewardError>;
}

#[derive(Default)]
struct RewardState {
    last_paid_height: u32,
    power_map: BTreeMap<Address, Amount>,
    /// hyper address → staker address → accumulated auto-staking power.
    staking_power_map: BTreeMap<Address, BTreeMap<Address, Amount>>,
}

impl RewardState {
    fn add_reward_power(&mut self, address: Address, power: Amount) {
        let entry = self.power_map.entry(address).or_insert(Amount::ZERO);
        *entry = *entry + power;
    }

    fn add_staking_power(&mut self, hyper: Address, staker: Address, power: Amount) {
        let entry = self
            .staking_power_map
            .entry(hyper)
            .or_default()
            .entry(staker)
            .or_insert(Amount::ZERO);
        *entry = *entry + power;
    }

    fn build_save_data(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32(&mut buf, self.last_paid_height).expect("write to Vec");
        write_u32(&mut buf, self.power_map.len() as u32).expect("write to Vec");
        for (addr, power) in &self.power_map {
            addr.write_to(&mut buf).expect("write to Vec");
            power.write_to(&mut buf).expect("write to Vec");
        }
        write_u32(&mut buf, self.staking_power_map.len() as u32).expect("write to Vec");
        for (hyper, stakers) in &self.staking_power_map {
            hyper.write_to(&mut buf).expect("write to Vec");
            write_u32(&mut buf, stakers.len() as u32).expect("write to Vec");
            for (staker, power) in stakers {
                staker.write_to(&mut buf).expect("write to Vec");
                power.write_to(&mut buf).expect("write to Vec");
            }
        }
        buf
    }
}

/// The standard rewarder: type-weighted power, staking pass-through for
/// hyper formulators, pro-rata payout every `pay_reward_every_blocks`.
pub struct StandardRewarder {
    policy: ConsensusPolicy,
    state: Mutex<RewardState>,
}

impl StandardRewarder {
    pub fn new(policy: ConsensusPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(RewardState::default()),
        }
    }

    fn accumulate(
        &self,
        state: &mut RewardState,
        formulator: Address,
        ctx: &mut Context,
    ) -> Result<(), RewardError> {
        let account = ctx.account(formulator)?;
        let Account::Formulation(f) = &account else {
            return Err(RewardError::InvalidAccountType);
        };
        match f.formulation_type {
            FormulationType::Alpha => state.add_reward_power(
                formulator,
                f.amount.mul_c(self.policy.alpha_efficiency_1000 as u64).div_c(1000),
            ),
            FormulationType::Sigma => state.add_reward_power(
                formulator,
                f.amount.mul_c(self.policy.sigma_efficiency_1000 as u64).div_c(1000),
            ),
            FormulationType::Omega => state.add_reward_power(
                formulator,
                f.amount.mul_c(self.policy.omega_efficiency_1000 as u64).div_c(1000),
            ),
            FormulationType::Hyper => {
                let mut power_sum = f
                    .amount
                    .mul_c(self.policy.hyper_efficiency_1000 as u64)
                    .div_c(1000);
                for key in ctx.account_data_keys(formulator, &TAG_STAKING)? {
                    let Some(staker) = address_from_staking_key(&key) else {
                        continue;
                    };
                    let staked = ctx
                        .account_data(formulator, &key)
                        .and_then(|bs| Amount::from_bytes(&bs).ok())
                        .ok_or(RewardError::InvalidStakingAddress)?;
                    match ctx.account(staker) {
                        Err(LedgerError::NotExistAccount) => {
                            state.power_map.remove(&staker);
                        }
                        Err(e) => return Err(e.into()),
                        Ok(_) => {
                            let staking_power = staked
                                .mul_c(self.policy.staking_efficiency_1000 as u64)
                                .div_c(1000);
                            let auto = ctx
                                .account_data(formulator, &auto_staking_key(staker))
                                .map(|bs| !bs.is_empty() && bs[0] == 1)
                                .unwrap_or(false);
                            if auto {
                                state.add_staking_power(formulator, staker, staking_power);
                                power_sum = power_sum + staking_power;
                            } else {
                                state.add_reward_power(staker, staking_power);
                            }
                        }
                    }
                }
                state.add_reward_power(formulator, power_sum);
            }
        }
        Ok(())
    }

    fn pay_out(&self, state: &mut RewardState, ctx: &mut Context) -> Result<(), RewardError> {
        let target_height = ctx.target_height();
        let mut total_power = Amount::ZERO;
        for power in state.power_map.values() {
            total_power = total_power + *power;
        }
        if total_power.is_zero() {
            state.last_paid_height = target_height;
            return Ok(());
        }
        let total_reward = self
            .policy
            .reward_per_block
            .mul_c((target_height - state.last_paid_height) as u64);
        // Fixed-point ratio with COIN precision.
        let ratio = Amount(total_reward.0.saturating_mul(COIN) / total_power.0);

        let power_map = std::mem::take(&mut state.power_map);
        for (address, power) in power_map {
            match ctx.account_mut(address) {
                Ok(account) => {
                    let payout = Amount(power.0.saturating_mul(ratio.0) / COIN);
                    account.add_balance(payout);
                }
                Err(LedgerError::NotExistAccount) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let staking_power_map = std::mem::take(&mut state.staking_power_map);
        for (hyper, stakers) in staking_power_map {
            for (staker, power) in stakers {
                let key = staking_key(staker);
                let staked = ctx
                    .account_data(hyper, &key)
                    .and_then(|bs| Amount::from_bytes(&bs).ok())
                    .ok_or(RewardError::InvalidStakingAddress)?;
                let payout = Amount(power.0.saturating_mul(ratio.0) / COIN);
                ctx.set_account_data(hyper, &key, (staked + payout).to_bytes());
            }
        }

        debug!(height = target_height, "reward payout complete");
        state.last_paid_height = target_height;
        Ok(())
    }
}

impl Rewarder for StandardRewarder {
    fn apply_genesis(&self, _ctd: &ContextData) -> Result<Vec<u8>, RewardError> {
        Ok(self.state.lock().build_save_data())
    }

    fn process_reward(
        &self,
        formulator: Address,
        ctx: &mut Context,
    ) -> Result<Vec<u8>, RewardError> {
        let mut state = self.state.lock();
        self.accumulate(&mut state, formulator, ctx)?;
        if ctx.target_height() >= state.last_paid_height + self.policy.pay_reward_every_blocks {
            self.pay_out(&mut state, ctx)?;
        }
        Ok(state.build_save_data())
    }

    fn load_from_save_data(&self, data: &[u8]) -> Result<(), RewardError> {
        let mut r = Cursor::new(data);
        let mut state = RewardState {
            last_paid_height: read_u32(&mut r)?,
            ..RewardState::default()
        };
        let count = read_u32(&mut r)? as usize;
        for _ in 0..count {
            let addr = Address::read_from(&mut r)?;
            let power = Amount::read_from(&mut r)?;
            state.power_map.insert(addr, power);
        }
        let hyper_count = read_u32(&mut r)? as usize;
        for _ in 0..hyper_count {
            let hyper = Address::read_from(&mut r)?;
            let staker_count = read_u32(&mut r)? as usize;
            let mut stakers = BTreeMap::new();
            for _ in 0..staker_count {
                let staker = Address::read_from(&mut r)?;
                let power = Amount::read_from(&mut r)?;
                stakers.insert(staker, power);
            }
            state.staking_power_map.insert(hyper, stakers);
        }
        *self.state.lock() = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_ledger::{FormulationAccount, KeyAccount};
    use fornax_types::{Coordinate, Hash256, KeyPair, PublicHash};
    use std::sync::Arc;

    struct FixedLoader {
        accounts: Vec<Account>,
        target_height: u32,
    }

    impl Loader for FixedLoader {
        fn chain_coord(&self) -> Coordinate {
            Coordinate::new(0, 0)
        }
        fn target_height(&self) -> u32 {
            self.target_height
        }
        fn last_hash(&self) -> Hash256 {
            Hash256::ZERO
        }
        fn seq(&self, _address: Address) -> u64 {
            0
        }
        fn account(&self, address: Address) -> Result<Account, LedgerError> {
            self.accounts
                .iter()
                .find(|a| a.address() == address)
                .cloned()
                .ok_or(LedgerError::NotExistAccount)
        }
        fn is_exist_account(&self, address: Address) -> Result<bool, LedgerError> {
            Ok(self.accounts.iter().any(|a| a.address() == address))
        }
        fn address_by_name(&self, name: &str) -> Result<Address, LedgerError> {
            self.accounts
                .iter()
                .find(|a| a.name() == name)
                .map(|a| a.address())
                .ok_or(LedgerError::NotExistAccount)
        }
        fn is_exist_account_name(&self, name: &str) -> Result<bool, LedgerError> {
            Ok(self.accounts.iter().any(|a| a.name() == name))
        }
        fn account_data(&self, _address: Address, _key: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn account_data_keys(
            &self,
            _address: Address,
            _prefix: &[u8],
        ) -> Result<Vec<Vec<u8>>, LedgerError> {
            Ok(vec![])
        }
        fn utxo(&self, _id: u64) -> Result<fornax_ledger::UTXO, LedgerError> {
            Err(LedgerError::NotExistUtxo)
        }
        fn is_exist_utxo(&self, _id: u64) -> Result<bool, LedgerError> {
            Ok(false)
        }
    }

    fn formulator(n: u64, formulation_type: FormulationType) -> Account {
        Account::Formulation(FormulationAccount {
            address: Address::with_coordinate(Coordinate::new(0, 0), n),
            name: format!("formulator{n}"),
            balance: Amount::ZERO,
            formulation_type,
            key_hash: KeyPair::generate().public_hash(),
            amount: Amount::coins(1000),
        })
    }

    fn test_policy() -> ConsensusPolicy {
        ConsensusPolicy {
            pay_reward_every_blocks: 2,
            reward_per_block: Amount::coins(10),
            ..ConsensusPolicy::default()
        }
    }

    #[test]
    fn alpha_power_accumulates_per_block() {
        let rewarder = StandardRewarder::new(test_policy());
        let acc = formulator(1, FormulationType::Alpha);
        let addr = acc.address();
        let loader = Arc::new(FixedLoader {
            accounts: vec![acc],
            target_height: 1,
        });
        let mut ctx = Context::new(loader);
        rewarder.process_reward(addr, &mut ctx).unwrap();
        let state = rewarder.state.lock();
        // 1000 coins at alpha efficiency 1000‰.
        assert_eq!(state.power_map.get(&addr), Some(&Amount::coins(1000)));
    }

    #[test]
    fn payout_credits_formulator_and_resets_power() {
        let rewarder = StandardRewarder::new(test_policy());
        let acc = formulator(1, FormulationType::Alpha);
        let addr = acc.address();
        let loader = Arc::new(FixedLoader {
            accounts: vec![acc],
            target_height: 2,
        });
        let mut ctx = Context::new(loader);
        // target_height(2) >= last_paid(0) + every(2): pays out this block.
        rewarder.process_reward(addr, &mut ctx).unwrap();

        // Sole power holder receives the full accumulated reward: 2 blocks' worth.
        assert_eq!(
            ctx.account(addr).unwrap().balance(),
            Amount::coins(20)
        );
        let state = rewarder.state.lock();
        assert!(state.power_map.is_empty());
        assert_eq!(state.last_paid_height, 2);
    }

    #[test]
    fn non_formulation_account_is_rejected() {
        let rewarder = StandardRewarder::new(test_policy());
        let acc = Account::Key(KeyAccount {
            address: Address::with_coordinate(Coordinate::new(0, 0), 1),
            name: String::new(),
            balance: Amount::ZERO,
            key_hash: PublicHash::default(),
        });
        let addr = acc.address();
        let mut ctx = Context::new(Arc::new(FixedLoader {
            accounts: vec![acc],
            target_height: 1,
        }));
        assert!(matches!(
            rewarder.process_reward(addr, &mut ctx),
            Err(RewardError::InvalidAccountType)
        ));
    }

    #[test]
    fn save_data_round_trip_with_staking_map() {
        let rewarder = StandardRewarder::new(test_policy());
        {
            let mut state = rewarder.state.lock();
            state.last_paid_height = 7;
            let a = Address::with_coordinate(Coordinate::new(0, 0), 1);
            let b = Address::with_coordinate(Coordinate::new(0, 0), 2);
            let c = Address::with_coordinate(Coordinate::new(0, 0), 3);
            state.add_reward_power(a, Amount::coins(5));
            state.add_staking_power(a, b, Amount::coins(2));
            state.add_staking_power(a, c, Amount::coins(3));
        }
        let blob = rewarder.state.lock().build_save_data();

        let restored = StandardRewarder::new(test_policy());
        restored.load_from_save_data(&blob).unwrap();
        let restored_state = restored.state.lock();
        let original_state = rewarder.state.lock();
        assert_eq!(restored_state.last_paid_height, 7);
        assert_eq!(restored_state.power_map, original_state.power_map);
        // The inner staking map restores every entry; the restore loop must
        // advance through multi-staker maps.
        assert_eq!(
            restored_state.staking_power_map,
            original_state.staking_power_map
        );
    }
}
