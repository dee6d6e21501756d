//! The transaction registry: decode, validate, execute.

use crate::account::{Account, FormulationAccount};
use crate::context::Context;
use crate::error::LedgerError;
use crate::loader::Loader;
use crate::transaction::{Transaction, TxKind};
use fornax_types::{Address, Amount, Codec, Coordinate, PublicHash, COIN};
use std::io::Read;

/// Per-type fees and the formulation deposit.
#[derive(Clone, Debug)]
pub struct TransactorConfig {
    pub transfer_fee: Amount,
    pub create_formulation_fee: Amount,
    pub revoke_fee: Amount,
    /// Deposit locked into a new formulation account, refunded on revoke.
    pub formulation_cost: Amount,
}

impl Default for TransactorConfig {
    fn default() -> Self {
        Self {
            transfer_fee: Amount(COIN / 10),
            create_formulation_fee: Amount(COIN / 10),
            revoke_fee: Amount(COIN / 10),
            formulation_cost: Amount::coins(200_000),
        }
    }
}

/// Dispatches the known transaction types.
///
/// `validate` runs against a plain loader and is safe for pool admission;
/// `execute` runs against a context under the snapshot discipline: on any
/// error every staged change of the transaction is reverted.
pub struct Transactor {
    chain_coord: Coordinate,
    config: TransactorConfig,
}

impl Transactor {
    pub fn new(chain_coord: Coordinate, config: TransactorConfig) -> Self {
        Self {
            chain_coord,
            config,
        }
    }

    pub fn chain_coord(&self) -> Coordinate {
        self.chain_coord
    }

    /// The flat fee of a transaction type.
    pub fn fee(&self, tx: &Transaction) -> Amount {
        match tx {
            Transaction::Transfer(_) => self.config.transfer_fee,
            Transaction::CreateFormulation(_) => self.config.create_formulation_fee,
            Transaction::RevokeFormulation(_) => self.config.revoke_fee,
        }
    }

    /// Decode a transaction and check it belongs to this chain.
    pub fn decode<R: Read>(&self, r: &mut R) -> Result<Transaction, LedgerError> {
        let tx = Transaction::read_from(r)?;
        if tx.chain_coord() != self.chain_coord {
            return Err(LedgerError::InvalidChainCoord);
        }
        Ok(tx)
    }

    /// Stateless-ish admission check against committed state.
    ///
    /// The sequence only has to be in the future here; the exact `seq + 1`
    /// check happens at execution, because the pool holds gaps.
    pub fn validate(
        &self,
        loader: &dyn Loader,
        tx: &Transaction,
        signers: &[PublicHash],
    ) -> Result<(), LedgerError> {
        if tx.chain_coord() != self.chain_coord {
            return Err(LedgerError::InvalidChainCoord);
        }
        match tx.kind() {
            TxKind::Account { from, seq } => {
                if seq <= loader.seq(from) {
                    return Err(LedgerError::InvalidSequence);
                }
                let from_account = loader.account(from)?;
                from_account.validate_signers(signers)?;
            }
            TxKind::Utxo { vins } => {
                for vin in vins {
                    if !loader.is_exist_utxo(vin.id())? {
                        return Err(LedgerError::NotExistUtxo);
                    }
                }
            }
        }
        match tx {
            Transaction::Transfer(transfer) => {
                if transfer.amount.is_zero() {
                    return Err(LedgerError::InvalidAmount);
                }
            }
            Transaction::CreateFormulation(create) => {
                if create.name.len() < 8 || create.name.len() > 16 {
                    return Err(LedgerError::InvalidAccountName);
                }
            }
            Transaction::RevokeFormulation(revoke) => {
                let target = loader.account(revoke.formulation_address)?;
                match &target {
                    Account::Formulation(_) => target.validate_signers(signers)?,
                    _ => return Err(LedgerError::InvalidAccountType),
                }
            }
        }
        Ok(())
    }

    /// Execute a transaction into the context at the given coordinate.
    pub fn execute(
        &self,
        ctx: &mut Context,
        tx: &Transaction,
        coord: Coordinate,
    ) -> Result<(), LedgerError> {
        let sn = ctx.snapshot();
        match self.execute_inner(ctx, tx, coord) {
            Ok(()) => {
                ctx.commit(sn);
                Ok(())
            }
            Err(e) => {
                ctx.revert(sn);
                Err(e)
            }
        }
    }

    fn execute_inner(
        &self,
        ctx: &mut Context,
        tx: &Transaction,
        coord: Coordinate,
    ) -> Result<(), LedgerError> {
        if tx.chain_coord() != ctx.chain_coord() {
            return Err(LedgerError::InvalidChainCoord);
        }
        let fee = self.fee(tx);
        if let TxKind::Account { from, seq } = tx.kind() {
            if seq != ctx.seq(from) + 1 {
                return Err(LedgerError::InvalidSequence);
            }
            ctx.add_seq(from);
            ctx.account_mut(from)?.sub_balance(fee)?;
        }
        match tx {
            Transaction::Transfer(transfer) => {
                if transfer.amount.is_zero() {
                    return Err(LedgerError::InvalidAmount);
                }
                ctx.account_mut(transfer.from)?
                    .sub_balance(transfer.amount)?;
                ctx.account_mut(transfer.to)?.add_balance(transfer.amount);
            }
            Transaction::CreateFormulation(create) => {
                if create.name.len() < 8 || create.name.len() > 16 {
                    return Err(LedgerError::InvalidAccountName);
                }
                ctx.account_mut(create.from)?
                    .sub_balance(self.config.formulation_cost)?;
                let address = Address::with_coordinate(coord, 0);
                ctx.create_account(Account::Formulation(FormulationAccount {
                    address,
                    name: create.name.clone(),
                    balance: Amount::ZERO,
                    formulation_type: create.formulation_type,
                    key_hash: create.key_hash,
                    amount: self.config.formulation_cost,
                }))?;
            }
            Transaction::RevokeFormulation(revoke) => {
                let target = ctx.account(revoke.formulation_address)?;
                let refund = match &target {
                    Account::Formulation(f) => f.balance + f.amount,
                    _ => return Err(LedgerError::InvalidAccountType),
                };
                ctx.delete_account(revoke.formulation_address)?;
                ctx.account_mut(revoke.from)?.add_balance(refund);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{FormulationType, KeyAccount};
    use fornax_types::{Hash256, KeyPair};
    use std::sync::Arc;

    struct Genesis {
        accounts: Vec<Account>,
    }

    impl Loader for Genesis {
        fn chain_coord(&self) -> Coordinate {
            Coordinate::new(0, 0)
        }
        fn target_height(&self) -> u32 {
            1
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
        fn utxo(&self, _id: u64) -> Result<crate::utxo::UTXO, LedgerError> {
            Err(LedgerError::NotExistUtxo)
        }
        fn is_exist_utxo(&self, _id: u64) -> Result<bool, LedgerError> {
            Ok(false)
        }
    }

    fn addr(n: u64) -> Address {
        Address::with_coordinate(Coordinate::new(0, 0), n)
    }

    fn setup(balance_a: u64) -> (Transactor, Context, KeyPair) {
        let key = KeyPair::generate();
        let genesis = Genesis {
            accounts: vec![
                Account::Key(KeyAccount {
                    address: addr(1),
                    name: "alice.main".into(),
                    balance: Amount::coins(balance_a),
                    key_hash: key.public_hash(),
                }),
                Account::Key(KeyAccount {
                    address: addr(2),
                    name: "bob.main".into(),
                    balance: Amount::ZERO,
                    key_hash: KeyPair::generate().public_hash(),
                }),
            ],
        };
        let config = TransactorConfig {
            transfer_fee: Amount::coins(1),
            ..TransactorConfig::default()
        };
        let transactor = Transactor::new(Coordinate::new(0, 0), config);
        let ctx = Context::new(Arc::new(genesis));
        (transactor, ctx, key)
    }

    fn transfer(seq: u64, amount: Amount) -> Transaction {
        Transaction::Transfer(crate::transaction::Transfer {
            chain_coord: Coordinate::new(0, 0),
            timestamp: 0,
            seq,
            from: addr(1),
            to: addr(2),
            amount,
        })
    }

    #[test]
    fn transfer_moves_amount_and_fee() {
        let (transactor, mut ctx, _) = setup(1000);
        transactor
            .execute(&mut ctx, &transfer(1, Amount::coins(100)), Coordinate::new(1, 0))
            .unwrap();
        assert_eq!(ctx.stack_size(), 1);
        assert_eq!(ctx.account(addr(1)).unwrap().balance(), Amount::coins(899));
        assert_eq!(ctx.account(addr(2)).unwrap().balance(), Amount::coins(100));
        assert_eq!(ctx.seq(addr(1)), 1);
    }

    #[test]
    fn wrong_sequence_is_rejected_and_reverted() {
        let (transactor, mut ctx, _) = setup(1000);
        let before = ctx.hash();
        let err = transactor
            .execute(&mut ctx, &transfer(5, Amount::coins(100)), Coordinate::new(1, 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidSequence));
        assert_eq!(ctx.hash(), before);
        assert_eq!(ctx.stack_size(), 1);
    }

    #[test]
    fn insufficient_balance_reverts_everything() {
        let (transactor, mut ctx, _) = setup(50);
        let before = ctx.hash();
        let err = transactor
            .execute(&mut ctx, &transfer(1, Amount::coins(100)), Coordinate::new(1, 0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance));
        // The fee debit and the sequence bump are rolled back with the rest.
        assert_eq!(ctx.hash(), before);
        assert_eq!(ctx.seq(addr(1)), 0);
    }

    #[test]
    fn validate_accepts_future_sequences_within_reason() {
        let (transactor, ctx, key) = setup(1000);
        let tx = transfer(3, Amount::coins(1));
        let signers = vec![key.public_hash()];
        assert!(transactor.validate(&ctx, &tx, &signers).is_ok());
        let stale = transfer(0, Amount::coins(1));
        assert!(matches!(
            transactor.validate(&ctx, &stale, &signers),
            Err(LedgerError::InvalidSequence)
        ));
    }

    #[test]
    fn create_and_revoke_formulation() {
        let (transactor, mut ctx, key) = setup(1_000_000);
        let formulation_key = KeyPair::generate().public_hash();
        let create = Transaction::CreateFormulation(crate::transaction::CreateFormulation {
            chain_coord: Coordinate::new(0, 0),
            timestamp: 0,
            seq: 1,
            from: addr(1),
            name: "formulator1".into(),
            formulation_type: FormulationType::Alpha,
            key_hash: formulation_key,
        });
        let coord = Coordinate::new(1, 0);
        transactor.execute(&mut ctx, &create, coord).unwrap();

        let formulation_addr = Address::with_coordinate(coord, 0);
        let created = ctx.account(formulation_addr).unwrap();
        assert!(matches!(created, Account::Formulation(_)));
        assert_eq!(ctx.address_by_name("formulator1").unwrap(), formulation_addr);

        let balance_after_create = ctx.account(addr(1)).unwrap().balance();
        let revoke = Transaction::RevokeFormulation(crate::transaction::RevokeFormulation {
            chain_coord: Coordinate::new(0, 0),
            timestamp: 0,
            seq: 2,
            from: addr(1),
            formulation_address: formulation_addr,
        });
        transactor.execute(&mut ctx, &revoke, Coordinate::new(1, 1)).unwrap();
        assert!(!ctx.is_exist_account(formulation_addr).unwrap());
        // Deposit refunded minus the revoke fee.
        let expected = balance_after_create + TransactorConfig::default().formulation_cost;
        let expected = expected
            .checked_sub(transactor.config.revoke_fee)
            .unwrap();
        assert_eq!(ctx.account(addr(1)).unwrap().balance(), expected);
        let _ = key;
    }
}
