//! Account variants.
//!
//! Accounts are a closed set of tagged variants rather than a dynamic
//! registry; the tag byte leads the canonical serialization so stored
//! account records are self-describing.

use crate::error::LedgerError;
use fornax_types::{
    read_string, read_u8, write_string, write_u8, Address, Amount, Codec, PublicHash,
};
use std::io::{self, Read, Write};

/// Account type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AccountType {
    Key = 1,
    MultiSig = 2,
    Formulation = 3,
}

impl AccountType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Key),
            2 => Some(Self::MultiSig),
            3 => Some(Self::Formulation),
            _ => None,
        }
    }
}

/// Formulation sub-tag, ordered by weight class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FormulationType {
    Alpha = 1,
    Sigma = 2,
    Omega = 3,
    Hyper = 4,
}

impl FormulationType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Alpha),
            2 => Some(Self::Sigma),
            3 => Some(Self::Omega),
            4 => Some(Self::Hyper),
            _ => None,
        }
    }
}

/// A single-key account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyAccount {
    pub address: Address,
    pub name: String,
    pub balance: Amount,
    pub key_hash: PublicHash,
}

/// An m-of-n account.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiSigAccount {
    pub address: Address,
    pub name: String,
    pub balance: Amount,
    pub required: u8,
    pub key_hashes: Vec<PublicHash>,
}

/// A block-producer account, ranked by the consensus engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormulationAccount {
    pub address: Address,
    pub name: String,
    pub balance: Amount,
    pub formulation_type: FormulationType,
    pub key_hash: PublicHash,
    /// The formulation deposit, refunded on revocation.
    pub amount: Amount,
}

/// An account on the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Account {
    Key(KeyAccount),
    MultiSig(MultiSigAccount),
    Formulation(FormulationAccount),
}

impl Account {
    pub fn account_type(&self) -> AccountType {
        match self {
            Account::Key(_) => AccountType::Key,
            Account::MultiSig(_) => AccountType::MultiSig,
            Account::Formulation(_) => AccountType::Formulation,
        }
    }

    pub fn address(&self) -> Address {
        match self {
            Account::Key(a) => a.address,
            Account::MultiSig(a) => a.address,
            Account::Formulation(a) => a.address,
        }
    }

    /// The account name; empty when unnamed.
    pub fn name(&self) -> &str {
        match self {
            Account::Key(a) => &a.name,
            Account::MultiSig(a) => &a.name,
            Account::Formulation(a) => &a.name,
        }
    }

    pub fn balance(&self) -> Amount {
        match self {
            Account::Key(a) => a.balance,
            Account::MultiSig(a) => a.balance,
            Account::Formulation(a) => a.balance,
        }
    }

    pub fn add_balance(&mut self, amount: Amount) {
        let balance = self.balance_mut();
        *balance = *balance + amount;
    }

    pub fn sub_balance(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.balance_mut();
        *balance = balance
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance)?;
        Ok(())
    }

    fn balance_mut(&mut self) -> &mut Amount {
        match self {
            Account::Key(a) => &mut a.balance,
            Account::MultiSig(a) => &mut a.balance,
            Account::Formulation(a) => &mut a.balance,
        }
    }

    /// The key addresses allowed to sign for this account.
    pub fn key_hashes(&self) -> Vec<PublicHash> {
        match self {
            Account::Key(a) => vec![a.key_hash],
            Account::MultiSig(a) => a.key_hashes.clone(),
            Account::Formulation(a) => vec![a.key_hash],
        }
    }

    /// Validate recovered signers against this account's signature policy.
    pub fn validate_signers(&self, signers: &[PublicHash]) -> Result<(), LedgerError> {
        match self {
            Account::Key(a) => {
                if signers.len() != 1 {
                    return Err(LedgerError::InvalidSignerCount);
                }
                if signers[0] != a.key_hash {
                    return Err(LedgerError::InvalidAccountSigner);
                }
                Ok(())
            }
            Account::MultiSig(a) => {
                if signers.len() < a.required as usize {
                    return Err(LedgerError::InvalidSignerCount);
                }
                let mut matched = 0usize;
                for (i, signer) in signers.iter().enumerate() {
                    if signers[..i].contains(signer) {
                        return Err(LedgerError::InvalidAccountSigner);
                    }
                    if a.key_hashes.contains(signer) {
                        matched += 1;
                    }
                }
                if matched < a.required as usize {
                    return Err(LedgerError::InvalidSignerCount);
                }
                Ok(())
            }
            Account::Formulation(a) => {
                if signers.len() != 1 {
                    return Err(LedgerError::InvalidSignerCount);
                }
                if signers[0] != a.key_hash {
                    return Err(LedgerError::InvalidAccountSigner);
                }
                Ok(())
            }
        }
    }
}

impl Codec for Account {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u8(w, self.account_type() as u8)?;
        match self {
            Account::Key(a) => {
                a.address.write_to(w)?;
                write_string(w, &a.name)?;
                a.balance.write_to(w)?;
                a.key_hash.write_to(w)
            }
            Account::MultiSig(a) => {
                a.address.write_to(w)?;
                write_string(w, &a.name)?;
                a.balance.write_to(w)?;
                write_u8(w, a.required)?;
                write_u8(w, a.key_hashes.len() as u8)?;
                for kh in &a.key_hashes {
                    kh.write_to(w)?;
                }
                Ok(())
            }
            Account::Formulation(a) => {
                a.address.write_to(w)?;
                write_string(w, &a.name)?;
                a.balance.write_to(w)?;
                write_u8(w, a.formulation_type as u8)?;
                a.key_hash.write_to(w)?;
                a.amount.write_to(w)
            }
        }
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let tag = read_u8(r)?;
        let account_type = AccountType::from_tag(tag)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown account tag"))?;
        match account_type {
            AccountType::Key => Ok(Account::Key(KeyAccount {
                address: Address::read_from(r)?,
                name: read_string(r)?,
                balance: Amount::read_from(r)?,
                key_hash: PublicHash::read_from(r)?,
            })),
            AccountType::MultiSig => {
                let address = Address::read_from(r)?;
                let name = read_string(r)?;
                let balance = Amount::read_from(r)?;
                let required = read_u8(r)?;
                let count = read_u8(r)? as usize;
                let mut key_hashes = Vec::with_capacity(count);
                for _ in 0..count {
                    key_hashes.push(PublicHash::read_from(r)?);
                }
                Ok(Account::MultiSig(MultiSigAccount {
                    address,
                    name,
                    balance,
                    required,
                    key_hashes,
                }))
            }
            AccountType::Formulation => {
                let address = Address::read_from(r)?;
                let name = read_string(r)?;
                let balance = Amount::read_from(r)?;
                let type_tag = read_u8(r)?;
                let formulation_type = FormulationType::from_tag(type_tag).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "unknown formulation tag")
                })?;
                Ok(Account::Formulation(FormulationAccount {
                    address,
                    name,
                    balance,
                    formulation_type,
                    key_hash: PublicHash::read_from(r)?,
                    amount: Amount::read_from(r)?,
                }))
            }
        }
    }
}
