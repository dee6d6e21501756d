//! Height-locked balances.

use fornax_types::{read_u32, write_u32, Address, Amount, Codec};
use std::io::{self, Read, Write};

/// An amount credited to `address` only when the chain reaches
/// `unlock_height`. Indexed twice in the store: by address and by height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockedBalance {
    pub address: Address,
    pub amount: Amount,
    pub unlock_height: u32,
}

impl Codec for LockedBalance {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.address.write_to(w)?;
        self.amount.write_to(w)?;
        write_u32(w, self.unlock_height)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            address: Address::read_from(r)?,
            amount: Amount::read_from(r)?,
            unlock_height: read_u32(r)?,
        })
    }
}
