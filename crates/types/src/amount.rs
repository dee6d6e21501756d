//! Coin amounts.

use crate::codec::Codec;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Add;

/// Fractional units per coin.
pub const COIN: u128 = 1_000_000_000_000_000_000;

/// A non-negative coin amount in fractional units.
///
/// Addition saturates (the supply cannot approach u128::MAX); subtraction is
/// checked so that balance underflows surface as ledger errors rather than
/// silent wraps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Amount(pub u128);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Whole coins.
    pub const fn coins(n: u64) -> Self {
        Amount(n as u128 * COIN)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Multiply by an integer constant (reward ratio arithmetic).
    pub fn mul_c(self, c: u64) -> Amount {
        Amount(self.0.saturating_mul(c as u128))
    }

    /// Divide by an integer constant (reward ratio arithmetic).
    pub fn div_c(self, c: u64) -> Amount {
        Amount(self.0 / c as u128)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / COIN;
        let frac = self.0 % COIN;
        if frac == 0 {
            write!(f, "{whole}")
        } else {
            write!(f, "{whole}.{:018}", frac)
        }
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({self})")
    }
}

impl Codec for Amount {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u128::<LittleEndian>(self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Amount(r.read_u128::<LittleEndian>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_sub_underflow() {
        assert_eq!(Amount::coins(1).checked_sub(Amount::coins(2)), None);
        assert_eq!(
            Amount::coins(2).checked_sub(Amount::coins(1)),
            Some(Amount::coins(1))
        );
    }

    #[test]
    fn ratio_arithmetic() {
        // 60% of 10 coins
        let p = Amount::coins(10).mul_c(600).div_c(1000);
        assert_eq!(p, Amount::coins(6));
    }

    #[test]
    fn display_formats_fractions() {
        assert_eq!(Amount::coins(5).to_string(), "5");
        assert_eq!(Amount(COIN / 2).to_string(), "0.500000000000000000");
    }

    #[test]
    fn codec_round_trip() {
        let a = Amount(123_456_789_000);
        assert_eq!(Amount::from_bytes(&a.to_bytes()).unwrap(), a);
    }
}
