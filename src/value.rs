// Bitcoin transaction builder library extending bitcoin functionality
// by LNP/BP Association (https://lnp-bp.org)
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

use std::fmt::{Debug, Display};

use bitcoin::Amount;

/// Representation of bitcoin amounts used by a transaction builder instance.
///
/// All arithmetics on amounts is checked; overflows are reported instead of
/// wrapping.
pub trait Value: Copy + Clone + Eq + Ord + Default + Debug + Display {
    /// Constructs amount from the number of satoshis
    fn from_sat(sat: u64) -> Self;

    /// Returns number of satoshis in the amount
    fn to_sat(self) -> u64;

    /// Checked addition
    fn checked_add(self, other: Self) -> Option<Self>;

    /// Checked subtraction
    fn checked_sub(self, other: Self) -> Option<Self>;
}

impl Value for u64 {
    #[inline]
    fn from_sat(sat: u64) -> Self { sat }

    #[inline]
    fn to_sat(self) -> u64 { self }

    #[inline]
    fn checked_add(self, other: Self) -> Option<Self> { u64::checked_add(self, other) }

    #[inline]
    fn checked_sub(self, other: Self) -> Option<Self> { u64::checked_sub(self, other) }
}

impl Value for Amount {
    #[inline]
    fn from_sat(sat: u64) -> Self { Amount::from_sat(sat) }

    #[inline]
    fn to_sat(self) -> u64 { Amount::to_sat(self) }

    #[inline]
    fn checked_add(self, other: Self) -> Option<Self> { Amount::checked_add(self, other) }

    #[inline]
    fn checked_sub(self, other: Self) -> Option<Self> { Amount::checked_sub(self, other) }
}

/// Sums amounts, returning `None` on overflow
pub fn checked_sum<V: Value>(values: impl IntoIterator<Item = V>) -> Option<V> {
    values
        .into_iter()
        .try_fold(V::from_sat(0), |acc, value| Value::checked_add(acc, value))
}
