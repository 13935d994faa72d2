//! Legacy zerocoin denominations.

use crate::money::{Amount, COIN};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum Denomination {
    One,
    Five,
    Ten,
    Fifty,
    OneHundred,
    FiveHundred,
    OneThousand,
    FiveThousand,
}

impl Denomination {
    /// Denominations in accumulator checkpoint order.
    pub const ALL: [Denomination; 8] = [
        Denomination::One,
        Denomination::Five,
        Denomination::Ten,
        Denomination::Fifty,
        Denomination::OneHundred,
        Denomination::FiveHundred,
        Denomination::OneThousand,
        Denomination::FiveThousand,
    ];

    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|denom| denom.value() == value)
    }

    /// Face value in whole coins.
    pub const fn value(self) -> u32 {
        match self {
            Denomination::One => 1,
            Denomination::Five => 5,
            Denomination::Ten => 10,
            Denomination::Fifty => 50,
            Denomination::OneHundred => 100,
            Denomination::FiveHundred => 500,
            Denomination::OneThousand => 1_000,
            Denomination::FiveThousand => 5_000,
        }
    }

    pub const fn amount(self) -> Amount {
        self.value() as Amount * COIN
    }

    /// Index of this denomination's 32-bit slot inside an accumulator checkpoint.
    pub const fn position(self) -> u32 {
        match self {
            Denomination::One => 0,
            Denomination::Five => 1,
            Denomination::Ten => 2,
            Denomination::Fifty => 3,
            Denomination::OneHundred => 4,
            Denomination::FiveHundred => 5,
            Denomination::OneThousand => 6,
            Denomination::FiveThousand => 7,
        }
    }
}
