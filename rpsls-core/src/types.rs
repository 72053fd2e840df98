use crate::error::{Result, RpslsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use ethers::types::{Address, TxHash, U256};

/// Move code as stored by the wager contract. `Null` is the unset sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Weapon {
    #[default]
    Null = 0,
    Rock = 1,
    Paper = 2,
    Scissors = 3,
    Spock = 4,
    Lizard = 5,
}

impl Weapon {
    pub const PLAYABLE: [Weapon; 5] = [
        Weapon::Rock,
        Weapon::Paper,
        Weapon::Scissors,
        Weapon::Spock,
        Weapon::Lizard,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_playable(self) -> bool {
        self != Weapon::Null
    }

    pub fn name(self) -> &'static str {
        match self {
            Weapon::Null => "Null",
            Weapon::Rock => "Rock",
            Weapon::Paper => "Paper",
            Weapon::Scissors => "Scissors",
            Weapon::Spock => "Spock",
            Weapon::Lizard => "Lizard",
        }
    }
}

impl TryFrom<u8> for Weapon {
    type Error = RpslsError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Weapon::Null),
            1 => Ok(Weapon::Rock),
            2 => Ok(Weapon::Paper),
            3 => Ok(Weapon::Scissors),
            4 => Ok(Weapon::Spock),
            5 => Ok(Weapon::Lizard),
            other => Err(RpslsError::InvalidMove(other)),
        }
    }
}

impl From<Weapon> for u8 {
    fn from(weapon: Weapon) -> u8 {
        weapon.code()
    }
}

impl fmt::Display for Weapon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Weapon {
    type Err = RpslsError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(code) = s.parse::<u8>() {
            return Weapon::try_from(code);
        }
        Weapon::PLAYABLE
            .into_iter()
            .find(|w| w.name().eq_ignore_ascii_case(s))
            .ok_or(RpslsError::InvalidMove(0))
    }
}

/// Outcome of a game as announced between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Winner {
    #[default]
    Null,
    Player1,
    Player2,
    Draw,
}

impl Winner {
    pub fn is_decided(self) -> bool {
        self != Winner::Null
    }
}

impl fmt::Display for Winner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Winner::Null => "Null",
            Winner::Player1 => "Player1",
            Winner::Player2 => "Player2",
            Winner::Draw => "Draw",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Player1,
    Player2,
}

impl Role {
    pub fn opponent(self) -> Role {
        match self {
            Role::Player1 => Role::Player2,
            Role::Player2 => Role::Player1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Player1 => f.write_str("Player One"),
            Role::Player2 => f.write_str("Player Two"),
        }
    }
}

/// Parses a `0x`-prefixed 20-byte address. The prefix is mandatory.
pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| RpslsError::InvalidAddress(s.to_string()))?;
    Address::from_str(digits).map_err(|_| RpslsError::InvalidAddress(s.to_string()))
}

const ETHER_DECIMALS: usize = 18;

/// Amount in the chain's smallest unit; peers exchange it as a decimal ether string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Wei(pub U256);

impl Wei {
    pub const ZERO: Wei = Wei(U256([0; 4]));

    pub fn from_wei(wei: impl Into<U256>) -> Self {
        Self(wei.into())
    }

    pub fn as_wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_mul(self, factor: u64) -> Option<Wei> {
        self.0.checked_mul(U256::from(factor)).map(Wei)
    }

    /// Parses a decimal ether amount such as `"0.0001"` or `"2"`.
    ///
    /// Signs, exponents and digits past the 18th decimal are refused rather
    /// than rounded.
    pub fn parse_ether(input: &str) -> Result<Self> {
        let invalid = || RpslsError::InvalidAmount(input.to_string());
        let s = input.trim();
        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
            || fraction.len() > ETHER_DECIMALS
        {
            return Err(invalid());
        }

        ethers::utils::parse_ether(s).map(Wei).map_err(|_| invalid())
    }

    pub fn to_ether_string(&self) -> String {
        let formatted = ethers::utils::format_ether(self.0);
        match formatted.split_once('.') {
            Some((whole, fraction)) => match fraction.trim_end_matches('0') {
                "" => whole.to_string(),
                fraction => format!("{}.{}", whole, fraction),
            },
            None => formatted,
        }
    }
}

impl From<U256> for Wei {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ether_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_codes() {
        for (code, weapon) in Weapon::PLAYABLE.iter().enumerate() {
            assert_eq!(weapon.code() as usize, code + 1);
            assert_eq!(Weapon::try_from(weapon.code()).unwrap(), *weapon);
        }
        assert!(!Weapon::Null.is_playable());
        assert!(matches!(
            Weapon::try_from(6),
            Err(RpslsError::InvalidMove(6))
        ));
    }

    #[test]
    fn test_weapon_from_str() {
        assert_eq!("spock".parse::<Weapon>().unwrap(), Weapon::Spock);
        assert_eq!("3".parse::<Weapon>().unwrap(), Weapon::Scissors);
        assert!("dynamite".parse::<Weapon>().is_err());
    }

    #[test]
    fn test_address_parsing() {
        let address = parse_address("0x00000000000000000000000000000000000000aa").unwrap();
        assert_eq!(address, Address::from_low_u64_be(0xaa));
        assert_eq!(
            format!("{:?}", address),
            "0x00000000000000000000000000000000000000aa"
        );

        // the prefix is mandatory, as is the exact length
        assert!(parse_address("00000000000000000000000000000000000000aa").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xzz000000000000000000000000000000000000aa").is_err());
    }

    #[test]
    fn test_parse_ether() {
        let wei_per_ether = U256::exp10(18);
        assert_eq!(
            Wei::parse_ether("0.0001").unwrap(),
            Wei::from_wei(100_000_000_000_000u64)
        );
        assert_eq!(Wei::parse_ether("1").unwrap(), Wei(wei_per_ether));
        assert_eq!(
            Wei::parse_ether("1.5").unwrap(),
            Wei(wei_per_ether * 3 / 2)
        );
        assert_eq!(Wei::parse_ether(".25").unwrap(), Wei(wei_per_ether / 4));
        assert_eq!(Wei::parse_ether("0.000000000000000001").unwrap(), Wei::from_wei(1u64));

        assert!(Wei::parse_ether("").is_err());
        assert!(Wei::parse_ether(".").is_err());
        assert!(Wei::parse_ether("abc").is_err());
        assert!(Wei::parse_ether("-1").is_err());
        assert!(Wei::parse_ether("1e18").is_err());
        assert!(Wei::parse_ether("0.0000000000000000001").is_err());
    }

    #[test]
    fn test_amounts_beyond_128_bits() {
        let huge = Wei(U256::MAX);
        assert!(huge.checked_mul(2).is_none());
        assert_eq!(huge.to_ether_string().split('.').count(), 2);
        let round = Wei(U256::from(u128::MAX) * U256::exp10(18));
        assert_eq!(round.to_ether_string(), u128::MAX.to_string());
    }

    #[test]
    fn test_ether_string() {
        assert_eq!(Wei::from_wei(100_000_000_000_000u64).to_ether_string(), "0.0001");
        assert_eq!(Wei(U256::exp10(18) * 2).to_ether_string(), "2");
        assert_eq!(Wei::ZERO.to_ether_string(), "0");
        assert_eq!(
            Wei::parse_ether("12.3400").unwrap().to_ether_string(),
            "12.34"
        );
    }
}
