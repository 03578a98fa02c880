//! Rota global types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Height of a block; the first produced block is 1, genesis is 0
pub type BlockNumber = u64;

/// Absolute slot counter since genesis
pub type AbsoluteSlot = u64;

/// Basis points: 10_000 is 100%
pub const PERCENT_100: u64 = 10_000;

const NAME_CHARMAP: &str = ".abcdefghijklmnopqrstuvwxyz12345";
const NAME_MAX_LENGTH: usize = 13;
/// The last of 13 characters only has four bits
const NAME_LAST_CHARMAP: &str = ".abcdefghijklmno";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountNameError {
    #[error("account name is empty")]
    Empty,

    #[error("account name '{0}' is longer than {NAME_MAX_LENGTH} characters")]
    TooLong(String),

    #[error("account name '{name}' contains invalid character '{c}'")]
    InvalidCharacter { name: String, c: char },

    #[error("account name '{name}' cannot end in '{c}' at full length")]
    InvalidLastCharacter { name: String, c: char },

    #[error("account name '{0}' ends with '.'")]
    TrailingDot(String),
}

/// Name of an account or producer.
///
/// Up to 13 characters from `.a-z1-5`, not ending in a dot. A 13th
/// character must be one of `.a-o`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountName(String);

impl AccountName {
    pub fn new(name: &str) -> Result<Self, AccountNameError> {
        if name.is_empty() {
            return Err(AccountNameError::Empty);
        }
        if name.len() > NAME_MAX_LENGTH {
            return Err(AccountNameError::TooLong(name.to_string()));
        }
        if let Some(c) = name.chars().find(|c| !NAME_CHARMAP.contains(*c)) {
            return Err(AccountNameError::InvalidCharacter {
                name: name.to_string(),
                c,
            });
        }
        if let Some(c) = name.chars().nth(NAME_MAX_LENGTH - 1) {
            if !NAME_LAST_CHARMAP.contains(c) {
                return Err(AccountNameError::InvalidLastCharacter {
                    name: name.to_string(),
                    c,
                });
            }
        }
        if name.ends_with('.') {
            return Err(AccountNameError::TrailingDot(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountName {
    type Err = AccountNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountName({})", self.0)
    }
}

impl Serialize for AccountName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::new(&s).map_err(serde::de::Error::custom)
    }
}

impl<C> minicbor::Encode<C> for AccountName {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'a, C> minicbor::Decode<'a, C> for AccountName {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        let s = d.str()?;
        Self::new(s).map_err(|_| minicbor::decode::Error::message("Invalid account name"))
    }
}

/// Block time in whole seconds since the Unix epoch.
///
/// Always a multiple of the block interval once it appears in a block header.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockTimestamp(pub u64);

impl BlockTimestamp {
    pub fn seconds(&self) -> u64 {
        self.0
    }

    /// Seconds-resolution ISO 8601 rendering, e.g. `2017-07-14T02:40:00`
    pub fn to_iso_string(&self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string())
            .unwrap_or_else(|| self.0.to_string())
    }
}

impl fmt::Display for BlockTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso_string())
    }
}

impl<C> minicbor::Encode<C> for BlockTimestamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _ctx: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.u64(self.0)?.ok()
    }
}

impl<'a, C> minicbor::Decode<'a, C> for BlockTimestamp {
    fn decode(
        d: &mut minicbor::Decoder<'a>,
        _ctx: &mut C,
    ) -> Result<Self, minicbor::decode::Error> {
        Ok(Self(d.u64()?))
    }
}

/// Production record of one producer, keyed by its name in the chain state
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerRecord {
    pub total_produced: u64,
    pub total_missed: u64,

    /// Number of the last block this producer produced, 0 if none
    pub last_confirmed_block_num: BlockNumber,

    /// Absolute slot of that block
    pub last_absolute_slot: AbsoluteSlot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_names() {
        assert_eq!(AccountName::new("temp").unwrap().to_string(), "temp");
        assert_eq!(AccountName::new("temp.temp").unwrap().as_str(), "temp.temp");
        assert_eq!(AccountName::new(""), Err(AccountNameError::Empty));
        assert!(matches!(
            AccountName::new("abcdefghijklmn"),
            Err(AccountNameError::TooLong(_))
        ));
        assert!(matches!(
            AccountName::new("Inita"),
            Err(AccountNameError::InvalidCharacter { c: 'I', .. })
        ));
        assert!(matches!(AccountName::new("init6"), Err(AccountNameError::InvalidCharacter { .. })));
        assert!(matches!(AccountName::new("inita."), Err(AccountNameError::TrailingDot(_))));

        assert!(AccountName::new("aaaaaaaaaaaao").is_ok());
        assert!(AccountName::new("aaaaaaaaaaaz").is_ok());
        assert!(matches!(
            AccountName::new("aaaaaaaaaaaaz"),
            Err(AccountNameError::InvalidLastCharacter { c: 'z', .. })
        ));
        assert!(matches!(
            AccountName::new("aaaaaaaaaaaa1"),
            Err(AccountNameError::InvalidLastCharacter { c: '1', .. })
        ));
    }

    #[test]
    fn account_name_cbor_and_json() {
        let name: AccountName = "newguy".parse().unwrap();
        let bytes = minicbor::to_vec(&name).unwrap();
        let decoded: AccountName = minicbor::decode(&bytes).unwrap();
        assert_eq!(decoded, name);

        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"newguy\"");
        assert!(serde_json::from_str::<AccountName>("\"NEWGUY\"").is_err());
    }

    #[test]
    fn timestamp_iso() {
        assert_eq!(BlockTimestamp(1_500_000_000).to_iso_string(), "2017-07-14T02:40:00");
    }
}
