//! Genesis state: starting time, initial producers and balances

use crate::types::{AccountName, BlockTimestamp};
use anyhow::{bail, Result};
use config::Config;

const DEFAULT_INITIAL_TIMESTAMP: (&str, u64) = ("genesis.initial-timestamp", 1_500_000_000);
const DEFAULT_INITIAL_BALANCE: (&str, u64) = ("genesis.initial-balance", 100_000);
const CONFIG_KEY_PRODUCERS: &str = "genesis.producers";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisState {
    pub initial_timestamp: BlockTimestamp,
    pub producers: Vec<AccountName>,
    pub initial_balances: Vec<(AccountName, u64)>,
}

impl Default for GenesisState {
    /// Twenty-one producers `inita` ... `initu`, each holding 100_000
    fn default() -> Self {
        let producers = default_producer_names();
        let initial_balances =
            producers.iter().map(|p| (p.clone(), DEFAULT_INITIAL_BALANCE.1)).collect();
        Self {
            initial_timestamp: BlockTimestamp(DEFAULT_INITIAL_TIMESTAMP.1),
            producers,
            initial_balances,
        }
    }
}

impl GenesisState {
    /// Read from `genesis.*`; the timestamp is aligned down to the block interval
    pub fn from_config(config: &Config, block_interval_seconds: u64) -> Result<Self> {
        let timestamp = config
            .get_int(DEFAULT_INITIAL_TIMESTAMP.0)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_INITIAL_TIMESTAMP.1);
        let interval = block_interval_seconds.max(1);
        let initial_timestamp = BlockTimestamp(timestamp - timestamp % interval);

        let producers = match config.get::<Vec<String>>(CONFIG_KEY_PRODUCERS) {
            Ok(names) => names
                .iter()
                .map(|n| AccountName::new(n))
                .collect::<Result<Vec<_>, _>>()?,
            Err(_) => default_producer_names(),
        };
        if producers.is_empty() {
            bail!("Genesis needs at least one producer");
        }

        let balance = config
            .get_int(DEFAULT_INITIAL_BALANCE.0)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_INITIAL_BALANCE.1);
        let initial_balances = producers.iter().map(|p| (p.clone(), balance)).collect();

        Ok(Self {
            initial_timestamp,
            producers,
            initial_balances,
        })
    }
}

fn default_producer_names() -> Vec<AccountName> {
    ('a'..='u')
        .filter_map(|c| AccountName::new(&format!("init{c}")).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::PRODUCERS_PER_ROUND;

    #[test]
    fn default_has_a_full_round() {
        let genesis = GenesisState::default();
        assert_eq!(genesis.producers.len(), PRODUCERS_PER_ROUND);
        assert_eq!(genesis.producers[0].as_str(), "inita");
        assert_eq!(genesis.producers[20].as_str(), "initu");
        assert!(genesis.initial_balances.iter().all(|(_, b)| *b == 100_000));
    }

    #[test]
    fn from_config_aligns_and_validates() {
        let config = Config::builder()
            .set_default("genesis.initial-timestamp", 1_000_000_001)
            .unwrap()
            .set_default("genesis.producers", vec!["alice", "bob"])
            .unwrap()
            .build()
            .unwrap();
        let genesis = GenesisState::from_config(&config, 3).unwrap();
        assert_eq!(genesis.initial_timestamp, BlockTimestamp(999_999_999));
        assert_eq!(genesis.producers.len(), 2);

        let bad = Config::builder()
            .set_default("genesis.producers", vec!["Alice"])
            .unwrap()
            .build()
            .unwrap();
        assert!(GenesisState::from_config(&bad, 3).is_err());
    }
}
