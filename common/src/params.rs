//! Chain parameters

use crate::types::PERCENT_100;
use config::Config;

/// Seconds per slot
pub const DEFAULT_BLOCK_INTERVAL_SECONDS: (&str, u64) = ("block-interval-seconds", 3);

/// Consecutive slots each producer owns before the schedule rotates
pub const DEFAULT_PRODUCER_REPETITIONS: (&str, u64) = ("producer-repetitions", 1);

/// Share of active producers that must have built on a block for it to become irreversible
pub const DEFAULT_IRREVERSIBLE_THRESHOLD_PERCENT: (&str, u64) =
    ("irreversible-threshold-percent", 7_000);

/// How far ahead of local time an inbound block may be
pub const DEFAULT_MAX_BLOCK_TIME_DRIFT_SECONDS: (&str, u64) = ("max-block-time-drift-seconds", 3);

/// Producers in a round
pub const PRODUCERS_PER_ROUND: usize = 21;

/// Width of the participation window
pub const PARTICIPATION_WINDOW: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    pub block_interval_seconds: u64,
    pub producer_repetitions: u64,
    pub irreversible_threshold_percent: u64,
    pub max_block_time_drift_seconds: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_interval_seconds: DEFAULT_BLOCK_INTERVAL_SECONDS.1,
            producer_repetitions: DEFAULT_PRODUCER_REPETITIONS.1,
            irreversible_threshold_percent: DEFAULT_IRREVERSIBLE_THRESHOLD_PERCENT.1,
            max_block_time_drift_seconds: DEFAULT_MAX_BLOCK_TIME_DRIFT_SECONDS.1,
        }
    }
}

impl ChainParams {
    pub fn from_config(config: &Config) -> Self {
        let get = |(key, default): (&str, u64)| -> u64 {
            config.get_int(key).ok().and_then(|v| u64::try_from(v).ok()).unwrap_or(default)
        };

        Self {
            block_interval_seconds: get(DEFAULT_BLOCK_INTERVAL_SECONDS).max(1),
            producer_repetitions: get(DEFAULT_PRODUCER_REPETITIONS).max(1),
            irreversible_threshold_percent: get(DEFAULT_IRREVERSIBLE_THRESHOLD_PERCENT)
                .min(PERCENT_100),
            max_block_time_drift_seconds: get(DEFAULT_MAX_BLOCK_TIME_DRIFT_SECONDS),
        }
    }

    /// Index into the ascending list of producers' last blocks that gives the LIB
    pub fn irreversible_offset(&self, producer_count: usize) -> usize {
        let n = producer_count as u64;
        ((n * (PERCENT_100 - self.irreversible_threshold_percent)) / PERCENT_100) as usize
    }

    /// Slots in a round for a schedule of `producer_count` producers
    pub fn blocks_per_round(&self, producer_count: usize) -> u64 {
        producer_count as u64 * self.producer_repetitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let params = ChainParams::default();
        assert_eq!(params.block_interval_seconds, 3);
        assert_eq!(params.irreversible_offset(PRODUCERS_PER_ROUND), 6);
        assert_eq!(params.blocks_per_round(PRODUCERS_PER_ROUND), 21);
    }

    #[test]
    fn from_config_overrides() {
        let config = Config::builder()
            .set_default("block-interval-seconds", 5)
            .unwrap()
            .set_default("producer-repetitions", 2)
            .unwrap()
            .build()
            .unwrap();
        let params = ChainParams::from_config(&config);
        assert_eq!(params.block_interval_seconds, 5);
        assert_eq!(params.producer_repetitions, 2);
        assert_eq!(params.irreversible_threshold_percent, 7_000);
        assert_eq!(params.blocks_per_round(21), 42);
    }

    #[test]
    fn lib_offset_for_small_sets() {
        let params = ChainParams::default();
        assert_eq!(params.irreversible_offset(1), 0);
        assert_eq!(params.irreversible_offset(4), 1);
    }
}
