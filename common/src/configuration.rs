use config::Config;
use serde::Deserialize;
use std::fmt::{Display, Formatter, Result};

pub const CONFIG_KEY_BLOCK_LOG_STORE: &str = "block-log.store";

/// Backing store for the block log
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockLogStore {
    Fjall,
    Memory,
}

impl BlockLogStore {
    pub fn from_config(config: &Config) -> Self {
        config.get::<BlockLogStore>(CONFIG_KEY_BLOCK_LOG_STORE).unwrap_or(BlockLogStore::Fjall)
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, BlockLogStore::Fjall)
    }
}

impl Display for BlockLogStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            BlockLogStore::Fjall => write!(f, "fjall"),
            BlockLogStore::Memory => write!(f, "memory"),
        }
    }
}

pub fn get_bool_flag(config: &Config, key: (&str, bool)) -> bool {
    config.get_bool(key.0).unwrap_or(key.1)
}

pub fn get_string_flag(config: &Config, key: (&str, &str)) -> String {
    config.get_string(key.0).unwrap_or_else(|_| key.1.to_string())
}

pub fn get_u64_flag(config: &Config, key: (&str, u64)) -> u64 {
    config.get_int(key.0).ok().and_then(|v| u64::try_from(v).ok()).unwrap_or(key.1)
}
