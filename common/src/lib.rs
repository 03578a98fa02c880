// Rota common library - main library exports

pub mod block;
pub mod configuration;
pub mod errors;
pub mod genesis;
pub mod hash;
pub mod messages;
pub mod object_store;
pub mod params;
pub mod state_history;
pub mod time;
pub mod types;

// Flattened re-exports
pub use self::block::{Action, Block, BlockHeader, Cycle, Transaction};
pub use self::errors::TransactionError;
pub use self::genesis::GenesisState;
pub use self::hash::{BlockId, Hash, TxId};
pub use self::params::ChainParams;
pub use self::types::*;
