//! Error types for fork database operations.

use rota_common::{BlockId, BlockNumber, BlockTimestamp};

/// Errors returned by [`ForkDatabase`](crate::ForkDatabase) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForkDatabaseError {
    /// The block's parent is not in the database.
    #[error("unlinkable block {id}: parent {parent} unknown")]
    UnlinkableBlock { id: BlockId, parent: BlockId },

    /// The block's number does not equal parent number + 1.
    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidBlockNumber { expected: BlockNumber, got: BlockNumber },

    /// The block is not later than its parent.
    #[error("block time {got} is not after parent time {parent}")]
    TimestampTooOld {
        parent: BlockTimestamp,
        got: BlockTimestamp,
    },

    /// The block is already in the database.
    #[error("block {id} already known")]
    AlreadyKnown { id: BlockId },

    /// A block id referenced by an operation is not in the database.
    #[error("block not in fork database: {id}")]
    NotFound { id: BlockId },

    /// Irreversibility can only move forward.
    #[error("cannot move root from {root} back to {requested}")]
    RootRegression {
        root: BlockNumber,
        requested: BlockNumber,
    },
}
