//! Errors reported by the chain controller

use rota_common::{AccountName, BlockId, BlockNumber, BlockTimestamp, TransactionError, TxId};
use rota_module_block_log::BlockLogError;
use rota_module_fork_database::ForkDatabaseError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("unlinkable block {id}: parent {parent} unknown")]
    UnlinkableBlock { id: BlockId, parent: BlockId },

    #[error("non-contiguous block log append: expected {expected}, got {got}")]
    NonContiguousAppend {
        expected: BlockNumber,
        got: BlockNumber,
    },

    #[error("block {number} produced by {got}, slot belongs to {expected}")]
    WrongProducer {
        number: BlockNumber,
        expected: AccountName,
        got: AccountName,
    },

    #[error("block time {block} is beyond local time {now} plus drift")]
    TimestampInFuture {
        block: BlockTimestamp,
        now: BlockTimestamp,
    },

    #[error("block time {got} is not after parent time {parent}")]
    TimestampTooOld {
        parent: BlockTimestamp,
        got: BlockTimestamp,
    },

    #[error("transaction {id} failed: {source}")]
    TransactionFailed {
        id: TxId,
        #[source]
        source: TransactionError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid block number: expected {expected}, got {got}")]
    InvalidBlockNumber {
        expected: BlockNumber,
        got: BlockNumber,
    },

    #[error("block time {0} is not on a slot boundary")]
    UnalignedTimestamp(BlockTimestamp),

    #[error("invalid block header: {0}")]
    InvalidHeader(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("corrupt chain data: {0}")]
    Corrupt(String),
}

impl From<ForkDatabaseError> for ChainError {
    fn from(error: ForkDatabaseError) -> Self {
        match error {
            ForkDatabaseError::UnlinkableBlock { id, parent } => {
                ChainError::UnlinkableBlock { id, parent }
            }
            ForkDatabaseError::InvalidBlockNumber { expected, got } => {
                ChainError::InvalidBlockNumber { expected, got }
            }
            ForkDatabaseError::TimestampTooOld { parent, got } => {
                ChainError::TimestampTooOld { parent, got }
            }
            ForkDatabaseError::NotFound { id } => ChainError::NotFound(format!("block {id}")),
            other => ChainError::Corrupt(other.to_string()),
        }
    }
}

impl From<BlockLogError> for ChainError {
    fn from(error: BlockLogError) -> Self {
        match error {
            BlockLogError::NonContiguousAppend { expected, got } => {
                ChainError::NonContiguousAppend { expected, got }
            }
            BlockLogError::NotFound(number) => ChainError::NotFound(format!("block {number}")),
            BlockLogError::Corrupt { .. } => ChainError::Corrupt(error.to_string()),
            BlockLogError::Storage(_) | BlockLogError::Io(_) => {
                ChainError::Storage(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_database_errors_keep_their_kind() {
        let id = rota_common::hash::blake2b_256(b"child");
        let parent = rota_common::hash::blake2b_256(b"parent");
        assert_eq!(
            ChainError::from(ForkDatabaseError::UnlinkableBlock { id, parent }),
            ChainError::UnlinkableBlock { id, parent }
        );
        assert!(matches!(
            ChainError::from(ForkDatabaseError::AlreadyKnown { id }),
            ChainError::Corrupt(_)
        ));
    }

    #[test]
    fn block_log_errors_keep_their_kind() {
        assert_eq!(
            ChainError::from(BlockLogError::NonContiguousAppend { expected: 4, got: 6 }),
            ChainError::NonContiguousAppend { expected: 4, got: 6 }
        );
        assert!(matches!(ChainError::from(BlockLogError::NotFound(9)), ChainError::NotFound(_)));
    }
}
