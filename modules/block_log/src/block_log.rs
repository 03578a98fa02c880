//! Rota block log
//! Append-only, ordered record of irreversible blocks. The only way history
//! changes is by truncating the tail.

pub mod stores;

use std::sync::Arc;

use config::Config;
use rota_common::configuration::BlockLogStore;
use rota_common::{Block, BlockId, BlockNumber};
use tracing::info;

pub use stores::fjall::FjallBlockLog;
pub use stores::memory::MemoryBlockLog;

#[derive(Debug, thiserror::Error)]
pub enum BlockLogError {
    /// Only `tip + 1`, linked to the tip, may be appended
    #[error("non-contiguous append: expected block {expected}, got {got}")]
    NonContiguousAppend {
        expected: BlockNumber,
        got: BlockNumber,
    },

    #[error("block {0} not in log")]
    NotFound(BlockNumber),

    #[error("block log storage: {0}")]
    Storage(#[from] fjall::Error),

    #[error("block log I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt block log entry {number}: {reason}")]
    Corrupt { number: BlockNumber, reason: String },
}

/// Lazy iterator over the log in block number order
pub type BlockLogIter<'a> = Box<dyn Iterator<Item = Result<Block, BlockLogError>> + 'a>;

pub trait BlockLog: Send {
    /// Append the block after the current tip
    fn append(&mut self, block: &Block) -> Result<(), BlockLogError>;

    /// Read a block by number
    fn read(&self, number: BlockNumber) -> Result<Block, BlockLogError>;

    /// Every block from number 1 up to the tip. Each call starts over.
    fn replay(&self) -> BlockLogIter<'_>;

    /// Drop every block above `after`
    fn truncate(&mut self, after: BlockNumber) -> Result<(), BlockLogError>;

    /// Number of the block with the given id, if logged
    fn number_of(&self, id: &BlockId) -> Result<Option<BlockNumber>, BlockLogError>;

    /// Number and id of the newest block
    fn tip(&self) -> Option<(BlockNumber, BlockId)>;

    /// Make appended blocks durable
    fn flush(&self) -> Result<(), BlockLogError>;

    fn contains(&self, id: &BlockId) -> Result<bool, BlockLogError> {
        Ok(self.number_of(id)?.is_some())
    }

    fn tip_number(&self) -> BlockNumber {
        self.tip().map(|(number, _)| number).unwrap_or(0)
    }

    fn is_empty(&self) -> bool {
        self.tip().is_none()
    }
}

/// Check an append against the tip; shared by the stores
pub(crate) fn check_append(
    tip: Option<(BlockNumber, BlockId)>,
    block: &Block,
) -> Result<(), BlockLogError> {
    let (expected, expected_previous) = match tip {
        Some((number, id)) => (number + 1, id),
        None => (1, BlockId::default()),
    };
    if block.number() != expected || block.previous() != expected_previous {
        return Err(BlockLogError::NonContiguousAppend {
            expected,
            got: block.number(),
        });
    }
    Ok(())
}

/// Open the block log named by `block-log.store`
pub fn open_block_log(config: Arc<Config>) -> anyhow::Result<Box<dyn BlockLog>> {
    let store = BlockLogStore::from_config(&config);
    info!("Opening {store} block log");
    Ok(match store {
        BlockLogStore::Fjall => Box::new(FjallBlockLog::new(config)?),
        BlockLogStore::Memory => Box::new(MemoryBlockLog::new()),
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_log_from_config() {
        let config = Config::builder().set_default("block-log.store", "memory").unwrap().build().unwrap();
        let mut log = open_block_log(Arc::new(config)).unwrap();
        assert!(log.is_empty());
        for block in test_blocks::chain(3) {
            log.append(&block).unwrap();
        }
        assert_eq!(log.tip_number(), 3);
    }

    #[test]
    fn append_must_link_to_tip() {
        let blocks = test_blocks::chain(3);
        assert!(check_append(None, &blocks[0]).is_ok());
        assert!(matches!(
            check_append(None, &blocks[1]),
            Err(BlockLogError::NonContiguousAppend {
                expected: 1,
                got: 2
            })
        ));
        let tip = Some((1, blocks[0].id()));
        assert!(check_append(tip, &blocks[1]).is_ok());
        // Right number, wrong parent
        let mut stray = blocks[1].clone();
        stray.header.previous = blocks[2].id();
        assert!(check_append(tip, &stray).is_err());
    }
}
