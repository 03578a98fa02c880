//! Block representation within the fork database.

use std::sync::Arc;

use rota_common::{Block, BlockId, BlockNumber, BlockTimestamp};

/// Whether the chain controller has applied the block successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkNodeStatus {
    /// Linked structurally; transactions and schedule not yet checked.
    Unvalidated,
    /// Applied on top of its parent's state at least once.
    Validated,
}

/// A node in the fork database.
#[derive(Debug, Clone)]
pub struct ForkNode {
    /// Block id (identity key).
    pub id: BlockId,
    /// Block height.
    pub number: BlockNumber,
    /// Block time, copied out of the header.
    pub timestamp: BlockTimestamp,
    /// The block itself; `None` only for the genesis root.
    pub block: Option<Arc<Block>>,
    /// Parent id; `None` for the root.
    pub parent: Option<BlockId>,
    /// Child ids.
    pub children: Vec<BlockId>,
    pub status: ForkNodeStatus,
}

impl ForkNode {
    pub fn new(block: Arc<Block>, status: ForkNodeStatus) -> Self {
        Self {
            id: block.id(),
            number: block.number(),
            timestamp: block.timestamp(),
            parent: Some(block.previous()),
            block: Some(block),
            children: Vec::new(),
            status,
        }
    }

    /// Synthetic root standing in for the chain before block 1
    pub fn genesis(timestamp: BlockTimestamp) -> Self {
        Self {
            id: BlockId::default(),
            number: 0,
            timestamp,
            block: None,
            parent: None,
            children: Vec::new(),
            status: ForkNodeStatus::Validated,
        }
    }
}
