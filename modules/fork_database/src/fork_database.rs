//! Fork database: the reversible part of the chain.
//!
//! An arena of blocks keyed by id, rooted at the last irreversible block.
//! Every stored block links to a parent already in the arena; orphans are
//! rejected, not buffered. The preferred head is the highest block, ties
//! going to the lowest block id so every node picks the same tip.
//!
//! Only structural checks happen here. Whether a block's transactions and
//! producer are acceptable is decided by the chain controller, which reports
//! back through [`ForkDatabase::mark_validated`] and [`ForkDatabase::remove`].

pub mod fork_error;
pub mod fork_node;

use std::collections::HashMap;
use std::sync::Arc;

use rota_common::{Block, BlockId, BlockNumber, BlockTimestamp};
use tracing::debug;

pub use fork_error::ForkDatabaseError;
pub use fork_node::{ForkNode, ForkNodeStatus};

/// The two sides of a fork, each ordered newest first and excluding the
/// common ancestor.
#[derive(Debug, Clone, Default)]
pub struct BranchPair {
    pub first: Vec<Arc<Block>>,
    pub second: Vec<Arc<Block>>,
    pub common_ancestor: BlockId,
    pub common_ancestor_number: BlockNumber,
}

pub struct ForkDatabase {
    /// All blocks keyed by id.
    blocks: HashMap<BlockId, ForkNode>,
    /// Last irreversible block.
    root: BlockId,
    /// Preferred tip.
    head: BlockId,
}

impl ForkDatabase {
    /// Create a database holding only `root`.
    pub fn new(root: ForkNode) -> Self {
        let id = root.id;
        let mut root = root;
        root.parent = None;
        root.children.clear();
        root.status = ForkNodeStatus::Validated;
        Self {
            blocks: HashMap::from([(id, root)]),
            root: id,
            head: id,
        }
    }

    /// Empty chain: the root is the synthetic genesis node
    pub fn with_genesis(timestamp: BlockTimestamp) -> Self {
        Self::new(ForkNode::genesis(timestamp))
    }

    /// Chain whose last irreversible block is `block`
    pub fn with_root_block(block: Arc<Block>) -> Self {
        Self::new(ForkNode::new(block, ForkNodeStatus::Validated))
    }

    pub fn root(&self) -> &ForkNode {
        &self.blocks[&self.root]
    }

    pub fn head(&self) -> &ForkNode {
        &self.blocks[&self.head]
    }

    pub fn get(&self, id: &BlockId) -> Option<&ForkNode> {
        self.blocks.get(id)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Arc<Block>> {
        self.blocks.get(id).and_then(|node| node.block.clone())
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Link a block under its parent.
    ///
    /// Returns the block id. The preferred head is updated if the new block
    /// beats it.
    pub fn insert(&mut self, block: Arc<Block>) -> Result<BlockId, ForkDatabaseError> {
        let id = block.id();
        if self.blocks.contains_key(&id) {
            return Err(ForkDatabaseError::AlreadyKnown { id });
        }

        let parent_id = block.previous();
        let parent = self.blocks.get(&parent_id).ok_or(ForkDatabaseError::UnlinkableBlock {
            id,
            parent: parent_id,
        })?;

        if block.number() != parent.number + 1 {
            return Err(ForkDatabaseError::InvalidBlockNumber {
                expected: parent.number + 1,
                got: block.number(),
            });
        }

        if block.timestamp() <= parent.timestamp {
            return Err(ForkDatabaseError::TimestampTooOld {
                parent: parent.timestamp,
                got: block.timestamp(),
            });
        }

        let node = ForkNode::new(block, ForkNodeStatus::Unvalidated);
        let number = node.number;
        self.blocks.insert(id, node);
        if let Some(parent) = self.blocks.get_mut(&parent_id) {
            parent.children.push(id);
        }

        let head = self.head();
        if Self::is_better(number, id, head.number, head.id) {
            self.head = id;
        }
        debug!(number, %id, "Inserted into fork database");

        Ok(id)
    }

    /// Record that the controller applied the block successfully.
    pub fn mark_validated(&mut self, id: &BlockId) -> Result<(), ForkDatabaseError> {
        let node = self.blocks.get_mut(id).ok_or(ForkDatabaseError::NotFound { id: *id })?;
        node.status = ForkNodeStatus::Validated;
        Ok(())
    }

    /// Remove a block and all its descendants.
    ///
    /// Returns every removed id. The root cannot be removed.
    pub fn remove(&mut self, id: &BlockId) -> Result<Vec<BlockId>, ForkDatabaseError> {
        if !self.blocks.contains_key(id) || *id == self.root {
            return Err(ForkDatabaseError::NotFound { id: *id });
        }

        let removed = self.collect_all_from(*id, true);

        if let Some(parent_id) = self.blocks.get(id).and_then(|b| b.parent) {
            if let Some(parent) = self.blocks.get_mut(&parent_id) {
                parent.children.retain(|h| h != id);
            }
        }
        for h in &removed {
            self.blocks.remove(h);
        }

        self.recompute_head();
        Ok(removed)
    }

    /// Find the common ancestor of two blocks by walking back from both.
    pub fn find_common_ancestor(
        &self,
        a: BlockId,
        b: BlockId,
    ) -> Result<BlockId, ForkDatabaseError> {
        let node_a = self.blocks.get(&a).ok_or(ForkDatabaseError::NotFound { id: a })?;
        let node_b = self.blocks.get(&b).ok_or(ForkDatabaseError::NotFound { id: b })?;

        let mut ha = a;
        let mut hb = b;
        let mut na = node_a.number;
        let mut nb = node_b.number;

        // Walk the higher block down to the same level
        while na > nb {
            ha = self.parent_of(ha)?;
            na -= 1;
        }
        while nb > na {
            hb = self.parent_of(hb)?;
            nb -= 1;
        }

        // Walk both up until they meet
        while ha != hb {
            ha = self.parent_of(ha)?;
            hb = self.parent_of(hb)?;
        }

        Ok(ha)
    }

    fn parent_of(&self, id: BlockId) -> Result<BlockId, ForkDatabaseError> {
        self.blocks.get(&id).and_then(|b| b.parent).ok_or(ForkDatabaseError::NotFound { id })
    }

    /// True if `id` is on the chain ending at `tip`.
    pub fn chain_contains(&self, id: &BlockId, tip: &BlockId) -> bool {
        let mut current = Some(*tip);
        while let Some(h) = current {
            if h == *id {
                return true;
            }
            current = self.blocks.get(&h).and_then(|b| b.parent);
        }
        false
    }

    /// Both branches from `first` and `second` back to their common ancestor.
    pub fn fetch_branch_from(
        &self,
        first: BlockId,
        second: BlockId,
    ) -> Result<BranchPair, ForkDatabaseError> {
        let ancestor = self.find_common_ancestor(first, second)?;
        let ancestor_number = self.blocks[&ancestor].number;
        Ok(BranchPair {
            first: self.collect_branch(first, ancestor)?,
            second: self.collect_branch(second, ancestor)?,
            common_ancestor: ancestor,
            common_ancestor_number: ancestor_number,
        })
    }

    /// Blocks from `tip` back to, but excluding, `ancestor`; newest first.
    fn collect_branch(
        &self,
        tip: BlockId,
        ancestor: BlockId,
    ) -> Result<Vec<Arc<Block>>, ForkDatabaseError> {
        let mut branch = Vec::new();
        let mut current = tip;
        while current != ancestor {
            let node = self.blocks.get(&current).ok_or(ForkDatabaseError::NotFound { id: current })?;
            let block = node.block.clone().ok_or(ForkDatabaseError::NotFound { id: current })?;
            branch.push(block);
            current = node.parent.ok_or(ForkDatabaseError::NotFound { id: current })?;
        }
        Ok(branch)
    }

    /// The block at `number` on the chain ending at `tip`.
    pub fn fetch_by_number(&self, tip: &BlockId, number: BlockNumber) -> Option<&ForkNode> {
        let mut current = self.blocks.get(tip);
        while let Some(node) = current {
            if node.number == number {
                return Some(node);
            }
            if node.number < number {
                return None;
            }
            current = node.parent.and_then(|p| self.blocks.get(&p));
        }
        None
    }

    /// Make `id` the new root.
    ///
    /// Returns the blocks that became irreversible, oldest first, and drops
    /// every branch that does not descend from the new root.
    pub fn mark_irreversible(
        &mut self,
        id: &BlockId,
    ) -> Result<Vec<Arc<Block>>, ForkDatabaseError> {
        let node = self.blocks.get(id).ok_or(ForkDatabaseError::NotFound { id: *id })?;
        if *id == self.root {
            return Ok(Vec::new());
        }
        let root_number = self.root().number;
        if node.number <= root_number {
            return Err(ForkDatabaseError::RootRegression {
                root: root_number,
                requested: node.number,
            });
        }
        if !self.chain_contains(&self.root, id) {
            return Err(ForkDatabaseError::NotFound { id: *id });
        }

        let mut newly_irreversible = self.collect_branch(*id, self.root)?;
        newly_irreversible.reverse();

        // Keep only the new root's subtree
        let keep = self.collect_all_from(*id, true);
        let keep: std::collections::HashSet<BlockId> = keep.into_iter().collect();
        self.blocks.retain(|h, _| keep.contains(h));

        self.root = *id;
        if let Some(root) = self.blocks.get_mut(id) {
            root.parent = None;
        }
        self.recompute_head();

        debug!(
            root = self.root().number,
            count = newly_irreversible.len(),
            "Fork database root advanced"
        );
        Ok(newly_irreversible)
    }

    /// Collect all ids reachable from a block.
    /// If `inclusive` is true, includes the block itself; otherwise only its descendants.
    fn collect_all_from(&self, id: BlockId, inclusive: bool) -> Vec<BlockId> {
        let mut result = if inclusive { vec![id] } else { Vec::new() };
        let mut stack = vec![id];
        while let Some(h) = stack.pop() {
            if let Some(node) = self.blocks.get(&h) {
                for &child in &node.children {
                    result.push(child);
                    stack.push(child);
                }
            }
        }
        result
    }

    fn recompute_head(&mut self) {
        let mut best = self.root;
        let mut best_number = self.root().number;
        for node in self.blocks.values() {
            if Self::is_better(node.number, node.id, best_number, best) {
                best = node.id;
                best_number = node.number;
            }
        }
        self.head = best;
    }

    /// Longer wins; equal height goes to the lower id
    fn is_better(
        number: BlockNumber,
        id: BlockId,
        other_number: BlockNumber,
        other_id: BlockId,
    ) -> bool {
        number > other_number || (number == other_number && id < other_id)
    }
}
