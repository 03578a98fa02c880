use std::collections::{BTreeMap, HashMap};

use rota_common::{Block, BlockId, BlockNumber};

use crate::{check_append, BlockLog, BlockLogError, BlockLogIter};

/// Volatile block log for tests and throwaway nodes
#[derive(Default)]
pub struct MemoryBlockLog {
    blocks: BTreeMap<BlockNumber, Block>,
    numbers_by_id: HashMap<BlockId, BlockNumber>,
}

impl MemoryBlockLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockLog for MemoryBlockLog {
    fn append(&mut self, block: &Block) -> Result<(), BlockLogError> {
        check_append(self.tip(), block)?;
        self.numbers_by_id.insert(block.id(), block.number());
        self.blocks.insert(block.number(), block.clone());
        Ok(())
    }

    fn read(&self, number: BlockNumber) -> Result<Block, BlockLogError> {
        self.blocks.get(&number).cloned().ok_or(BlockLogError::NotFound(number))
    }

    fn replay(&self) -> BlockLogIter<'_> {
        Box::new(self.blocks.values().cloned().map(Ok))
    }

    fn truncate(&mut self, after: BlockNumber) -> Result<(), BlockLogError> {
        let removed = self.blocks.split_off(&(after + 1));
        for block in removed.values() {
            self.numbers_by_id.remove(&block.id());
        }
        Ok(())
    }

    fn number_of(&self, id: &BlockId) -> Result<Option<BlockNumber>, BlockLogError> {
        Ok(self.numbers_by_id.get(id).copied())
    }

    fn tip(&self) -> Option<(BlockNumber, BlockId)> {
        self.blocks.last_key_value().map(|(number, block)| (*number, block.id()))
    }

    fn flush(&self) -> Result<(), BlockLogError> {
        Ok(())
    }
}
