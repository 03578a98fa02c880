use rota_common::{Block, BlockNumber};

use crate::BlockLogError;

pub mod fjall;
pub mod memory;

pub(crate) fn decode_block(number: BlockNumber, bytes: &[u8]) -> Result<Block, BlockLogError> {
    let block = Block::from_bytes(bytes).map_err(|e| BlockLogError::Corrupt {
        number,
        reason: e.to_string(),
    })?;
    if block.number() != number {
        return Err(BlockLogError::Corrupt {
            number,
            reason: format!("entry holds block {}", block.number()),
        });
    }
    Ok(block)
}
