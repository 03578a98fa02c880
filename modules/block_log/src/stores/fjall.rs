use std::{fs, path::PathBuf, sync::Arc};

use config::Config;
use fjall::{Database, Keyspace, PersistMode};
use rota_common::{Block, BlockId, BlockNumber};
use tracing::{info, warn};

use crate::stores::decode_block;
use crate::{check_append, BlockLog, BlockLogError, BlockLogIter};

const DEFAULT_DATABASE_PATH: (&str, &str) = ("database-path", "fjall-block-log");
const DEFAULT_CLEAR_ON_START: (&str, bool) = ("clear-on-start", false);
const BLOCKS_KEYSPACE: &str = "blocks";
const BLOCK_NUMBERS_BY_ID_KEYSPACE: &str = "block-numbers-by-id";

pub struct FjallBlockLog {
    database: Database,
    /// Encoded blocks keyed by big-endian number
    blocks: Keyspace,
    /// Block number keyed by block id
    block_numbers_by_id: Keyspace,
    tip: Option<(BlockNumber, BlockId)>,
}

impl FjallBlockLog {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let path = config
            .get_string(DEFAULT_DATABASE_PATH.0)
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.1.to_string());
        let clear = config.get_bool(DEFAULT_CLEAR_ON_START.0).unwrap_or(DEFAULT_CLEAR_ON_START.1);
        let path = PathBuf::from(path);
        if clear && path.exists() {
            warn!("Clearing block log at {}", path.display());
            fs::remove_dir_all(&path)?;
        }

        let database = Database::builder(&path).open()?;
        let blocks = database.keyspace(BLOCKS_KEYSPACE, fjall::KeyspaceCreateOptions::default)?;
        let block_numbers_by_id = database.keyspace(
            BLOCK_NUMBERS_BY_ID_KEYSPACE,
            fjall::KeyspaceCreateOptions::default,
        )?;

        let mut log = Self {
            database,
            blocks,
            block_numbers_by_id,
            tip: None,
        };
        log.tip = log.read_tip()?;
        if let Some((number, id)) = log.tip {
            info!(number, %id, "Opened block log at {}", path.display());
        }
        Ok(log)
    }

    fn read_tip(&self) -> Result<Option<(BlockNumber, BlockId)>, BlockLogError> {
        let Some(entry) = self.blocks.last_key_value() else {
            return Ok(None);
        };
        let (key, value) = entry.into_inner()?;
        let number = decode_number(&key)?;
        let block = decode_block(number, &value)?;
        Ok(Some((number, block.id())))
    }
}

fn decode_number(key: &[u8]) -> Result<BlockNumber, BlockLogError> {
    key.try_into().map(u64::from_be_bytes).map_err(|_| BlockLogError::Corrupt {
        number: 0,
        reason: format!("bad key length {}", key.len()),
    })
}

impl BlockLog for FjallBlockLog {
    fn append(&mut self, block: &Block) -> Result<(), BlockLogError> {
        check_append(self.tip, block)?;
        let id = block.id();
        let number = block.number();

        let mut batch = self.database.batch();
        batch.insert(&self.blocks, number.to_be_bytes(), block.to_bytes());
        batch.insert(&self.block_numbers_by_id, *id, number.to_be_bytes());
        batch.commit()?;

        self.tip = Some((number, id));
        Ok(())
    }

    fn read(&self, number: BlockNumber) -> Result<Block, BlockLogError> {
        let Some(bytes) = self.blocks.get(number.to_be_bytes())? else {
            return Err(BlockLogError::NotFound(number));
        };
        decode_block(number, &bytes)
    }

    fn replay(&self) -> BlockLogIter<'_> {
        Box::new(self.blocks.iter().map(|entry| {
            let (key, value) = entry.into_inner()?;
            let number = decode_number(&key)?;
            decode_block(number, &value)
        }))
    }

    fn truncate(&mut self, after: BlockNumber) -> Result<(), BlockLogError> {
        let Some((tip, _)) = self.tip else {
            return Ok(());
        };
        if after >= tip {
            return Ok(());
        }

        let mut batch = self.database.batch();
        for entry in self.blocks.range((after + 1).to_be_bytes()..) {
            let (key, value) = entry.into_inner()?;
            let number = decode_number(&key)?;
            let block = decode_block(number, &value)?;
            batch.remove(&self.blocks, key);
            batch.remove(&self.block_numbers_by_id, *block.id());
        }
        batch.commit()?;
        self.database.persist(PersistMode::SyncAll)?;

        warn!(from = tip, to = after, "Truncated block log");
        self.tip = self.read_tip()?;
        Ok(())
    }

    fn number_of(&self, id: &BlockId) -> Result<Option<BlockNumber>, BlockLogError> {
        match self.block_numbers_by_id.get(**id)? {
            Some(bytes) => Ok(Some(decode_number(&bytes)?)),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Option<(BlockNumber, BlockId)> {
        self.tip
    }

    fn flush(&self) -> Result<(), BlockLogError> {
        self.database.persist(PersistMode::Buffer)?;
        Ok(())
    }
}
