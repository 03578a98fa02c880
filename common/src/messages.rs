//! Definition of Rota bus messages

use crate::{
    block::Block,
    hash::BlockId,
    types::{AccountName, BlockNumber, BlockTimestamp, ProducerRecord},
};

// Caryatid core messages
use caryatid_module_clock::messages::ClockTickMessage;

/// A block, with the node it came from
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockMessage {
    /// Originating node
    pub source: String,

    pub block: Block,
}

/// Ask peers for blocks `from..=to` of their canonical chain
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SyncRequestMessage {
    /// Requesting node
    pub requester: String,

    pub from: BlockNumber,

    pub to: BlockNumber,

    /// Topic the requester reads blocks from
    pub reply_topic: String,
}

/// Chain messages
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChainMessage {
    /// Block offered by a peer
    BlockAvailable(BlockMessage),

    /// Block produced by this node
    BlockProduced(BlockMessage),

    /// Catch-up request
    SyncRequest(SyncRequestMessage),

    /// Head moved to another branch
    ForkSwitched {
        from: BlockId,
        to: BlockId,
        common_ancestor: BlockNumber,
    },

    /// Block became irreversible
    Irreversible { number: BlockNumber, id: BlockId },
}

/// Summary of the head block
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HeadInfo {
    pub number: BlockNumber,
    pub id: BlockId,
    pub timestamp: BlockTimestamp,
    pub producer: Option<AccountName>,
    pub last_irreversible_block_num: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChainQuery {
    GetHead,
    GetBlockByNumber { number: BlockNumber },
    GetProducer { name: AccountName },
    GetParticipationRate,
    GetScheduledProducer { slot: u64 },
    GetSlotTime { slot: u64 },
    GetLiquidBalance { name: AccountName },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ChainQueryResponse {
    Head(HeadInfo),
    Block(Block),
    Producer(ProducerRecord),
    ParticipationRate(u64),
    ScheduledProducer(AccountName),
    SlotTime(BlockTimestamp),
    LiquidBalance(u64),
    NotFound,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StateQuery {
    Chain(ChainQuery),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum StateQueryResponse {
    Chain(ChainQueryResponse),
}

// === Global message enum ===
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum Message {
    None(()), // Just so we have a simple default

    // Caryatid standard messages
    Clock(ClockTickMessage), // Clock tick

    // Chain messages
    Chain(ChainMessage),

    // Queries and responses
    StateQuery(StateQuery),
    StateQueryResponse(StateQueryResponse),
}

impl Default for Message {
    fn default() -> Self {
        Self::None(())
    }
}

// Casts from specific messages
impl From<ClockTickMessage> for Message {
    fn from(msg: ClockTickMessage) -> Self {
        Message::Clock(msg)
    }
}

impl From<ChainMessage> for Message {
    fn from(msg: ChainMessage) -> Self {
        Message::Chain(msg)
    }
}
