//! Blocks, transactions and the actions they carry

use crate::hash::{blake2b_256, BlockId, TxId};
use crate::types::{AccountName, BlockNumber, BlockTimestamp};
use minicbor::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A single state change requested by a transaction
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum Action {
    /// Create `name`, staking `deposit` taken from the creator's liquid balance
    #[n(0)]
    CreateAccount {
        #[n(0)]
        creator: AccountName,
        #[n(1)]
        name: AccountName,
        #[n(2)]
        deposit: u64,
    },

    /// Move liquid balance between accounts
    #[n(1)]
    Transfer {
        #[n(0)]
        from: AccountName,
        #[n(1)]
        to: AccountName,
        #[n(2)]
        amount: u64,
        #[n(3)]
        memo: String,
    },

    /// Propose a new active producer list
    #[n(2)]
    ProposeSchedule {
        #[n(0)]
        proposer: AccountName,
        #[n(1)]
        producers: Vec<AccountName>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Transaction {
    #[n(0)]
    pub actions: Vec<Action>,

    /// Distinguishes otherwise identical transactions
    #[n(1)]
    pub nonce: u64,
}

impl Transaction {
    pub fn new(actions: Vec<Action>, nonce: u64) -> Self {
        Self { actions, nonce }
    }

    pub fn id(&self) -> TxId {
        blake2b_256(&minicbor::to_vec(self).expect("infallible"))
    }
}

/// Ordered group of transactions inside a block
pub type Cycle = Vec<Transaction>;

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct BlockHeader {
    #[n(0)]
    pub number: BlockNumber,

    /// Id of the parent; all zero for block 1
    #[n(1)]
    pub previous: BlockId,

    #[n(2)]
    pub timestamp: BlockTimestamp,

    #[n(3)]
    pub producer: AccountName,

    #[n(4)]
    pub schedule_version: u32,

    /// Blocks between the producer's previous block and this one
    #[n(5)]
    pub confirmed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Block {
    #[n(0)]
    pub header: BlockHeader,

    #[n(1)]
    pub cycles: Vec<Cycle>,
}

impl Block {
    /// Digest of the full encoding, parent id included
    pub fn id(&self) -> BlockId {
        blake2b_256(&self.to_bytes())
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    pub fn previous(&self) -> BlockId {
        self.header.previous
    }

    pub fn timestamp(&self) -> BlockTimestamp {
        self.header.timestamp
    }

    pub fn producer(&self) -> &AccountName {
        &self.header.producer
    }

    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.cycles.iter().flatten()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("infallible")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, minicbor::decode::Error> {
        minicbor::decode(bytes)
    }
}
