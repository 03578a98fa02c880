//! A node under test

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use config::Config;
use rota_common::{
    time::ManualClock, AccountName, Action, Block, BlockId, BlockNumber, BlockTimestamp,
    ChainParams, GenesisState, ProducerRecord, Transaction, TxId,
};
use rota_module_block_log::{BlockLog, FjallBlockLog, MemoryBlockLog};
use rota_module_block_producer::{
    participation::RecentSlotsFilled, schedule::ProducerSchedule, ChainController, ChainError,
    NativeEngine,
};
use tracing::debug;

use crate::network::{lock, SharedController, SimulatedNetwork};

/// Staked deposit for accounts made with [`TestChain::create_account`]
pub const ACCOUNT_DEPOSIT: u64 = 100;

/// Controller on the default genesis, driven by a clock shared with the
/// other test nodes
pub struct TestChain {
    name: String,
    controller: SharedController,
    clock: ManualClock,
    network: Option<SimulatedNetwork>,
    next_nonce: AtomicU64,
}

impl TestChain {
    pub fn in_memory(name: &str, clock: &ManualClock) -> Result<Self> {
        Self::open(name, Box::new(MemoryBlockLog::new()), clock)
    }

    /// Open on a block log under `path`, replaying whatever it holds
    pub fn on_disk(name: &str, path: &Path, clock: &ManualClock) -> Result<Self> {
        let config = Config::builder()
            .set_override("database-path", path.to_string_lossy().into_owned())?
            .build()?;
        let log = FjallBlockLog::new(Arc::new(config))?;
        Self::open(name, Box::new(log), clock)
    }

    pub fn open(name: &str, log: Box<dyn BlockLog>, clock: &ManualClock) -> Result<Self> {
        let controller = ChainController::open(
            ChainParams::default(),
            GenesisState::default(),
            Box::new(NativeEngine),
            Arc::new(clock.clone()),
            log,
        )?;
        Ok(Self {
            name: name.to_string(),
            controller: Arc::new(Mutex::new(controller)),
            clock: clock.clone(),
            network: None,
            next_nonce: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controller(&self) -> SharedController {
        self.controller.clone()
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn lock(&self) -> MutexGuard<'_, ChainController> {
        lock(&self.controller)
    }

    pub(crate) fn attach(&mut self, network: SimulatedNetwork) {
        self.network = Some(network);
    }

    pub(crate) fn detach(&mut self) {
        self.network = None;
    }

    /// Produce `count` blocks, each after `missed` empty slots. The shared
    /// clock moves to each block's time and every block goes out to the
    /// network before the next is made.
    pub fn produce_blocks(&self, count: u64, missed: u64) -> Result<(), ChainError> {
        for _ in 0..count {
            let block = {
                let mut controller = self.lock();
                self.clock.advance_to(controller.get_slot_time(missed + 1));
                controller.produce_block(missed)?
            };
            debug!(
                node = self.name,
                number = block.number(),
                producer = %block.producer(),
                "Test block produced"
            );
            if let Some(network) = &self.network {
                network.run();
            }
        }
        Ok(())
    }

    pub fn push_transaction(&self, actions: Vec<Action>) -> Result<TxId, ChainError> {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed);
        self.lock().push_transaction(Transaction::new(actions, nonce))
    }

    pub fn create_account(
        &self,
        creator: &AccountName,
        name: &AccountName,
    ) -> Result<TxId, ChainError> {
        self.push_transaction(vec![Action::CreateAccount {
            creator: creator.clone(),
            name: name.clone(),
            deposit: ACCOUNT_DEPOSIT,
        }])
    }

    pub fn transfer(
        &self,
        from: &AccountName,
        to: &AccountName,
        amount: u64,
    ) -> Result<TxId, ChainError> {
        self.push_transaction(vec![Action::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
            memo: String::new(),
        }])
    }

    pub fn propose_schedule(
        &self,
        proposer: &AccountName,
        producers: Vec<AccountName>,
    ) -> Result<TxId, ChainError> {
        self.push_transaction(vec![Action::ProposeSchedule {
            proposer: proposer.clone(),
            producers,
        }])
    }

    // -- Queries --

    pub fn head_block_num(&self) -> BlockNumber {
        self.lock().head_block_num()
    }

    pub fn head_block_id(&self) -> BlockId {
        self.lock().head_block_id()
    }

    pub fn head_block_time(&self) -> BlockTimestamp {
        self.lock().head_block_time()
    }

    pub fn head_block_producer(&self) -> Option<AccountName> {
        self.lock().head_block_producer().cloned()
    }

    pub fn last_irreversible_block_num(&self) -> BlockNumber {
        self.lock().last_irreversible_block_num()
    }

    pub fn get_producer(&self, name: &AccountName) -> Option<ProducerRecord> {
        self.lock().get_producer(name)
    }

    pub fn get_scheduled_producer(&self, slot: u64) -> Option<AccountName> {
        self.lock().get_scheduled_producer(slot)
    }

    pub fn get_slot_time(&self, slot: u64) -> BlockTimestamp {
        self.lock().get_slot_time(slot)
    }

    pub fn producer_participation_rate(&self) -> u64 {
        self.lock().producer_participation_rate()
    }

    pub fn recent_slots_filled(&self) -> RecentSlotsFilled {
        self.lock().recent_slots_filled()
    }

    pub fn active_schedule(&self) -> ProducerSchedule {
        self.lock().active_schedule().clone()
    }

    pub fn get_liquid_balance(&self, name: &AccountName) -> Result<u64, ChainError> {
        self.lock().get_liquid_balance(name)
    }

    pub fn get_staked_balance(&self, name: &AccountName) -> Result<u64, ChainError> {
        self.lock().get_staked_balance(name)
    }

    pub fn fetch_block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, ChainError> {
        self.lock().fetch_block_by_number(number)
    }

    pub fn is_known_block(&self, id: &BlockId) -> bool {
        self.lock().is_known_block(id)
    }
}

impl Drop for TestChain {
    fn drop(&mut self) {
        if let Some(network) = self.network.take() {
            network.remove(&self.name);
        }
    }
}
