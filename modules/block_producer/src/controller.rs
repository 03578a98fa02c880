//! Chain controller
//!
//! Owns the fork database, the block log and one chain state per block of the
//! canonical chain back to the last irreversible block. Every mutating call
//! takes `&mut self`; callers that share a controller wrap it in one lock.
//!
//! Blocks enter through [`ChainController::push_block`] (from peers) or
//! [`ChainController::produce_block`] (locally). Both go through the fork
//! database; whenever its preferred head differs from ours the controller
//! switches branches, applying the new branch on the side and committing only
//! if every block applies.

use std::collections::HashSet;
use std::sync::Arc;

use rota_common::{
    object_store::{Account, ObjectKey, ObjectStore},
    state_history::StateHistory,
    time::Clock,
    AccountName, Block, BlockHeader, BlockId, BlockNumber, BlockTimestamp, ChainParams,
    GenesisState, ProducerRecord, Transaction, TransactionError, TxId,
};
use rota_module_block_log::BlockLog;
use rota_module_fork_database::ForkDatabase;
use tracing::{debug, error, info, warn};

use crate::error::ChainError;
use crate::native_contract::ContractEngine;
use crate::participation::RecentSlotsFilled;
use crate::schedule::{slot_at_time, slot_time, ProducerSchedule};
use crate::state::ChainState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    /// Replaying the block log
    Recovering,
    Idle,
    /// Checking an inbound block
    Validating,
    /// Committing a branch
    Applying,
}

/// Something the owner of the controller may want to pass on
#[derive(Debug, Clone, PartialEq)]
pub enum ChainEvent {
    /// Block became part of the canonical chain
    BlockApplied(Arc<Block>),

    /// Head moved to another branch
    ForkSwitched {
        from: BlockId,
        to: BlockId,
        common_ancestor: BlockNumber,
    },

    /// Block moved to the block log
    Irreversible { number: BlockNumber, id: BlockId },
}

pub struct ChainController {
    params: ChainParams,
    genesis: GenesisState,
    engine: Box<dyn ContractEngine>,
    clock: Arc<dyn Clock>,
    log: Box<dyn BlockLog>,
    fork_db: ForkDatabase,

    /// State after each canonical block, indexed by block number
    history: StateHistory<ChainState>,

    /// State after the head block
    head: ChainState,

    /// Accepted transactions not yet in a block, in acceptance order
    pending: Vec<Transaction>,

    /// Head objects with `pending` applied
    pending_objects: Option<ObjectStore>,

    status: ControllerStatus,
    events: Vec<ChainEvent>,
}

impl ChainController {
    /// Open a controller on `log`, replaying it from the first block
    pub fn open(
        params: ChainParams,
        genesis: GenesisState,
        engine: Box<dyn ContractEngine>,
        clock: Arc<dyn Clock>,
        log: Box<dyn BlockLog>,
    ) -> Result<Self, ChainError> {
        let head = ChainState::genesis(&genesis);
        let fork_db = ForkDatabase::with_genesis(genesis.initial_timestamp);
        let mut controller = Self {
            params,
            genesis,
            engine,
            clock,
            log,
            fork_db,
            history: StateHistory::new("chain"),
            head,
            pending: Vec::new(),
            pending_objects: None,
            status: ControllerStatus::Recovering,
            events: Vec::new(),
        };
        controller.recover()?;
        Ok(controller)
    }

    /// Rebuild the head state from the block log
    fn recover(&mut self) -> Result<(), ChainError> {
        self.status = ControllerStatus::Recovering;
        let mut state = ChainState::genesis(&self.genesis);
        let mut last_good: Option<Block> = None;
        let mut failure: Option<(BlockNumber, String)> = None;

        for entry in self.log.replay() {
            let block = match entry {
                Ok(block) => block,
                Err(e) => {
                    failure = Some((state.head_block_number() + 1, e.to_string()));
                    break;
                }
            };
            match state.apply_block(&block, self.engine.as_ref(), &self.params) {
                Ok(next) => {
                    state = next;
                    last_good = Some(block);
                }
                Err(e) => {
                    failure = Some((block.number(), e.to_string()));
                    break;
                }
            }
        }

        let replayed = state.head_block_number();
        if let Some((number, reason)) = failure {
            error!(number, reason, "Block log replay failed, truncating log to block {replayed}");
            self.log.truncate(replayed)?;
        }

        self.fork_db = match last_good {
            Some(block) => ForkDatabase::with_root_block(Arc::new(block)),
            None => ForkDatabase::with_genesis(self.genesis.initial_timestamp),
        };
        self.history.reset(replayed, state.clone());
        self.head = state;
        self.pending.clear();
        self.pending_objects = None;
        self.status = ControllerStatus::Idle;

        info!(head = replayed, id = %self.head.head_block_id(), "Recovered chain from block log");
        Ok(())
    }

    /// Flush the log and hand it back
    pub fn close(self) -> Result<Box<dyn BlockLog>, ChainError> {
        self.log.flush()?;
        info!(head = self.head.head_block_number(), "Closed chain");
        Ok(self.log)
    }

    // -- Block intake --

    /// Accept a block from a peer
    pub fn push_block(&mut self, block: Block) -> Result<(), ChainError> {
        let now = self.clock.now();
        let latest = BlockTimestamp(now.0 + self.params.max_block_time_drift_seconds);
        if block.timestamp() > latest {
            return Err(ChainError::TimestampInFuture {
                block: block.timestamp(),
                now,
            });
        }
        self.accept_block(Arc::new(block))
    }

    fn accept_block(&mut self, block: Arc<Block>) -> Result<(), ChainError> {
        let id = block.id();
        if self.is_known_block(&id) {
            debug!(number = block.number(), %id, "Block already known");
            return Ok(());
        }

        self.status = ControllerStatus::Validating;
        let result = self.link_block(block, id);
        self.status = ControllerStatus::Idle;
        result
    }

    fn link_block(&mut self, block: Arc<Block>, id: BlockId) -> Result<(), ChainError> {
        // Reject bad headers before they reach the fork database when the
        // parent is on our chain
        if let Some(parent_number) = block.number().checked_sub(1) {
            if let Some(parent) = self.history.get_by_index(parent_number) {
                if parent.head_block_id() == block.previous() {
                    parent.validate_header(&block, &self.params)?;
                }
            }
        }

        self.fork_db.insert(block.clone())?;

        let mut outcome = Ok(());
        loop {
            let preferred = self.fork_db.head().id;
            if preferred == self.head.head_block_id() {
                break;
            }
            if let Err((bad, error)) = self.switch_to(preferred) {
                warn!(%bad, %error, "Dropping invalid block and its descendants");
                let removed = self.fork_db.remove(&bad)?;
                if removed.contains(&id) {
                    outcome = Err(error);
                }
            }
        }

        self.advance_irreversible()?;
        self.reapply_pending();
        outcome
    }

    /// Make `target` the head. On failure returns the first block that did
    /// not apply; nothing is committed in that case.
    fn switch_to(&mut self, target: BlockId) -> Result<(), (BlockId, ChainError)> {
        let current = self.head.head_block_id();
        let branches = self
            .fork_db
            .fetch_branch_from(target, current)
            .map_err(|e| (target, ChainError::from(e)))?;
        let ancestor = branches.common_ancestor_number;
        let mut state = self.history.get_by_index(ancestor).cloned().ok_or_else(|| {
            (target, ChainError::Corrupt(format!("no state for block {ancestor}")))
        })?;

        self.status = ControllerStatus::Applying;
        let mut applied = Vec::with_capacity(branches.first.len());
        for block in branches.first.iter().rev() {
            state = state
                .apply_block(block, self.engine.as_ref(), &self.params)
                .map_err(|e| (block.id(), e))?;
            applied.push((block.clone(), state.clone()));
        }

        if !branches.second.is_empty() {
            info!(
                from = %current,
                to = %target,
                common_ancestor = ancestor,
                undone = branches.second.len(),
                applied = applied.len(),
                "Switching fork"
            );
            self.events.push(ChainEvent::ForkSwitched {
                from: current,
                to: target,
                common_ancestor: ancestor,
            });
        }

        // Transactions of undone blocks go back to pending unless the new
        // branch carries them too
        let popped: Vec<Transaction> = branches
            .second
            .iter()
            .rev()
            .flat_map(|b| b.transactions().cloned().collect::<Vec<_>>())
            .collect();
        let mut seen = HashSet::new();
        self.pending = popped
            .into_iter()
            .chain(std::mem::take(&mut self.pending))
            .filter(|t| {
                let id = t.id();
                !state.is_included(&id) && seen.insert(id)
            })
            .collect();

        self.history.rollback_to(ancestor);
        for (block, block_state) in applied {
            let id = block.id();
            self.history.commit(block.number(), block_state);
            if let Err(e) = self.fork_db.mark_validated(&id) {
                warn!(%id, "Could not mark block validated: {e}");
            }
            debug!(number = block.number(), %id, producer = %block.producer(), "Applied block");
            self.events.push(ChainEvent::BlockApplied(block));
        }
        self.head = state;
        Ok(())
    }

    /// Move newly irreversible blocks into the log
    fn advance_irreversible(&mut self) -> Result<(), ChainError> {
        let lib = self.head.globals.last_irreversible_block_num;
        let root = self.fork_db.root();
        if lib <= root.number {
            return Ok(());
        }
        let root_id = root.id;

        let head_id = self.head.head_block_id();
        let lib_id = self
            .fork_db
            .fetch_by_number(&head_id, lib)
            .map(|node| node.id)
            .ok_or_else(|| ChainError::Corrupt(format!("irreversible block {lib} not on head chain")))?;

        // Log first, so a storage failure leaves the fork database intact
        let branch = self.fork_db.fetch_branch_from(lib_id, root_id)?;
        let log_tip = self.log.tip_number();
        for block in branch.first.iter().rev().filter(|b| b.number() > log_tip) {
            self.log.append(block)?;
        }
        self.log.flush()?;

        self.fork_db.mark_irreversible(&lib_id)?;
        self.history.prune_before(lib);
        debug!(number = lib, id = %lib_id, "Advanced irreversible block");
        self.events.push(ChainEvent::Irreversible {
            number: lib,
            id: lib_id,
        });
        Ok(())
    }

    /// Rebuild the pending state on the current head, dropping transactions
    /// that no longer apply
    fn reapply_pending(&mut self) {
        if self.pending.is_empty() {
            self.pending_objects = None;
            return;
        }

        let mut objects = self.head.objects.clone();
        let mut kept = Vec::with_capacity(self.pending.len());
        for transaction in std::mem::take(&mut self.pending) {
            let id = transaction.id();
            if self.head.is_included(&id) {
                continue;
            }
            let mut state = objects.begin();
            match self.engine.apply(&transaction, &mut state) {
                Ok(_) => {
                    objects.commit(state);
                    kept.push(transaction);
                }
                Err(e) => debug!(%id, "Dropping pending transaction: {e}"),
            }
        }
        self.pending = kept;
        self.pending_objects = Some(objects);
    }

    // -- Production --

    /// Build, apply and link a block in slot `skip_count + 1`.
    ///
    /// Pending transactions go in in acceptance order; any that fail or are
    /// already on the chain are dropped.
    pub fn produce_block(&mut self, skip_count: u64) -> Result<Block, ChainError> {
        let slot = skip_count + 1;
        let globals = &self.head.globals;
        let producer = self
            .head
            .schedule
            .producer_at(globals.current_absolute_slot + slot, self.params.producer_repetitions)
            .cloned()
            .ok_or_else(|| ChainError::InvalidHeader("empty producer schedule".into()))?;
        let timestamp = slot_time(globals.head_block_time, self.params.block_interval_seconds, slot);

        let mut objects = self.head.objects.begin();
        let mut included = Vec::new();
        for transaction in &self.pending {
            if self.head.is_included(&transaction.id()) {
                warn!(id = %transaction.id(), "Dropping already included transaction");
                continue;
            }
            let mut nested = objects.nested();
            match self.engine.apply(transaction, &mut nested) {
                Ok(_) => {
                    objects.absorb(nested);
                    included.push(transaction.clone());
                }
                Err(e) => {
                    warn!(id = %transaction.id(), "Dropping pending transaction: {e}")
                }
            }
        }

        let block = Block {
            header: BlockHeader {
                number: globals.head_block_number + 1,
                previous: globals.head_block_id,
                timestamp,
                confirmed: self.head.expected_confirmed(&producer),
                producer,
                schedule_version: self.head.schedule.version,
            },
            cycles: if included.is_empty() {
                Vec::new()
            } else {
                vec![included]
            },
        };

        self.pending.clear();
        self.pending_objects = None;
        self.accept_block(Arc::new(block.clone()))?;
        info!(
            number = block.number(),
            producer = %block.producer(),
            time = %block.timestamp().to_iso_string(),
            transactions = block.transactions().count(),
            "Produced block"
        );
        Ok(block)
    }

    /// Apply a transaction to the pending state
    pub fn push_transaction(&mut self, transaction: Transaction) -> Result<TxId, ChainError> {
        let id = transaction.id();
        if self.head.is_included(&id) || self.pending.iter().any(|t| t.id() == id) {
            return Err(ChainError::TransactionFailed {
                id,
                source: TransactionError::Duplicate(id),
            });
        }

        let mut objects = self.pending_objects.clone().unwrap_or_else(|| self.head.objects.clone());
        let mut state = objects.begin();
        self.engine
            .apply(&transaction, &mut state)
            .map_err(|source| ChainError::TransactionFailed { id, source })?;
        objects.commit(state);

        self.pending_objects = Some(objects);
        self.pending.push(transaction);
        Ok(id)
    }

    /// Exchange blocks with `other` until both know each other's chains.
    /// The longer chain goes first.
    pub fn sync_with(&mut self, other: &mut ChainController) -> Result<(), ChainError> {
        if self.head_block_id() == other.head_block_id() {
            return Ok(());
        }
        if other.head_block_num() > self.head_block_num() {
            Self::push_missing(self, other)?;
            Self::push_missing(other, self)
        } else {
            Self::push_missing(other, self)?;
            Self::push_missing(self, other)
        }
    }

    fn push_missing(
        receiver: &mut ChainController,
        sender: &ChainController,
    ) -> Result<(), ChainError> {
        let from = receiver.last_irreversible_block_num() + 1;
        let to = sender.head_block_num();
        for number in from..=to {
            let Some(block) = sender.fetch_block_by_number(number)? else {
                break;
            };
            if !receiver.is_known_block(&block.id()) {
                receiver.push_block(block)?;
            }
        }
        Ok(())
    }

    // -- Queries --

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn head_state(&self) -> &ChainState {
        &self.head
    }

    pub fn head_block_num(&self) -> BlockNumber {
        self.head.globals.head_block_number
    }

    pub fn head_block_id(&self) -> BlockId {
        self.head.globals.head_block_id
    }

    pub fn head_block_time(&self) -> BlockTimestamp {
        self.head.globals.head_block_time
    }

    pub fn head_block_producer(&self) -> Option<&AccountName> {
        self.head.globals.head_block_producer.as_ref()
    }

    pub fn head_block(&self) -> Result<Option<Block>, ChainError> {
        self.fetch_block_by_number(self.head_block_num())
    }

    /// Never behind the block log
    pub fn last_irreversible_block_num(&self) -> BlockNumber {
        self.head.globals.last_irreversible_block_num.max(self.log.tip_number())
    }

    pub fn get_producer(&self, name: &AccountName) -> Option<ProducerRecord> {
        self.head.producer(name).cloned()
    }

    pub fn producer_participation_rate(&self) -> u64 {
        self.head.globals.recent_slots_filled.rate()
    }

    pub fn recent_slots_filled(&self) -> RecentSlotsFilled {
        self.head.globals.recent_slots_filled
    }

    pub fn active_schedule(&self) -> &ProducerSchedule {
        &self.head.schedule
    }

    pub fn get_scheduled_producer(&self, slot: u64) -> Option<AccountName> {
        self.head
            .schedule
            .producer_at(
                self.head.globals.current_absolute_slot + slot,
                self.params.producer_repetitions,
            )
            .cloned()
    }

    pub fn get_slot_time(&self, slot: u64) -> BlockTimestamp {
        slot_time(self.head_block_time(), self.params.block_interval_seconds, slot)
    }

    pub fn get_slot_at_time(&self, time: BlockTimestamp) -> Option<u64> {
        slot_at_time(self.head_block_time(), self.params.block_interval_seconds, time)
    }

    fn account(&self, name: &AccountName) -> Result<Account, ChainError> {
        let objects = self.pending_objects.as_ref().unwrap_or(&self.head.objects);
        objects
            .get::<Account>(&ObjectKey::account(name))
            .map_err(|e| ChainError::Corrupt(e.to_string()))?
            .ok_or_else(|| ChainError::NotFound(format!("account {name}")))
    }

    /// Liquid balance including pending transactions
    pub fn get_liquid_balance(&self, name: &AccountName) -> Result<u64, ChainError> {
        Ok(self.account(name)?.liquid)
    }

    pub fn get_staked_balance(&self, name: &AccountName) -> Result<u64, ChainError> {
        Ok(self.account(name)?.staked)
    }

    pub fn pending_transactions(&self) -> &[Transaction] {
        &self.pending
    }

    /// Block `number` of the canonical chain
    pub fn fetch_block_by_number(&self, number: BlockNumber) -> Result<Option<Block>, ChainError> {
        if number == 0 || number > self.head_block_num() {
            return Ok(None);
        }
        if number <= self.log.tip_number() {
            return Ok(Some(self.log.read(number)?));
        }
        Ok(self
            .fork_db
            .fetch_by_number(&self.head_block_id(), number)
            .and_then(|node| node.block.as_deref().cloned()))
    }

    pub fn fetch_block_by_id(&self, id: &BlockId) -> Result<Option<Block>, ChainError> {
        if let Some(block) = self.fork_db.get_block(id) {
            return Ok(Some((*block).clone()));
        }
        match self.log.number_of(id)? {
            Some(number) => Ok(Some(self.log.read(number)?)),
            None => Ok(None),
        }
    }

    /// In the fork database or the block log
    pub fn is_known_block(&self, id: &BlockId) -> bool {
        self.fork_db.contains(id)
            || self.log.contains(id).unwrap_or_else(|e| {
                warn!(%id, "Block log lookup failed: {e}");
                false
            })
    }

    /// Drain queued events
    pub fn take_events(&mut self) -> Vec<ChainEvent> {
        std::mem::take(&mut self.events)
    }
}
