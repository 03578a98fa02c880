//! Applying a block on top of a chain state

use rota_common::{Block, ChainParams, ProducerRecord, TransactionError};
use tracing::info;

use crate::error::ChainError;
use crate::native_contract::ContractEngine;
use crate::schedule::{slot_at_time, ProducerSchedule};
use crate::state::{ChainState, ScheduleProposal};

impl ChainState {
    /// `confirmed` value a block by `producer` on top of this state must carry
    pub fn expected_confirmed(&self, producer: &rota_common::AccountName) -> u32 {
        let last = self.producers.get(producer).map(|r| r.last_confirmed_block_num).unwrap_or(0);
        u32::try_from(self.globals.head_block_number.saturating_sub(last)).unwrap_or(u32::MAX)
    }

    /// Check a header against this state as its parent.
    ///
    /// Returns the block's slot counted from this head.
    pub fn validate_header(&self, block: &Block, params: &ChainParams) -> Result<u64, ChainError> {
        let globals = &self.globals;
        let header = &block.header;
        let interval = params.block_interval_seconds;

        if header.number != globals.head_block_number + 1 {
            return Err(ChainError::InvalidBlockNumber {
                expected: globals.head_block_number + 1,
                got: header.number,
            });
        }
        if header.previous != globals.head_block_id {
            return Err(ChainError::UnlinkableBlock {
                id: block.id(),
                parent: header.previous,
            });
        }
        if header.timestamp <= globals.head_block_time {
            return Err(ChainError::TimestampTooOld {
                parent: globals.head_block_time,
                got: header.timestamp,
            });
        }
        if header.timestamp.0 % interval != 0 {
            return Err(ChainError::UnalignedTimestamp(header.timestamp));
        }
        let slot = slot_at_time(globals.head_block_time, interval, header.timestamp).ok_or(
            ChainError::TimestampTooOld {
                parent: globals.head_block_time,
                got: header.timestamp,
            },
        )?;

        let expected = self
            .schedule
            .producer_at(globals.current_absolute_slot + slot, params.producer_repetitions)
            .ok_or_else(|| ChainError::InvalidHeader("empty producer schedule".into()))?;
        if *expected != header.producer {
            return Err(ChainError::WrongProducer {
                number: header.number,
                expected: expected.clone(),
                got: header.producer.clone(),
            });
        }

        if header.schedule_version != self.schedule.version {
            return Err(ChainError::InvalidHeader(format!(
                "schedule version {} does not match active version {}",
                header.schedule_version, self.schedule.version
            )));
        }
        let confirmed = self.expected_confirmed(&header.producer);
        if header.confirmed != confirmed {
            return Err(ChainError::InvalidHeader(format!(
                "confirmed count {} should be {confirmed}",
                header.confirmed
            )));
        }

        Ok(slot)
    }

    /// State after `block`. Nothing is changed on error.
    pub fn apply_block(
        &self,
        block: &Block,
        engine: &dyn ContractEngine,
        params: &ChainParams,
    ) -> Result<ChainState, ChainError> {
        let slot = self.validate_header(block, params)?;
        let number = block.number();
        let mut next = self.clone();

        // Transactions, all or nothing
        let mut objects = next.objects.begin();
        for transaction in block.transactions() {
            let id = transaction.id();
            if next.transaction_ids.insert(id).is_some() {
                return Err(ChainError::TransactionFailed {
                    id,
                    source: TransactionError::Duplicate(id),
                });
            }
            let receipt = engine
                .apply(transaction, &mut objects)
                .map_err(|source| ChainError::TransactionFailed { id, source })?;
            if let Some(producers) = receipt.proposed_schedule {
                next.proposal = Some(ScheduleProposal {
                    producers,
                    block_num: number,
                });
            }
        }
        next.objects.commit(objects);

        // Producers whose slots were skipped
        let head_slot = self.globals.current_absolute_slot;
        let block_slot = head_slot + slot;
        let producer = block.producer().clone();
        let missed =
            self.schedule.missed_slots(head_slot, slot - 1, params.producer_repetitions, &producer);
        for (name, count) in missed {
            let mut record = next.producers.get(&name).cloned().unwrap_or_default();
            record.total_missed += count;
            next.producers.insert(name, record);
        }

        let mut record = next.producers.get(&producer).cloned().unwrap_or_default();
        record.total_produced += 1;
        record.last_confirmed_block_num = number;
        record.last_absolute_slot = block_slot;
        next.producers.insert(producer.clone(), record);

        let globals = &mut next.globals;
        globals.head_block_number = number;
        globals.head_block_id = block.id();
        globals.head_block_time = block.timestamp();
        globals.head_block_producer = Some(producer);
        globals.current_absolute_slot = block_slot;
        globals.recent_slots_filled.record(slot - 1);

        next.update_last_irreversible(params);
        next.maybe_activate_proposal(params);

        Ok(next)
    }

    /// Highest block that enough active producers have built on
    fn update_last_irreversible(&mut self, params: &ChainParams) {
        let mut confirmed: Vec<_> = self
            .schedule
            .producers
            .iter()
            .map(|p| self.producers.get(p).map(|r| r.last_confirmed_block_num).unwrap_or(0))
            .collect();
        confirmed.sort_unstable();

        let offset = params.irreversible_offset(confirmed.len());
        if let Some(&candidate) = confirmed.get(offset) {
            let lib = &mut self.globals.last_irreversible_block_num;
            *lib = (*lib).max(candidate);
        }
    }

    /// At a round boundary, an irreversible proposal replaces the schedule
    fn maybe_activate_proposal(&mut self, params: &ChainParams) {
        let round = params.blocks_per_round(self.schedule.len());
        let number = self.globals.head_block_number;
        if round == 0 || number % round != 0 {
            return;
        }
        let Some(proposal) = self.proposal.as_ref() else {
            return;
        };
        if proposal.block_num > self.globals.last_irreversible_block_num {
            return;
        }

        let producers = proposal.producers.clone();
        let version = self.schedule.version + 1;
        info!(number, version, count = producers.len(), "Activating producer schedule");
        for name in &producers {
            if !self.producers.contains_key(name) {
                self.producers.insert(name.clone(), ProducerRecord::default());
            }
        }
        self.schedule = ProducerSchedule::new(version, producers);
        self.proposal = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native_contract::NativeEngine;
    use crate::schedule::slot_time;
    use rota_common::{Action, AccountName, BlockHeader, BlockTimestamp, GenesisState, Transaction};

    fn name(s: &str) -> AccountName {
        AccountName::new(s).unwrap()
    }

    /// Header a well-behaved producer would build after `skip` empty slots
    fn next_block(state: &ChainState, skip: u64, params: &ChainParams) -> Block {
        let slot = skip + 1;
        let globals = &state.globals;
        let producer = state
            .schedule
            .producer_at(globals.current_absolute_slot + slot, params.producer_repetitions)
            .unwrap()
            .clone();
        Block {
            header: BlockHeader {
                number: globals.head_block_number + 1,
                previous: globals.head_block_id,
                timestamp: slot_time(globals.head_block_time, params.block_interval_seconds, slot),
                confirmed: state.expected_confirmed(&producer),
                producer,
                schedule_version: state.schedule.version,
            },
            cycles: vec![],
        }
    }

    fn extend(state: ChainState, count: usize, params: &ChainParams) -> ChainState {
        (0..count).fold(state, |s, _| {
            let block = next_block(&s, 0, params);
            s.apply_block(&block, &NativeEngine, params).unwrap()
        })
    }

    #[test]
    fn first_block_belongs_to_slot_one() {
        let params = ChainParams::default();
        let genesis = ChainState::genesis(&GenesisState::default());
        let block = next_block(&genesis, 0, &params);
        assert_eq!(block.producer(), &name("initb"));
        assert_eq!(block.timestamp(), BlockTimestamp(1_500_000_003));

        let state = genesis.apply_block(&block, &NativeEngine, &params).unwrap();
        assert_eq!(state.globals.head_block_number, 1);
        assert_eq!(state.globals.head_block_id, block.id());
        assert_eq!(state.globals.current_absolute_slot, 1);
        assert_eq!(state.globals.recent_slots_filled.rate(), rota_common::PERCENT_100);
        let record = state.producer(&name("initb")).unwrap();
        assert_eq!(record.total_produced, 1);
        assert_eq!(record.last_confirmed_block_num, 1);
    }

    #[test]
    fn skipped_slots_are_charged_to_their_producers() {
        let params = ChainParams::default();
        let state = extend(ChainState::genesis(&GenesisState::default()), 1, &params);
        let block = next_block(&state, 3, &params);
        assert_eq!(block.producer(), &name("initf"));

        let state = state.apply_block(&block, &NativeEngine, &params).unwrap();
        assert_eq!(state.globals.head_block_number, 2);
        assert_eq!(state.globals.current_absolute_slot, 5);
        for missed in ["initc", "initd", "inite"] {
            assert_eq!(state.producer(&name(missed)).unwrap().total_missed, 1);
        }
        assert_eq!(state.producer(&name("initf")).unwrap().total_missed, 0);
        assert_eq!(state.producer(&name("initb")).unwrap().total_missed, 0);
    }

    #[test]
    fn header_violations() {
        let params = ChainParams::default();
        let state = extend(ChainState::genesis(&GenesisState::default()), 2, &params);
        let good = next_block(&state, 0, &params);

        let mut wrong = good.clone();
        wrong.header.producer = name("inita");
        assert!(matches!(
            state.apply_block(&wrong, &NativeEngine, &params),
            Err(ChainError::WrongProducer { .. })
        ));

        let mut unaligned = good.clone();
        unaligned.header.timestamp = BlockTimestamp(good.timestamp().0 + 1);
        assert!(matches!(
            state.validate_header(&unaligned, &params),
            Err(ChainError::UnalignedTimestamp(_))
        ));

        let mut old = good.clone();
        old.header.timestamp = state.globals.head_block_time;
        assert!(matches!(
            state.validate_header(&old, &params),
            Err(ChainError::TimestampTooOld { .. })
        ));

        let mut version = good.clone();
        version.header.schedule_version = 7;
        assert!(matches!(
            state.validate_header(&version, &params),
            Err(ChainError::InvalidHeader(_))
        ));

        let mut confirmed = good.clone();
        confirmed.header.confirmed += 1;
        assert!(matches!(
            state.validate_header(&confirmed, &params),
            Err(ChainError::InvalidHeader(_))
        ));

        let mut number = good.clone();
        number.header.number += 1;
        assert!(matches!(
            state.validate_header(&number, &params),
            Err(ChainError::InvalidBlockNumber { .. })
        ));

        assert!(state.validate_header(&good, &params).is_ok());
    }

    #[test]
    fn failing_transaction_rejects_block() {
        let params = ChainParams::default();
        let state = ChainState::genesis(&GenesisState::default());
        let mut block = next_block(&state, 0, &params);
        block.cycles = vec![vec![Transaction::new(
            vec![Action::Transfer {
                from: name("inita"),
                to: name("initb"),
                amount: 1_000_000,
                memo: String::new(),
            }],
            0,
        )]];
        assert!(matches!(
            state.apply_block(&block, &NativeEngine, &params),
            Err(ChainError::TransactionFailed { .. })
        ));
    }

    #[test]
    fn repeated_transaction_rejects_block() {
        let params = ChainParams::default();
        let state = ChainState::genesis(&GenesisState::default());
        let payment = Transaction::new(
            vec![Action::Transfer {
                from: name("inita"),
                to: name("initb"),
                amount: 100,
                memo: String::new(),
            }],
            7,
        );

        let mut first = next_block(&state, 0, &params);
        first.cycles = vec![vec![payment.clone()]];
        let state = state.apply_block(&first, &NativeEngine, &params).unwrap();
        assert!(state.is_included(&payment.id()));

        let mut again = next_block(&state, 0, &params);
        again.cycles = vec![vec![payment.clone()]];
        assert!(matches!(
            state.apply_block(&again, &NativeEngine, &params),
            Err(ChainError::TransactionFailed {
                source: TransactionError::Duplicate(_),
                ..
            })
        ));

        // Twice within one block
        let mut fresh = payment.clone();
        fresh.nonce = 8;
        let mut twice = next_block(&state, 0, &params);
        twice.cycles = vec![vec![fresh.clone()], vec![fresh]];
        assert!(matches!(
            state.apply_block(&twice, &NativeEngine, &params),
            Err(ChainError::TransactionFailed {
                source: TransactionError::Duplicate(_),
                ..
            })
        ));
    }

    #[test]
    fn irreversible_lags_by_a_third_of_the_producers() {
        let params = ChainParams::default();
        let state = extend(ChainState::genesis(&GenesisState::default()), 20, &params);
        assert_eq!(state.globals.last_irreversible_block_num, 6);
        let state = extend(state, 80, &params);
        assert_eq!(state.globals.last_irreversible_block_num, 86);
    }

    #[test]
    fn proposal_activates_at_round_boundary_once_irreversible() {
        let params = ChainParams::default();
        let genesis = GenesisState {
            producers: vec![name("inita"), name("initb"), name("initc")],
            initial_balances: vec![(name("inita"), 10), (name("initb"), 10), (name("initc"), 10)],
            ..GenesisState::default()
        };
        let state = ChainState::genesis(&genesis);
        let mut block = next_block(&state, 0, &params);
        block.cycles = vec![vec![Transaction::new(
            vec![Action::ProposeSchedule {
                proposer: name("initb"),
                producers: vec![name("initc"), name("initb")],
            }],
            0,
        )]];
        let state = state.apply_block(&block, &NativeEngine, &params).unwrap();
        assert_eq!(state.proposal.as_ref().unwrap().block_num, 1);

        let state = extend(state, 1, &params);
        assert_eq!(state.schedule.version, 0);

        // Block 3 closes the round; block 1 is irreversible by then
        let state = extend(state, 1, &params);
        assert_eq!(state.globals.last_irreversible_block_num, 1);
        assert_eq!(state.schedule.version, 1);
        assert_eq!(state.schedule.producers, vec![name("initc"), name("initb")]);
        assert!(state.proposal.is_none());

        let next = next_block(&state, 0, &params);
        assert_eq!(next.header.schedule_version, 1);
        state.apply_block(&next, &NativeEngine, &params).unwrap();
    }
}
