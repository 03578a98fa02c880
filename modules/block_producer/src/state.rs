//! Chain state carried alongside each applied block

use imbl::{OrdMap, OrdSet};
use rota_common::{
    object_store::{Account, ObjectKey, ObjectStore},
    AbsoluteSlot, AccountName, BlockId, BlockNumber, BlockTimestamp, GenesisState,
    ProducerRecord, TxId,
};

use crate::participation::RecentSlotsFilled;
use crate::schedule::ProducerSchedule;

/// Head summary, versioned with the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalProperties {
    pub head_block_number: BlockNumber,
    pub head_block_id: BlockId,
    pub head_block_time: BlockTimestamp,
    /// `None` at genesis
    pub head_block_producer: Option<AccountName>,

    /// Irreversible block as computed from this chain's producer records
    pub last_irreversible_block_num: BlockNumber,

    /// Slots elapsed since genesis, filled or not
    pub current_absolute_slot: AbsoluteSlot,

    pub recent_slots_filled: RecentSlotsFilled,
}

impl Default for GlobalProperties {
    fn default() -> Self {
        Self {
            head_block_number: 0,
            head_block_id: BlockId::default(),
            head_block_time: BlockTimestamp::default(),
            head_block_producer: None,
            last_irreversible_block_num: 0,
            current_absolute_slot: 0,
            recent_slots_filled: RecentSlotsFilled::default(),
        }
    }
}

/// Producer list waiting to become active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleProposal {
    pub producers: Vec<AccountName>,
    /// Block the proposal was included in
    pub block_num: BlockNumber,
}

#[derive(Debug, Default, Clone)]
pub struct ChainState {
    pub globals: GlobalProperties,
    pub schedule: ProducerSchedule,
    pub proposal: Option<ScheduleProposal>,
    pub producers: OrdMap<AccountName, ProducerRecord>,
    pub objects: ObjectStore,
    /// Every transaction included on this chain
    pub transaction_ids: OrdSet<TxId>,
}

impl ChainState {
    /// State before block 1
    pub fn genesis(genesis: &GenesisState) -> Self {
        let mut objects = ObjectStore::default();
        let mut transaction = objects.begin();
        for (name, liquid) in &genesis.initial_balances {
            transaction.put(
                ObjectKey::account(name),
                &Account {
                    liquid: *liquid,
                    staked: 0,
                },
            );
        }
        objects.commit(transaction);

        Self {
            globals: GlobalProperties {
                head_block_time: genesis.initial_timestamp,
                ..Default::default()
            },
            schedule: ProducerSchedule::new(0, genesis.producers.clone()),
            proposal: None,
            producers: genesis
                .producers
                .iter()
                .map(|name| (name.clone(), ProducerRecord::default()))
                .collect(),
            objects,
            transaction_ids: OrdSet::new(),
        }
    }

    pub fn producer(&self, name: &AccountName) -> Option<&ProducerRecord> {
        self.producers.get(name)
    }

    pub fn head_block_number(&self) -> BlockNumber {
        self.globals.head_block_number
    }

    pub fn head_block_id(&self) -> BlockId {
        self.globals.head_block_id
    }

    pub fn is_included(&self, id: &TxId) -> bool {
        self.transaction_ids.contains(id)
    }
}
