//! Producer schedule: which producer owns which slot, and when slots start.
//!
//! Slots are counted relative to the head block. Slot `n` starts `n` block
//! intervals after the head's (aligned) time; slot 1 is the first slot a new
//! block can use. The absolute slot counter carried in the chain state maps
//! relative slots onto the rotating producer list.

use std::collections::BTreeMap;

use rota_common::{AbsoluteSlot, AccountName, BlockTimestamp};
use serde::{Deserialize, Serialize};

/// Ordered list of producers valid for the current round
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerSchedule {
    /// Incremented each time a proposed schedule becomes active
    pub version: u32,
    pub producers: Vec<AccountName>,
}

impl ProducerSchedule {
    pub fn new(version: u32, producers: Vec<AccountName>) -> Self {
        Self { version, producers }
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn contains(&self, name: &AccountName) -> bool {
        self.producers.contains(name)
    }

    /// Producer owning `absolute_slot`; each producer holds `repetitions`
    /// consecutive slots before the next one takes over.
    pub fn producer_at(
        &self,
        absolute_slot: AbsoluteSlot,
        repetitions: u64,
    ) -> Option<&AccountName> {
        if self.producers.is_empty() {
            return None;
        }
        let cycle = self.producers.len() as u64 * repetitions.max(1);
        let index = (absolute_slot % cycle) / repetitions.max(1);
        self.producers.get(index as usize)
    }

    /// Slots missed per producer for the `count` slots after `after`,
    /// leaving out `except`.
    pub fn missed_slots(
        &self,
        after: AbsoluteSlot,
        count: u64,
        repetitions: u64,
        except: &AccountName,
    ) -> BTreeMap<AccountName, u64> {
        let mut missed = BTreeMap::new();
        if self.producers.is_empty() || count == 0 {
            return missed;
        }

        let repetitions = repetitions.max(1);
        let cycle = self.producers.len() as u64 * repetitions;

        // Whole rotations charge every producer equally
        let full_cycles = count / cycle;
        if full_cycles > 0 {
            for producer in self.producers.iter().filter(|p| *p != except) {
                *missed.entry(producer.clone()).or_insert(0) += full_cycles * repetitions;
            }
        }

        let first_partial = after + 1 + full_cycles * cycle;
        for slot in first_partial..after + 1 + count {
            if let Some(producer) = self.producer_at(slot, repetitions) {
                if producer != except {
                    *missed.entry(producer.clone()).or_insert(0) += 1;
                }
            }
        }
        missed
    }
}

/// Start time of slot `n` counted from a head block at `head_time`
pub fn slot_time(head_time: BlockTimestamp, interval: u64, slot: u64) -> BlockTimestamp {
    let interval = interval.max(1);
    let base = head_time.0 - head_time.0 % interval;
    BlockTimestamp(base + slot * interval)
}

/// Slot containing `time`, or `None` before slot 1
pub fn slot_at_time(head_time: BlockTimestamp, interval: u64, time: BlockTimestamp) -> Option<u64> {
    let interval = interval.max(1);
    let first = slot_time(head_time, interval, 1);
    if time < first {
        return None;
    }
    Some((time.0 - first.0) / interval + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<AccountName> {
        list.iter().map(|n| AccountName::new(n).unwrap()).collect()
    }

    #[test]
    fn slot_time_and_inverse() {
        let head = BlockTimestamp(1_500_000_000);
        assert_eq!(slot_time(head, 3, 1), BlockTimestamp(1_500_000_003));
        assert_eq!(slot_time(head, 3, 4), BlockTimestamp(1_500_000_012));
        assert_eq!(slot_at_time(head, 3, BlockTimestamp(1_500_000_002)), None);
        assert_eq!(slot_at_time(head, 3, BlockTimestamp(1_500_000_003)), Some(1));
        assert_eq!(slot_at_time(head, 3, BlockTimestamp(1_500_000_005)), Some(1));
        assert_eq!(slot_at_time(head, 3, BlockTimestamp(1_500_000_012)), Some(4));
    }

    #[test]
    fn unaligned_head_rounds_down() {
        let head = BlockTimestamp(1_500_000_001);
        assert_eq!(slot_time(head, 3, 1), BlockTimestamp(1_500_000_003));
    }

    #[test]
    fn rotation_with_repetitions() {
        let schedule = ProducerSchedule::new(0, names(&["inita", "initb", "initc"]));
        let order: Vec<_> =
            (0..7).map(|s| schedule.producer_at(s, 1).unwrap().as_str().to_string()).collect();
        assert_eq!(order, ["inita", "initb", "initc", "inita", "initb", "initc", "inita"]);

        let order: Vec<_> =
            (0..7).map(|s| schedule.producer_at(s, 2).unwrap().as_str().to_string()).collect();
        assert_eq!(order, ["inita", "inita", "initb", "initb", "initc", "initc", "inita"]);

        assert!(ProducerSchedule::default().producer_at(3, 1).is_none());
    }

    #[test]
    fn missed_slots_skip_the_producer() {
        let schedule = ProducerSchedule::new(0, names(&["inita", "initb", "initc", "initd"]));
        let me = AccountName::new("initc").unwrap();

        // Slots 1 and 2 belong to initb and initc
        let missed = schedule.missed_slots(0, 2, 1, &me);
        assert_eq!(missed.len(), 1);
        assert_eq!(missed[&AccountName::new("initb").unwrap()], 1);

        // Nine slots after slot 0: two full rotations plus initb
        let missed = schedule.missed_slots(0, 9, 1, &me);
        assert_eq!(missed[&AccountName::new("inita").unwrap()], 2);
        assert_eq!(missed[&AccountName::new("initb").unwrap()], 3);
        assert_eq!(missed[&AccountName::new("initd").unwrap()], 2);
        assert!(!missed.contains_key(&me));
    }

    #[test]
    fn missed_slots_match_naive_count() {
        let schedule = ProducerSchedule::new(0, names(&["inita", "initb", "initc"]));
        let me = AccountName::new("inita").unwrap();
        for after in 0..6 {
            for count in 0..20 {
                let fast = schedule.missed_slots(after, count, 2, &me);
                let mut naive = BTreeMap::new();
                for slot in after + 1..=after + count {
                    let p = schedule.producer_at(slot, 2).unwrap();
                    if *p != me {
                        *naive.entry(p.clone()).or_insert(0u64) += 1;
                    }
                }
                assert_eq!(fast, naive, "after {after} count {count}");
            }
        }
    }
}
