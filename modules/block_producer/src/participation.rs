//! Rolling record of which recent slots were filled

use rota_common::params::PARTICIPATION_WINDOW;
use rota_common::PERCENT_100;
use serde::{Deserialize, Serialize};

/// Bit 0 is the newest slot; a set bit means a block was produced in it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentSlotsFilled(pub u64);

impl Default for RecentSlotsFilled {
    /// Genesis counts as full participation
    fn default() -> Self {
        Self(u64::MAX)
    }
}

impl RecentSlotsFilled {
    /// A block arrived after `missed` empty slots
    pub fn record(&mut self, missed: u64) {
        self.0 = if missed >= PARTICIPATION_WINDOW {
            0
        } else {
            ((self.0 << 1) | 1) << missed
        };
    }

    /// Share of filled slots in the window, in basis points
    pub fn rate(&self) -> u64 {
        u64::from(self.0.count_ones()) * PERCENT_100 / PARTICIPATION_WINDOW
    }

    /// Newest slot first
    pub fn to_bit_string(&self) -> String {
        (0..PARTICIPATION_WINDOW).map(|i| if self.0 >> i & 1 == 1 { '1' } else { '0' }).collect()
    }
}
