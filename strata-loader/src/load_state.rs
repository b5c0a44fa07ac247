use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Progress of one progressive load. Levels are indexed from the most detailed (0) to the least
/// detailed (N - 1) and arrive least detailed first, so the epoch index only goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unstarted,
    // Levels [k, N) are available
    Epoch(usize),
    Complete,
    Failed,
}

impl LoadState {
    /// State after an epoch that made levels down to `first_available_level` available
    pub fn after_epoch(first_available_level: usize) -> Self {
        if first_available_level == 0 {
            LoadState::Complete
        } else {
            LoadState::Epoch(first_available_level)
        }
    }

    /// Index of the first level that has not been fetched yet, counting down from `num_levels`
    pub fn remaining_levels(
        &self,
        num_levels: usize,
    ) -> usize {
        match *self {
            LoadState::Unstarted => num_levels,
            LoadState::Epoch(k) => k,
            LoadState::Complete => 0,
            LoadState::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Complete | LoadState::Failed)
    }
}

/// Levels fetched by the epoch that follows `remaining_levels`: up to `levels_per_epoch` of the
/// most detailed levels not fetched yet
pub fn next_level_range(
    remaining_levels: usize,
    levels_per_epoch: usize,
) -> Range<usize> {
    let width = levels_per_epoch.max(1);
    remaining_levels.saturating_sub(width)..remaining_levels
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    // How many LODs/MIPs a single epoch fetches
    pub levels_per_epoch: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            levels_per_epoch: 1,
        }
    }
}
