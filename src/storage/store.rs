use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Dataset, Error};

/// Owns the authoritative dataset and its high-watermark.
///
/// The lock is held for `replace`, `merge` and the copy inside `snapshot`
/// only. Callers do all I/O and query work outside of it.
pub struct DatasetStore {
    state: Mutex<StoreState>,
}

struct StoreState {
    dataset: Dataset,
    watermark: Option<DateTime<Utc>>,
    stats: StoreStats,
}

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub merges: usize,
    pub rows_received: usize,
    pub duplicates_resolved: usize,
    pub last_merge: Option<DateTime<Utc>>,
}

/// What a single merge did to the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    pub received: usize,
    pub added: usize,
    pub duplicates: usize,
}

impl Default for DatasetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                dataset: Dataset::empty(),
                watermark: None,
                stats: StoreStats::default(),
            }),
        }
    }

    /// Installs the initial dataset. The watermark becomes its latest
    /// timestamp, or unset when it is empty.
    pub fn replace(&self, initial: Dataset) {
        let mut state = self.state.lock();
        state.watermark = initial.max_time();
        log::info!(
            "Dataset replaced: {} rows, watermark {:?}",
            initial.num_rows(),
            state.watermark
        );
        state.dataset = initial;
    }

    /// Appends `records`, keeps the last write per timestamp, re-sorts and
    /// moves the watermark to the new maximum. On error nothing changes.
    pub fn merge(&self, records: Dataset) -> Result<MergeOutcome, Error> {
        let received = records.num_rows();
        if received == 0 {
            return Ok(MergeOutcome {
                received: 0,
                added: 0,
                duplicates: 0,
            });
        }

        let mut state = self.state.lock();
        let before = state.dataset.num_rows();
        let (merged, duplicates) = state.dataset.merge(&records)?;

        let added = merged.num_rows().saturating_sub(before);
        // The previous rows are all still present, so the maximum cannot go back.
        state.watermark = merged.max_time().max(state.watermark);
        state.dataset = merged;

        state.stats.merges += 1;
        state.stats.rows_received += received;
        state.stats.duplicates_resolved += duplicates;
        state.stats.last_merge = Some(Utc::now());

        log::debug!(
            "Merged {} rows ({} new, {} duplicates); dataset now {} rows",
            received,
            added,
            duplicates,
            state.dataset.num_rows()
        );

        Ok(MergeOutcome {
            received,
            added,
            duplicates,
        })
    }

    /// Independent copy of the current dataset for read-side work.
    pub fn snapshot(&self) -> Dataset {
        self.state.lock().dataset.clone()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.state.lock().watermark
    }

    pub fn len(&self) -> usize {
        self.state.lock().dataset.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        self.state.lock().stats.clone()
    }
}
