use deckwright_core::SectionStatus;
use metrics::gauge;
use parking_lot::Mutex;

/// Snapshot of section states for one composition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionCounts {
    pub pending: usize,
    pub generating: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SectionCounts {
    pub fn total(&self) -> usize {
        self.pending + self.generating + self.completed + self.failed
    }

    pub fn settled(&self) -> usize {
        self.completed + self.failed
    }
}

/// In-memory state machine of every section in a running composition.
///
/// Enforces `pending -> generating -> {completed, failed}`; terminal states
/// are sticky. Keeps the `composition_sections_generating` gauge in step.
pub struct SectionTracker {
    statuses: Mutex<Vec<SectionStatus>>,
}

impl SectionTracker {
    pub fn new(total: usize) -> Self {
        Self {
            statuses: Mutex::new(vec![SectionStatus::Pending; total]),
        }
    }

    /// Mark `index` as generating. Returns false unless it was pending.
    pub fn start(&self, index: usize) -> bool {
        let mut statuses = self.statuses.lock();
        match statuses.get_mut(index) {
            Some(status) if *status == SectionStatus::Pending => {
                *status = SectionStatus::Generating;
                gauge!("composition_sections_generating").increment(1.0);
                true
            }
            _ => false,
        }
    }

    /// Move `index` into a terminal state. Returns false if it already was terminal.
    pub fn finish(&self, index: usize, outcome: SectionStatus) -> bool {
        debug_assert!(outcome.is_terminal());
        let mut statuses = self.statuses.lock();
        let Some(status) = statuses.get_mut(index) else {
            return false;
        };
        if status.is_terminal() {
            return false;
        }
        if *status == SectionStatus::Generating {
            gauge!("composition_sections_generating").decrement(1.0);
        }
        *status = outcome;
        true
    }

    pub fn status(&self, index: usize) -> Option<SectionStatus> {
        self.statuses.lock().get(index).copied()
    }

    pub fn counts(&self) -> SectionCounts {
        let statuses = self.statuses.lock();
        let mut counts = SectionCounts::default();
        for status in statuses.iter() {
            match status {
                SectionStatus::Pending => counts.pending += 1,
                SectionStatus::Generating => counts.generating += 1,
                SectionStatus::Completed => counts.completed += 1,
                SectionStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
