use serde::Serialize;
use starsync_queue::DispatchReport;

use crate::planner::RefreshReport;

/// Per-session counters of what the caches decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub read: u64,
    pub unchanged: u64,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Duplicates within the session, invalid records, unresolvable writes.
    pub skipped: u64,
    pub conflicts: u64,
}

impl SessionStats {
    /// Records that resulted in at least one write.
    pub fn changed(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    pub fn merge(&mut self, other: &SessionStats) {
        self.read += other.read;
        self.unchanged += other.unchanged;
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.conflicts += other.conflicts;
    }
}

/// Returned by `Universe::end_session`.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub stats: SessionStats,
    pub dispatch: DispatchReport,
    pub refreshes: Vec<RefreshReport>,
}
