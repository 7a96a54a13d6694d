use std::fmt;

use starsync_core::{EntityKind, Row, StoreId};

/// Write operation kinds, in the order a flush emits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Delete,
    Update,
    Create,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Delete => "delete",
            Operation::Update => "update",
            Operation::Create => "create",
        })
    }
}

/// A single record-level write waiting to be batched.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    Create(Row),
    /// The row carries the store `id` it updates.
    Update(Row),
    Delete(StoreId),
}

impl BatchEntry {
    pub fn operation(&self) -> Operation {
        match self {
            BatchEntry::Create(_) => Operation::Create,
            BatchEntry::Update(_) => Operation::Update,
            BatchEntry::Delete(_) => Operation::Delete,
        }
    }
}

/// A bounded bulk write against one entity table.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchJob {
    Create { kind: EntityKind, rows: Vec<Row> },
    Update { kind: EntityKind, rows: Vec<Row> },
    Delete { kind: EntityKind, ids: Vec<StoreId> },
}

impl BatchJob {
    pub fn kind(&self) -> EntityKind {
        match self {
            BatchJob::Create { kind, .. }
            | BatchJob::Update { kind, .. }
            | BatchJob::Delete { kind, .. } => *kind,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            BatchJob::Create { .. } => Operation::Create,
            BatchJob::Update { .. } => Operation::Update,
            BatchJob::Delete { .. } => Operation::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BatchJob::Create { rows, .. } | BatchJob::Update { rows, .. } => rows.len(),
            BatchJob::Delete { ids, .. } => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What travels over the work queue: a batch, or the per-worker sentinel.
#[derive(Debug)]
pub(crate) enum Job {
    Write {
        seq: u64,
        /// Creates wait for every delete of the same kind up to this sequence.
        after_delete: Option<u64>,
        batch: BatchJob,
    },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Written,
    /// Dropped after logging; the next full import corrects it.
    Lost(String),
}

/// Posted by a worker for every batch it dequeues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub kind: EntityKind,
    pub operation: Operation,
    pub rows: usize,
    pub rows_written: usize,
    pub retries: u32,
    pub status: OutcomeStatus,
}

/// Totals for one dispatcher lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub jobs: usize,
    pub rows_written: usize,
    pub rows_lost: usize,
    pub lost_jobs: usize,
    pub retries: u64,
}

impl DispatchReport {
    pub fn record(&mut self, outcome: &JobOutcome) {
        self.jobs += 1;
        self.rows_written += outcome.rows_written;
        self.rows_lost += outcome.rows - outcome.rows_written.min(outcome.rows);
        self.retries += u64::from(outcome.retries);
        if matches!(outcome.status, OutcomeStatus::Lost(_)) {
            self.lost_jobs += 1;
        }
    }
}
