use starsync_core::{ExternalId, Fingerprint, Result, Row, StoreId};

use crate::identity::{IdentityIndex, Resolution};

/// Classification of an incoming record against the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    New,
    Unchanged(StoreId),
    Changed(StoreId),
}

/// Fingerprints incoming rows and compares them with what the store holds.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    width: usize,
}

impl ChangeDetector {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn fingerprint(&self, row: &Row) -> Fingerprint {
        Fingerprint::of_row(row, self.width)
    }

    /// A stored row without a fingerprint always counts as changed so the
    /// next write stamps one.
    pub fn classify(
        &self,
        index: &IdentityIndex,
        primary: Option<ExternalId>,
        secondary: Option<ExternalId>,
        incoming: &Fingerprint,
    ) -> Result<Verdict> {
        Ok(match index.resolve(primary, secondary)? {
            Resolution::NotFound => Verdict::New,
            Resolution::Found(id) => match index.fingerprint(id) {
                Some(stored) if stored == incoming => Verdict::Unchanged(id),
                _ => Verdict::Changed(id),
            },
        })
    }
}
