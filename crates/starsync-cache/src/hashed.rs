use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use starsync_client::RemoteStore;
use starsync_core::{
    CompactHashMap, ExternalId, Fingerprint, HashedRecord, Result, Row, StoreId, SyncError,
    FINGERPRINT_FIELD, ID_FIELD,
};
use starsync_queue::BatchEntry;
use tracing::{debug, warn};

use crate::cache::SyncCache;
use crate::detector::{ChangeDetector, Verdict};
use crate::identity::IdentityIndex;
use crate::session::BulkSession;
use crate::state::CacheCore;

/// What `find_or_add` did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Id is known when the create was synchronous; queued creates learn
    /// theirs at the next refresh.
    Created(Option<StoreId>),
    Updated(StoreId),
    Unchanged(StoreId),
    /// Same external id and content as a create already queued this session.
    Duplicate,
    /// Same external id as a queued create but different content; dropped.
    Skipped,
}

impl Outcome {
    pub fn id(&self) -> Option<StoreId> {
        match self {
            Outcome::Created(id) => *id,
            Outcome::Updated(id) | Outcome::Unchanged(id) => Some(*id),
            Outcome::Duplicate | Outcome::Skipped => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Outcome::Created(_) | Outcome::Updated(_))
    }
}

/// Cache for an entity located by external id and compared by fingerprint.
pub struct HashedCache<R> {
    core: CacheCore,
    store: Arc<dyn RemoteStore>,
    index: IdentityIndex,
    detector: ChangeDetector,
    pending_primary: CompactHashMap<ExternalId, Fingerprint>,
    pending_secondary: CompactHashMap<ExternalId, Fingerprint>,
    _record: PhantomData<fn(&R)>,
}

impl<R: HashedRecord> HashedCache<R> {
    pub fn new(store: Arc<dyn RemoteStore>, fingerprint_width: usize) -> Self {
        Self {
            core: CacheCore::new(R::KIND),
            store,
            index: IdentityIndex::new(R::KIND),
            detector: ChangeDetector::new(fingerprint_width),
            pending_primary: CompactHashMap::default(),
            pending_secondary: CompactHashMap::default(),
            _record: PhantomData,
        }
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    /// Store id for a primary external id, if indexed.
    pub fn id(&self, primary: ExternalId) -> Option<StoreId> {
        self.index.by_primary(primary)
    }

    /// Creates queued this session and not yet refreshed.
    pub fn pending_creates(&self) -> usize {
        self.pending_primary.len().max(self.pending_secondary.len())
    }

    /// Classify the record and write or queue whatever it needs. `bulk` is
    /// required while the cache is accumulating.
    pub fn find_or_add(&mut self, record: &R, bulk: Option<&mut BulkSession>) -> Result<Outcome> {
        self.core.ensure_accepts_records()?;
        let kind = R::KIND;
        let primary = record.primary_id();
        let secondary = record.secondary_id();

        let mut row = record.to_row()?;
        row.remove(ID_FIELD);
        row.remove(FINGERPRINT_FIELD);
        let fingerprint = self.detector.fingerprint(&row);

        match self.detector.classify(&self.index, primary, secondary, &fingerprint)? {
            Verdict::Unchanged(id) => Ok(Outcome::Unchanged(id)),
            Verdict::Changed(id) => {
                // found through the secondary id under a new primary
                let renumbered = self.index.primary_of(id).filter(|old| Some(*old) != primary);
                row.insert(ID_FIELD.to_string(), Value::from(id));
                row.insert(FINGERPRINT_FIELD.to_string(), Value::from(fingerprint.as_str()));
                if self.core.is_bulk() {
                    self.require_session(bulk)?.queue(kind, BatchEntry::Update(row))?;
                    self.touch(primary);
                    if let Some(old) = renumbered {
                        self.core.touch(old);
                    }
                } else {
                    self.store.bulk_update(kind, &[row])?;
                }
                self.index.insert(id, primary, secondary, Some(fingerprint));
                Ok(Outcome::Updated(id))
            }
            Verdict::New => {
                if let Some(outcome) = self.pending_duplicate(primary, secondary, &fingerprint) {
                    return Ok(outcome);
                }
                row.insert(FINGERPRINT_FIELD.to_string(), Value::from(fingerprint.as_str()));
                if self.core.is_bulk() {
                    self.require_session(bulk)?.queue(kind, BatchEntry::Create(row))?;
                    if let Some(p) = primary {
                        self.pending_primary.insert(p, fingerprint.clone());
                    }
                    if let Some(s) = secondary {
                        self.pending_secondary.insert(s, fingerprint);
                    }
                    self.touch(primary);
                    Ok(Outcome::Created(None))
                } else {
                    let created = self.store.create(kind, row)?;
                    let id = StoreId::of_row(&created).ok_or_else(|| {
                        SyncError::Decode(format!("created {} row has no id", kind))
                    })?;
                    self.index.insert(id, primary, secondary, Some(fingerprint));
                    Ok(Outcome::Created(Some(id)))
                }
            }
        }
    }

    fn require_session<'a>(&self, bulk: Option<&'a mut BulkSession>) -> Result<&'a mut BulkSession> {
        bulk.ok_or_else(|| SyncError::InvalidState {
            entity: R::KIND,
            message: "accumulating without a bulk session".to_string(),
        })
    }

    /// Records identified only by the secondary id cannot be found again
    /// by a filter on the primary field.
    fn touch(&mut self, primary: Option<ExternalId>) {
        match primary {
            Some(p) => self.core.touch(p),
            None => self.core.require_full(),
        }
    }

    fn pending_duplicate(
        &self,
        primary: Option<ExternalId>,
        secondary: Option<ExternalId>,
        fingerprint: &Fingerprint,
    ) -> Option<Outcome> {
        let queued = primary
            .and_then(|p| self.pending_primary.get(&p))
            .or_else(|| secondary.and_then(|s| self.pending_secondary.get(&s)))?;
        if queued == fingerprint {
            debug!("{} {:?} already queued for create", R::KIND, primary.or(secondary));
            Some(Outcome::Duplicate)
        } else {
            warn!(
                "{} {:?} delivered twice with different content; keeping the first",
                R::KIND,
                primary.or(secondary)
            );
            Some(Outcome::Skipped)
        }
    }

    fn clear_pending(&mut self) {
        self.pending_primary.clear();
        self.pending_secondary.clear();
    }
}

impl<R: HashedRecord> SyncCache for HashedCache<R> {
    fn core(&self) -> &CacheCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CacheCore {
        &mut self.core
    }

    fn identity(&self) -> Option<&IdentityIndex> {
        Some(&self.index)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn clear_index(&mut self) {
        self.index.clear();
        self.clear_pending();
    }

    fn forget(&mut self, touched: &BTreeSet<i64>) {
        self.index.forget_primaries(touched);
        self.clear_pending();
    }

    fn absorb(&mut self, row: Row) {
        if !self.index.absorb_row(&row) {
            debug!("ignoring {} row without id or external id", R::KIND);
        }
    }
}
