//! External-id to store-id index for hash-identified tables.

use starsync_core::{
    row_i64, CompactHashMap, EntityKind, ExternalId, Fingerprint, Result, Row, StoreId, SyncError,
};

/// Outcome of locating a record by its external ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    NotFound,
    Found(StoreId),
}

/// Maps primary and secondary external ids to store ids, and store ids to
/// the fingerprint last written for that row. A row's primary id is also
/// kept by store id so a renumbered primary replaces the old mapping.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    kind: EntityKind,
    by_primary: CompactHashMap<ExternalId, StoreId>,
    by_secondary: CompactHashMap<ExternalId, StoreId>,
    primary_of: CompactHashMap<StoreId, ExternalId>,
    fingerprints: CompactHashMap<StoreId, Fingerprint>,
}

impl IdentityIndex {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            by_primary: CompactHashMap::default(),
            by_secondary: CompactHashMap::default(),
            primary_of: CompactHashMap::default(),
            fingerprints: CompactHashMap::default(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len().max(self.by_primary.len())
    }

    pub fn is_empty(&self) -> bool {
        self.by_primary.is_empty() && self.by_secondary.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_primary.clear();
        self.by_secondary.clear();
        self.primary_of.clear();
        self.fingerprints.clear();
    }

    /// Primary id first, secondary as fallback. A record that names two
    /// different stored rows through its two ids is an error, never
    /// silently attributed to either.
    pub fn resolve(
        &self,
        primary: Option<ExternalId>,
        secondary: Option<ExternalId>,
    ) -> Result<Resolution> {
        if primary.is_none() && secondary.is_none() {
            return Err(SyncError::InvalidRecord {
                entity: self.kind,
                reason: "record carries no external id".to_string(),
            });
        }

        let by_primary = primary.and_then(|p| self.by_primary.get(&p).copied());
        let by_secondary = secondary.and_then(|s| self.by_secondary.get(&s).copied());

        match (by_primary, by_secondary) {
            (Some(a), Some(b)) if a != b => Err(SyncError::IdentityConflict {
                entity: self.kind,
                primary: primary.unwrap_or_default(),
                primary_store: a.0,
                secondary: secondary.unwrap_or_default(),
                secondary_store: b.0,
            }),
            (Some(id), _) | (None, Some(id)) => Ok(Resolution::Found(id)),
            (None, None) => Ok(Resolution::NotFound),
        }
    }

    pub fn by_primary(&self, primary: ExternalId) -> Option<StoreId> {
        self.by_primary.get(&primary).copied()
    }

    pub fn by_secondary(&self, secondary: ExternalId) -> Option<StoreId> {
        self.by_secondary.get(&secondary).copied()
    }

    /// Primary id the row is currently indexed under.
    pub fn primary_of(&self, id: StoreId) -> Option<ExternalId> {
        self.primary_of.get(&id).copied()
    }

    /// `None` when the stored row carried no fingerprint.
    pub fn fingerprint(&self, id: StoreId) -> Option<&Fingerprint> {
        self.fingerprints.get(&id)
    }

    pub fn insert(
        &mut self,
        id: StoreId,
        primary: Option<ExternalId>,
        secondary: Option<ExternalId>,
        fingerprint: Option<Fingerprint>,
    ) {
        if let Some(p) = primary {
            if let Some(old) = self.primary_of.insert(id, p) {
                if old != p && self.by_primary.get(&old) == Some(&id) {
                    self.by_primary.remove(&old);
                }
            }
            self.by_primary.insert(p, id);
        }
        if let Some(s) = secondary {
            self.by_secondary.insert(s, id);
        }
        match fingerprint {
            Some(fp) => {
                self.fingerprints.insert(id, fp);
            }
            None => {
                self.fingerprints.remove(&id);
            }
        }
    }

    /// Index a row read back from the store. Returns false for rows without
    /// an `id` or without any external id.
    pub fn absorb_row(&mut self, row: &Row) -> bool {
        let Some(id) = StoreId::of_row(row) else {
            return false;
        };
        let primary = self.kind.primary_field().and_then(|f| row_i64(row, f));
        let secondary = self.kind.secondary_field().and_then(|f| row_i64(row, f));
        if primary.is_none() && secondary.is_none() {
            return false;
        }
        self.insert(id, primary, secondary, Fingerprint::of_stored_row(row));
        true
    }

    /// Drop the entries reachable from these primary ids. The secondary
    /// map is swept once for the whole set.
    pub fn forget_primaries<'a>(&mut self, primaries: impl IntoIterator<Item = &'a ExternalId>) {
        let mut removed: CompactHashMap<StoreId, ()> = CompactHashMap::default();
        for p in primaries {
            if let Some(id) = self.by_primary.remove(p) {
                self.fingerprints.remove(&id);
                self.primary_of.remove(&id);
                removed.insert(id, ());
            }
        }
        if !removed.is_empty() {
            self.by_secondary.retain(|_, v| !removed.contains_key(v));
        }
    }
}
