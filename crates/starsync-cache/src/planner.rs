//! End-of-session reconciliation of a cache with the store.
//!
//! A cache whose kind has a partial field and touched few enough values
//! reloads only the rows matching them; everything else reloads in full.
//! Before that decision, the touched values are pushed to the dependents
//! registered for the cache's kind.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use starsync_core::{EntityKind, Result, SyncError};
use tracing::{debug, info, warn};

use crate::cache::SyncCache;
use crate::identity::IdentityIndex;
use crate::loader::TableLoader;
use crate::state::CacheState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// Nothing was written; the index already mirrors the store.
    Skipped,
    Partial,
    Full,
}

impl fmt::Display for RefreshKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefreshKind::Skipped => "skipped",
            RefreshKind::Partial => "partial",
            RefreshKind::Full => "full",
        })
    }
}

/// Partial only when the kind can filter and `2 * touched < threshold`;
/// the boundary `2 * touched == threshold` reloads in full.
pub fn choose(
    partial_field: Option<&str>,
    touched: usize,
    threshold: usize,
    force_full: bool,
) -> RefreshKind {
    if force_full {
        return RefreshKind::Full;
    }
    if touched == 0 {
        return RefreshKind::Skipped;
    }
    match partial_field {
        Some(_) if touched.saturating_mul(2) < threshold => RefreshKind::Partial,
        _ => RefreshKind::Full,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub kind: EntityKind,
    pub refresh: RefreshKind,
    pub rows: usize,
}

/// Initial population by a full scan.
pub fn load(cache: &mut dyn SyncCache, loader: &TableLoader) -> Result<usize> {
    let kind = cache.kind();
    cache.clear_index();
    let rows = loader.scan_all(kind, &mut |row| cache.absorb(row))?;
    cache.core_mut().transition(CacheState::Loaded)?;
    info!("loaded {} cache: {} rows, {} indexed", kind, rows, cache.len());
    Ok(rows)
}

/// Consume the cache's pending list and bring its index back in line with
/// the store. Valid from `Flushing`, or from `Loaded` when a parent
/// cascaded into a cache that was not part of the session.
pub fn refresh(
    cache: &mut dyn SyncCache,
    loader: &TableLoader,
    threshold: usize,
) -> Result<RefreshReport> {
    let kind = cache.kind();
    let (touched, force_full) = cache.core_mut().take_pending();
    let refresh = choose(kind.partial_field(), touched.len(), threshold, force_full);

    let rows = match (refresh, kind.partial_field()) {
        (RefreshKind::Skipped, _) => 0,
        (RefreshKind::Partial, Some(field)) => {
            cache.forget(&touched);
            let values: Vec<i64> = touched.iter().copied().collect();
            loader.scan_matching(kind, field, &values, &mut |row| cache.absorb(row))?
        }
        (RefreshKind::Partial, None) | (RefreshKind::Full, _) => {
            cache.clear_index();
            loader.scan_all(kind, &mut |row| cache.absorb(row))?
        }
    };

    cache.core_mut().transition(CacheState::Loaded)?;
    debug!(
        "{} refresh of {} ({} touched, threshold {}): {} rows",
        refresh,
        kind,
        touched.len(),
        threshold,
        rows
    );
    Ok(RefreshReport {
        kind,
        refresh,
        rows,
    })
}

type Translate = dyn Fn(&IdentityIndex, &BTreeSet<i64>) -> Result<Vec<i64>> + Send + Sync;

/// "When `parent` changes, `dependent` must be refreshed for the same rows."
///
/// The translation maps the parent's touched partial-field values into
/// the dependent's partial-field space.
pub struct DependentLink {
    pub parent: EntityKind,
    pub dependent: EntityKind,
    translate: Box<Translate>,
}

impl DependentLink {
    pub fn new(
        parent: EntityKind,
        dependent: EntityKind,
        translate: impl Fn(&IdentityIndex, &BTreeSet<i64>) -> Result<Vec<i64>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            parent,
            dependent,
            translate: Box::new(translate),
        }
    }

    /// Dependent rows reference the parent by store id; the parent's
    /// touched values are its primary external ids. Parents not indexed
    /// yet own no cached dependent rows and are skipped.
    pub fn by_store_id(parent: EntityKind, dependent: EntityKind) -> Self {
        Self::new(parent, dependent, |index, touched| {
            Ok(touched
                .iter()
                .filter_map(|primary| index.by_primary(*primary))
                .map(|id| i64::from(id.0))
                .collect())
        })
    }

    pub fn translate(&self, index: &IdentityIndex, touched: &BTreeSet<i64>) -> Result<Vec<i64>> {
        (self.translate)(index, touched).map_err(|e| match e {
            cascade @ SyncError::Cascade { .. } => cascade,
            other => SyncError::Cascade {
                parent: self.parent,
                dependent: self.dependent,
                message: other.to_string(),
            },
        })
    }
}

impl fmt::Debug for DependentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentLink")
            .field("parent", &self.parent)
            .field("dependent", &self.dependent)
            .finish()
    }
}

/// What a dependent should do after a parent's cascade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cascade {
    Touch(EntityKind, Vec<i64>),
    FullRefresh(EntityKind),
}

#[derive(Debug, Default)]
pub struct DependencyRegistry {
    links: Vec<DependentLink>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Station joins follow their station, body compositions their body.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for dependent in [
            EntityKind::StationImport,
            EntityKind::StationExport,
            EntityKind::StationProhibited,
            EntityKind::StationShip,
        ] {
            registry.register(DependentLink::by_store_id(EntityKind::Station, dependent));
        }
        for dependent in [
            EntityKind::BodyAtmosphere,
            EntityKind::BodySolid,
            EntityKind::BodyMaterial,
        ] {
            registry.register(DependentLink::by_store_id(EntityKind::Body, dependent));
        }
        registry
    }

    pub fn register(&mut self, link: DependentLink) {
        self.links.push(link);
    }

    pub fn dependents_of(&self, parent: EntityKind) -> impl Iterator<Item = &DependentLink> {
        self.links.iter().filter(move |l| l.parent == parent)
    }

    /// A failing translation never fails the parent: the dependent falls
    /// back to a full refresh instead.
    pub fn cascade(&self, parent: &dyn SyncCache) -> Vec<Cascade> {
        let touched = parent.core().touched();
        let mut out = Vec::new();
        if touched.is_empty() {
            return out;
        }
        let Some(index) = parent.identity() else {
            return out;
        };
        for link in self.dependents_of(parent.kind()) {
            match link.translate(index, touched) {
                Ok(values) if values.is_empty() => {}
                Ok(values) => out.push(Cascade::Touch(link.dependent, values)),
                Err(e) => {
                    warn!("{}; falling back to a full refresh of {}", e, link.dependent);
                    out.push(Cascade::FullRefresh(link.dependent));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starsync_core::{Fingerprint, StoreId};

    #[test]
    fn boundary_chooses_full() {
        let field = Some("eddb_id");
        assert_eq!(choose(field, 499, 1000, false), RefreshKind::Partial);
        assert_eq!(choose(field, 500, 1000, false), RefreshKind::Full);
        assert_eq!(choose(field, 501, 1000, false), RefreshKind::Full);
        assert_eq!(choose(field, 1, 1000, true), RefreshKind::Full);
        assert_eq!(choose(None, 1, 1000, false), RefreshKind::Full);
        assert_eq!(choose(field, 0, 1000, false), RefreshKind::Skipped);
    }

    #[test]
    fn store_id_translation_skips_unknown_parents() {
        let mut index = IdentityIndex::new(EntityKind::Station);
        index.insert(StoreId(12), Some(3), None, Some(Fingerprint::from_stored("00000000")));
        let link = DependentLink::by_store_id(EntityKind::Station, EntityKind::StationExport);
        let touched: BTreeSet<i64> = [3, 4].into_iter().collect();
        assert_eq!(link.translate(&index, &touched).unwrap(), vec![12]);
    }

    #[test]
    fn translation_errors_become_cascade_errors() {
        let index = IdentityIndex::new(EntityKind::Body);
        let link = DependentLink::new(EntityKind::Body, EntityKind::BodySolid, |_, _| {
            Err(SyncError::Decode("no mapping".into()))
        });
        let err = link.translate(&index, &BTreeSet::new()).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Cascade {
                parent: EntityKind::Body,
                dependent: EntityKind::BodySolid,
                ..
            }
        ));
    }

    #[test]
    fn default_links() {
        let registry = DependencyRegistry::with_defaults();
        assert_eq!(registry.dependents_of(EntityKind::Station).count(), 4);
        assert_eq!(registry.dependents_of(EntityKind::Body).count(), 3);
        assert_eq!(registry.dependents_of(EntityKind::System).count(), 0);
    }
}
