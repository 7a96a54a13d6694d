//! The session context: every entity cache, the dependency registry and
//! the open bulk session, owned together and passed by reference.

use std::collections::BTreeMap;
use std::sync::Arc;

use starsync_client::RemoteStore;
use starsync_core::{
    Body, Commodity, EntityKind, ExternalId, Faction, Listing, Result, Shape, Station, StoreId,
    SyncConfig, SyncError, System,
};
use starsync_queue::{BatchSink, WriteDispatcher};
use tracing::{debug, info};

use crate::cache::SyncCache;
use crate::composition::{CompositionCache, ShareChange};
use crate::hashed::{HashedCache, Outcome};
use crate::join_set::{JoinChange, JoinSetCache};
use crate::loader::TableLoader;
use crate::lookup::LookupCache;
use crate::planner::{self, Cascade, DependencyRegistry, DependentLink};
use crate::session::BulkSession;
use crate::state::CacheState;
use crate::stats::{SessionStats, SessionSummary};

pub struct Universe {
    store: Arc<dyn RemoteStore>,
    config: SyncConfig,
    loader: TableLoader,
    lookups: BTreeMap<EntityKind, LookupCache>,
    factions: HashedCache<Faction>,
    systems: HashedCache<System>,
    bodies: HashedCache<Body>,
    stations: HashedCache<Station>,
    commodities: HashedCache<Commodity>,
    listings: HashedCache<Listing>,
    joins: BTreeMap<EntityKind, JoinSetCache>,
    compositions: BTreeMap<EntityKind, CompositionCache>,
    dependencies: DependencyRegistry,
    bulk: Option<BulkSession>,
    stats: SessionStats,
}

impl Universe {
    /// Every cache starts `Uninitialized`; `prepare` or `begin_bulk` loads
    /// the ones a run needs.
    pub fn new(store: Arc<dyn RemoteStore>, config: &SyncConfig) -> Result<Self> {
        let width = config.fingerprint.width;
        let mut lookups = BTreeMap::new();
        let mut joins = BTreeMap::new();
        let mut compositions = BTreeMap::new();
        for kind in EntityKind::ALL {
            match kind.shape() {
                Shape::Lookup => {
                    lookups.insert(kind, LookupCache::new(kind, store.clone()));
                }
                Shape::JoinSet => {
                    joins.insert(kind, JoinSetCache::new(kind, store.clone())?);
                }
                Shape::Composition => {
                    compositions.insert(kind, CompositionCache::new(kind, store.clone())?);
                }
                Shape::Hashed => {}
            }
        }

        Ok(Self {
            loader: TableLoader::new(store.clone(), &config.store),
            factions: HashedCache::new(store.clone(), width),
            systems: HashedCache::new(store.clone(), width),
            bodies: HashedCache::new(store.clone(), width),
            stations: HashedCache::new(store.clone(), width),
            commodities: HashedCache::new(store.clone(), width),
            listings: HashedCache::new(store.clone(), width),
            store,
            config: config.clone(),
            lookups,
            joins,
            compositions,
            dependencies: DependencyRegistry::with_defaults(),
            bulk: None,
            stats: SessionStats::default(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn register_dependent(&mut self, link: DependentLink) {
        self.dependencies.register(link);
    }

    pub fn cache(&self, kind: EntityKind) -> Result<&dyn SyncCache> {
        let cache: Option<&dyn SyncCache> = match kind {
            EntityKind::Faction => Some(&self.factions as &dyn SyncCache),
            EntityKind::System => Some(&self.systems as &dyn SyncCache),
            EntityKind::Body => Some(&self.bodies as &dyn SyncCache),
            EntityKind::Station => Some(&self.stations as &dyn SyncCache),
            EntityKind::Commodity => Some(&self.commodities as &dyn SyncCache),
            EntityKind::Listing => Some(&self.listings as &dyn SyncCache),
            _ => match kind.shape() {
                Shape::Lookup => self.lookups.get(&kind).map(|c| c as &dyn SyncCache),
                Shape::JoinSet => self.joins.get(&kind).map(|c| c as &dyn SyncCache),
                Shape::Composition => self.compositions.get(&kind).map(|c| c as &dyn SyncCache),
                Shape::Hashed => None,
            },
        };
        cache.ok_or_else(|| SyncError::Config(format!("no cache registered for {}", kind)))
    }

    pub fn cache_mut(&mut self, kind: EntityKind) -> Result<&mut dyn SyncCache> {
        let cache: Option<&mut dyn SyncCache> = match kind {
            EntityKind::Faction => Some(&mut self.factions as &mut dyn SyncCache),
            EntityKind::System => Some(&mut self.systems as &mut dyn SyncCache),
            EntityKind::Body => Some(&mut self.bodies as &mut dyn SyncCache),
            EntityKind::Station => Some(&mut self.stations as &mut dyn SyncCache),
            EntityKind::Commodity => Some(&mut self.commodities as &mut dyn SyncCache),
            EntityKind::Listing => Some(&mut self.listings as &mut dyn SyncCache),
            _ => match kind.shape() {
                Shape::Lookup => self.lookups.get_mut(&kind).map(|c| c as &mut dyn SyncCache),
                Shape::JoinSet => self.joins.get_mut(&kind).map(|c| c as &mut dyn SyncCache),
                Shape::Composition => self
                    .compositions
                    .get_mut(&kind)
                    .map(|c| c as &mut dyn SyncCache),
                Shape::Hashed => None,
            },
        };
        cache.ok_or_else(|| SyncError::Config(format!("no cache registered for {}", kind)))
    }

    pub fn state(&self, kind: EntityKind) -> Result<CacheState> {
        Ok(self.cache(kind)?.core().state())
    }

    /// Full scan of every listed cache that has not been loaded yet.
    pub fn prepare(&mut self, kinds: &[EntityKind]) -> Result<()> {
        let loader = self.loader.clone();
        for kind in kinds {
            let cache = self.cache_mut(*kind)?;
            if cache.core().state() == CacheState::Uninitialized {
                planner::load(cache, &loader)?;
            }
        }
        Ok(())
    }

    pub fn in_session(&self) -> bool {
        self.bulk.is_some()
    }

    /// Enter bulk mode for `kinds`, writing through a fresh worker pool.
    pub fn begin_bulk(&mut self, kinds: &[EntityKind]) -> Result<()> {
        self.ensure_no_session()?;
        self.prepare(kinds)?;
        let dispatcher = WriteDispatcher::start(self.store.clone(), self.config.dispatch.clone())?;
        self.begin_bulk_with(kinds, Box::new(dispatcher))
    }

    /// Enter bulk mode with a caller-supplied sink.
    pub fn begin_bulk_with(&mut self, kinds: &[EntityKind], sink: Box<dyn BatchSink>) -> Result<()> {
        self.ensure_no_session()?;
        if kinds.is_empty() {
            return Err(SyncError::Session("bulk session without entity kinds".to_string()));
        }
        self.prepare(kinds)?;
        for kind in kinds {
            let state = self.state(*kind)?;
            if !state.can_transition_to(CacheState::Accumulating) {
                return Err(SyncError::InvalidState {
                    entity: *kind,
                    message: format!("cannot enter bulk mode while {}", state),
                });
            }
        }

        let mut session = BulkSession::new(self.config.batching.clone(), sink);
        for kind in kinds {
            self.cache_mut(*kind)?
                .core_mut()
                .transition(CacheState::Accumulating)?;
            session.enroll(*kind);
        }
        self.bulk = Some(session);
        self.stats = SessionStats::default();
        info!("bulk session started: {:?}", kinds);
        Ok(())
    }

    fn ensure_no_session(&self) -> Result<()> {
        if self.bulk.is_some() {
            return Err(SyncError::Session("a bulk session is already open".to_string()));
        }
        Ok(())
    }

    /// Drain every batch, wait for the workers, then cascade touched
    /// parents into their dependents and refresh each affected cache,
    /// parents before dependents.
    pub fn end_session(&mut self) -> Result<SessionSummary> {
        let session = self
            .bulk
            .take()
            .ok_or_else(|| SyncError::Session("no bulk session is open".to_string()))?;
        let kinds: Vec<EntityKind> = session.kinds().iter().copied().collect();
        for kind in &kinds {
            self.cache_mut(*kind)?
                .core_mut()
                .transition(CacheState::Flushing)?;
        }

        let dispatch = session.finish()?;

        let loader = self.loader.clone();
        let mut refreshes = Vec::new();
        for kind in EntityKind::ALL {
            let cache = self.cache(kind)?;
            let due = kinds.contains(&kind)
                || (cache.core().state() == CacheState::Loaded && cache.core().has_pending_refresh());
            if !due {
                continue;
            }
            let cascades = self.dependencies.cascade(cache);
            self.apply_cascades(cascades)?;

            let threshold = self.config.batching.threshold(kind);
            let report = planner::refresh(self.cache_mut(kind)?, &loader, threshold)?;
            refreshes.push(report);
        }

        let stats = std::mem::take(&mut self.stats);
        info!(
            "session complete: {} read, {} changed ({} created, {} updated, {} deleted), {} skipped, {} conflicts",
            stats.read,
            stats.changed(),
            stats.created,
            stats.updated,
            stats.deleted,
            stats.skipped,
            stats.conflicts
        );
        Ok(SessionSummary {
            stats,
            dispatch,
            refreshes,
        })
    }

    fn apply_cascades(&mut self, cascades: Vec<Cascade>) -> Result<()> {
        for cascade in cascades {
            let dependent = match &cascade {
                Cascade::Touch(kind, _) | Cascade::FullRefresh(kind) => *kind,
            };
            let cache = self.cache_mut(dependent)?;
            // an unloaded dependent gets a full scan whenever it is first used
            if cache.core().state() == CacheState::Uninitialized {
                continue;
            }
            match cascade {
                Cascade::Touch(_, values) => {
                    debug!("cascade {} values into {}", values.len(), dependent);
                    cache.core_mut().touch_all(values);
                }
                Cascade::FullRefresh(_) => cache.core_mut().require_full(),
            }
        }
        Ok(())
    }

    /// Counters since the session began, or since the last `take_stats`.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn take_stats(&mut self) -> SessionStats {
        std::mem::take(&mut self.stats)
    }

    fn count(&mut self, result: Result<Outcome>) -> Result<Outcome> {
        self.stats.read += 1;
        match &result {
            Ok(Outcome::Created(_)) => self.stats.created += 1,
            Ok(Outcome::Updated(_)) => self.stats.updated += 1,
            Ok(Outcome::Unchanged(_)) | Ok(Outcome::Duplicate) => self.stats.unchanged += 1,
            Ok(Outcome::Skipped) => self.stats.skipped += 1,
            Err(e) => self.count_error(e),
        }
        result
    }

    fn count_error(&mut self, error: &SyncError) {
        match error {
            SyncError::IdentityConflict { .. } => self.stats.conflicts += 1,
            SyncError::InvalidRecord { .. } => self.stats.skipped += 1,
            _ => {}
        }
    }

    pub fn faction(&mut self, record: &Faction) -> Result<Outcome> {
        let result = self.factions.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    pub fn system(&mut self, record: &System) -> Result<Outcome> {
        let result = self.systems.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    pub fn body(&mut self, record: &Body) -> Result<Outcome> {
        let result = self.bodies.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    pub fn station(&mut self, record: &Station) -> Result<Outcome> {
        let result = self.stations.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    pub fn commodity(&mut self, record: &Commodity) -> Result<Outcome> {
        let result = self.commodities.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    pub fn listing(&mut self, record: &Listing) -> Result<Outcome> {
        let result = self.listings.find_or_add(record, self.bulk.as_mut());
        self.count(result)
    }

    /// Id for a lookup name, created synchronously if unknown.
    pub fn lookup(&mut self, kind: EntityKind, name: &str) -> Result<StoreId> {
        let cache = self
            .lookups
            .get_mut(&kind)
            .ok_or_else(|| SyncError::Config(format!("{} is not a lookup table", kind)))?;
        let (id, _) = cache.find_or_add(name)?;
        Ok(id)
    }

    pub fn join_set(
        &mut self,
        kind: EntityKind,
        parent: StoreId,
        children: &[Option<StoreId>],
    ) -> Result<JoinChange> {
        let cache = self
            .joins
            .get_mut(&kind)
            .ok_or_else(|| SyncError::Config(format!("{} is not a join-set table", kind)))?;
        let result = cache.find_or_add(parent, children, self.bulk.as_mut());
        self.stats.read += 1;
        match &result {
            Ok(change) => {
                if change.is_noop() {
                    self.stats.unchanged += 1;
                }
                self.stats.deleted += change.deleted as u64;
                self.stats.created += change.created as u64;
                self.stats.skipped += change.unresolved as u64;
            }
            Err(e) => self.count_error(e),
        }
        result
    }

    pub fn composition(
        &mut self,
        kind: EntityKind,
        parent: StoreId,
        component: StoreId,
        share: f64,
    ) -> Result<ShareChange> {
        let cache = self
            .compositions
            .get_mut(&kind)
            .ok_or_else(|| SyncError::Config(format!("{} is not a composition table", kind)))?;
        let result = cache.find_or_add(parent, component, share, self.bulk.as_mut());
        self.stats.read += 1;
        match &result {
            Ok(ShareChange::Created) => self.stats.created += 1,
            Ok(ShareChange::Updated) => self.stats.updated += 1,
            Ok(ShareChange::Unchanged) => self.stats.unchanged += 1,
            Ok(ShareChange::Skipped) => self.stats.skipped += 1,
            Err(e) => self.count_error(e),
        }
        result
    }

    /// Read-only lookup id, without creating.
    pub fn lookup_id(&self, kind: EntityKind, name: &str) -> Option<StoreId> {
        self.lookups.get(&kind)?.id(name)
    }

    /// Store id of a hash-identified row by its primary external id.
    pub fn store_id(&self, kind: EntityKind, primary: ExternalId) -> Option<StoreId> {
        match kind {
            EntityKind::Faction => self.factions.id(primary),
            EntityKind::System => self.systems.id(primary),
            EntityKind::Body => self.bodies.id(primary),
            EntityKind::Station => self.stations.id(primary),
            EntityKind::Commodity => self.commodities.id(primary),
            EntityKind::Listing => self.listings.id(primary),
            _ => None,
        }
    }

    pub fn systems(&self) -> &HashedCache<System> {
        &self.systems
    }

    pub fn stations(&self) -> &HashedCache<Station> {
        &self.stations
    }

    pub fn join_cache(&self, kind: EntityKind) -> Option<&JoinSetCache> {
        self.joins.get(&kind)
    }

    pub fn composition_cache(&self, kind: EntityKind) -> Option<&CompositionCache> {
        self.compositions.get(&kind)
    }
}
