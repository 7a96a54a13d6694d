//! Dump import: read, validate, resolve references, and feed the caches
//! inside one bulk session per pass.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Serialize;
use starsync_cache::{RefreshReport, SessionStats, SessionSummary, Universe};
use starsync_client::RemoteStore;
use starsync_core::{
    Body, Commodity, EntityKind, Faction, Listing, Station, StoreId, SyncConfig, SyncError, System,
};
use tracing::{debug, info, warn};

use crate::dump::{
    SourceBody, SourceCommodity, SourceFaction, SourceListing, SourceRecord, SourceStation,
    SourceSystem,
};
use crate::progress::Progress;
use crate::reader::{for_each_in_array, JsonLines, ReadStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Commodities,
    Factions,
    Systems,
    Bodies,
    Stations,
    Listings,
}

impl Dataset {
    /// Referenced rows must already be stored when a dataset is imported.
    pub const ORDER: [Dataset; 6] = [
        Dataset::Commodities,
        Dataset::Factions,
        Dataset::Systems,
        Dataset::Bodies,
        Dataset::Stations,
        Dataset::Listings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dataset::Commodities => "commodities",
            Dataset::Factions => "factions",
            Dataset::Systems => "systems",
            Dataset::Bodies => "bodies",
            Dataset::Stations => "stations",
            Dataset::Listings => "listings",
        }
    }

    /// File name inside an `import-all` directory.
    pub fn file_name(self) -> &'static str {
        match self {
            Dataset::Commodities => "commodities.json",
            Dataset::Factions => "factions.jsonl",
            Dataset::Systems => "systems.jsonl",
            Dataset::Bodies => "bodies.jsonl",
            Dataset::Stations => "stations.jsonl",
            Dataset::Listings => "listings.jsonl",
        }
    }

    /// Commodities come as one JSON array, everything else as JSON lines.
    pub fn is_array(self) -> bool {
        matches!(self, Dataset::Commodities)
    }

    fn lookups(self) -> &'static [EntityKind] {
        match self {
            Dataset::Commodities | Dataset::Listings => &[],
            Dataset::Factions => &[EntityKind::Government, EntityKind::Allegiance],
            Dataset::Systems => &[
                EntityKind::Government,
                EntityKind::Allegiance,
                EntityKind::Security,
                EntityKind::Economy,
                EntityKind::PowerState,
            ],
            Dataset::Bodies => &[
                EntityKind::AtmosphereComponent,
                EntityKind::SolidComponent,
                EntityKind::Material,
            ],
            Dataset::Stations => &[
                EntityKind::Government,
                EntityKind::Allegiance,
                EntityKind::Ship,
            ],
        }
    }

    fn references(self) -> &'static [EntityKind] {
        match self {
            Dataset::Commodities | Dataset::Factions => &[],
            Dataset::Systems => &[EntityKind::Faction],
            Dataset::Bodies => &[EntityKind::System],
            Dataset::Stations => &[EntityKind::System, EntityKind::Faction, EntityKind::Commodity],
            Dataset::Listings => &[EntityKind::Station, EntityKind::Commodity],
        }
    }
}

const STATION_LINKS: [EntityKind; 4] = [
    EntityKind::StationImport,
    EntityKind::StationExport,
    EntityKind::StationProhibited,
    EntityKind::StationShip,
];

const BODY_LINKS: [EntityKind; 3] = [
    EntityKind::BodyAtmosphere,
    EntityKind::BodySolid,
    EntityKind::BodyMaterial,
];

/// Result of importing one dump file.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub dataset: Dataset,
    pub file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records parsed from the file.
    pub records: u64,
    pub malformed: u64,
    /// Records dropped at the boundary or refused by a cache.
    pub rejected: u64,
    pub stats: SessionStats,
    pub jobs: usize,
    pub rows_written: usize,
    pub rows_lost: usize,
    pub lost_jobs: usize,
    pub retries: u64,
    pub refreshes: Vec<RefreshReport>,
}

impl ImportReport {
    fn new(dataset: Dataset, file: &Path) -> Self {
        let now = Utc::now();
        Self {
            dataset,
            file: file.to_path_buf(),
            started_at: now,
            finished_at: now,
            records: 0,
            malformed: 0,
            rejected: 0,
            stats: SessionStats::default(),
            jobs: 0,
            rows_written: 0,
            rows_lost: 0,
            lost_jobs: 0,
            retries: 0,
            refreshes: Vec::new(),
        }
    }

    fn absorb(&mut self, summary: SessionSummary) {
        self.stats.merge(&summary.stats);
        self.jobs += summary.dispatch.jobs;
        self.rows_written += summary.dispatch.rows_written;
        self.rows_lost += summary.dispatch.rows_lost;
        self.lost_jobs += summary.dispatch.lost_jobs;
        self.retries += summary.dispatch.retries;
        self.refreshes.extend(summary.refreshes);
    }

    pub fn elapsed_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Second passes re-read the file for join rows; their boundary failures
/// were already reported by the first pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    Records,
    Links,
}

pub struct Importer {
    universe: Universe,
    progress_interval: u64,
}

impl Importer {
    pub fn new(store: Arc<dyn RemoteStore>, config: &SyncConfig) -> Result<Self> {
        let universe = Universe::new(store, config).context("failed to set up caches")?;
        Ok(Self {
            universe,
            progress_interval: config.progress_interval,
        })
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn import(&mut self, dataset: Dataset, path: &Path) -> Result<ImportReport> {
        info!("importing {} from {}", dataset.as_str(), path.display());
        let mut report = ImportReport::new(dataset, path);
        self.universe
            .prepare(dataset.lookups())
            .context("failed to load lookup tables")?;
        self.universe
            .prepare(dataset.references())
            .context("failed to load referenced tables")?;

        match dataset {
            Dataset::Commodities => self.run_pass(
                dataset,
                path,
                &[EntityKind::Commodity],
                Pass::Records,
                &mut report,
                import_commodity,
            )?,
            Dataset::Factions => self.run_pass(
                dataset,
                path,
                &[EntityKind::Faction],
                Pass::Records,
                &mut report,
                import_faction,
            )?,
            Dataset::Systems => self.run_pass(
                dataset,
                path,
                &[EntityKind::System],
                Pass::Records,
                &mut report,
                import_system,
            )?,
            Dataset::Bodies => {
                self.run_pass(
                    dataset,
                    path,
                    &[EntityKind::Body],
                    Pass::Records,
                    &mut report,
                    import_body,
                )?;
                self.run_pass(
                    dataset,
                    path,
                    &BODY_LINKS,
                    Pass::Links,
                    &mut report,
                    import_body_compositions,
                )?;
            }
            Dataset::Stations => {
                self.run_pass(
                    dataset,
                    path,
                    &[EntityKind::Station],
                    Pass::Records,
                    &mut report,
                    import_station,
                )?;
                self.run_pass(
                    dataset,
                    path,
                    &STATION_LINKS,
                    Pass::Links,
                    &mut report,
                    import_station_links,
                )?;
            }
            Dataset::Listings => self.run_pass(
                dataset,
                path,
                &[EntityKind::Listing],
                Pass::Records,
                &mut report,
                import_listing,
            )?,
        }

        report.finished_at = Utc::now();
        info!(
            "{}: {} records, {} changed, {} rejected, {} malformed in {:.1}s",
            dataset.as_str(),
            report.records,
            report.stats.changed(),
            report.rejected,
            report.malformed,
            report.elapsed_secs()
        );
        Ok(report)
    }

    /// Every dataset present in `dir`, in dependency order. Missing files
    /// are skipped.
    pub fn import_all(&mut self, dir: &Path) -> Result<Vec<ImportReport>> {
        let mut reports = Vec::new();
        for dataset in Dataset::ORDER {
            let path = dir.join(dataset.file_name());
            if !path.is_file() {
                warn!("{} not found, skipping {}", path.display(), dataset.as_str());
                continue;
            }
            reports.push(self.import(dataset, &path)?);
        }
        Ok(reports)
    }

    fn run_pass<T, F>(
        &mut self,
        dataset: Dataset,
        path: &Path,
        kinds: &[EntityKind],
        pass: Pass,
        report: &mut ImportReport,
        mut apply: F,
    ) -> Result<()>
    where
        T: SourceRecord,
        F: FnMut(&mut Universe, &T) -> starsync_core::Result<()>,
    {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        self.universe
            .begin_bulk(kinds)
            .with_context(|| format!("cannot start bulk session for {:?}", kinds))?;

        let label = match pass {
            Pass::Records => dataset.as_str().to_string(),
            Pass::Links => format!("{} links", dataset.as_str()),
        };
        let mut progress = Progress::new(label, self.progress_interval);
        let mut rejected = 0u64;
        let universe = &mut self.universe;
        let mut handle = |record: T| -> Result<()> {
            progress.tick(universe.stats());
            if let Err(e) = record.validate() {
                if pass == Pass::Records {
                    warn!("{} {:?} rejected: {}", T::KIND, record.external_id(), e);
                    rejected += 1;
                }
                return Ok(());
            }
            match apply(universe, &record) {
                Ok(()) => Ok(()),
                Err(e) if e.is_fatal() => Err(anyhow::Error::new(e)
                    .context(format!("{} {:?}", T::KIND, record.external_id()))),
                Err(e) => {
                    warn!("{} {:?} skipped: {}", T::KIND, record.external_id(), e);
                    rejected += 1;
                    Ok(())
                }
            }
        };

        let read = if dataset.is_array() {
            for_each_in_array(file, &mut handle)?
        } else {
            let mut lines = JsonLines::<_, T>::new(file);
            for record in lines.by_ref() {
                handle(record.with_context(|| format!("reading {}", path.display()))?)?;
            }
            lines.stats()
        };
        let elapsed = progress.elapsed();

        let summary = self
            .universe
            .end_session()
            .with_context(|| format!("failed to complete {} session", dataset.as_str()))?;
        debug!(
            "{} pass read {} records in {:.1}s",
            dataset.as_str(),
            read.records,
            elapsed.as_secs_f64()
        );
        if pass == Pass::Records {
            let ReadStats { records, malformed } = read;
            report.records += records;
            report.malformed += malformed;
        }
        report.rejected += rejected;
        report.absorb(summary);
        Ok(())
    }
}

/// Id of a lookup name; blank or absent names resolve to nothing.
fn lookup(
    universe: &mut Universe,
    kind: EntityKind,
    name: Option<&str>,
) -> starsync_core::Result<Option<StoreId>> {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => universe.lookup(kind, n).map(Some),
        _ => Ok(None),
    }
}

/// Store id of a referenced hash-identified row. An unknown reference is
/// left empty; the row is corrected once the referenced dump is imported.
fn reference(
    universe: &Universe,
    kind: EntityKind,
    external: Option<i64>,
) -> Option<StoreId> {
    let external = external?;
    let id = universe.store_id(kind, external);
    if id.is_none() {
        debug!("unknown {} {} referenced", kind, external);
    }
    id
}

fn import_commodity(universe: &mut Universe, source: &SourceCommodity) -> starsync_core::Result<()> {
    let record = Commodity {
        eddb_id: source.id,
        name: source.name.as_deref().map(|n| n.trim().to_string()),
        category: source.category.as_ref().and_then(|c| c.name.clone()),
        average_price: source.average_price,
        is_rare: source.is_rare,
    };
    universe.commodity(&record).map(|_| ())
}

fn import_faction(universe: &mut Universe, source: &SourceFaction) -> starsync_core::Result<()> {
    let record = Faction {
        eddb_id: source.id,
        name: source.name.as_deref().map(|n| n.trim().to_string()),
        government: lookup(universe, EntityKind::Government, source.government.as_deref())?,
        allegiance: lookup(universe, EntityKind::Allegiance, source.allegiance.as_deref())?,
        home_system_eddb_id: source.home_system_id,
        is_player_faction: source.is_player_faction,
        updated_at: source.updated_at,
    };
    universe.faction(&record).map(|_| ())
}

fn import_system(universe: &mut Universe, source: &SourceSystem) -> starsync_core::Result<()> {
    let record = System {
        eddb_id: source.id,
        edsm_id: source.edsm_id,
        name: source.name.as_deref().map(|n| n.trim().to_string()),
        x: source.x,
        y: source.y,
        z: source.z,
        population: source.population,
        is_populated: source.is_populated,
        needs_permit: source.needs_permit,
        government: lookup(universe, EntityKind::Government, source.government.as_deref())?,
        allegiance: lookup(universe, EntityKind::Allegiance, source.allegiance.as_deref())?,
        security: lookup(universe, EntityKind::Security, source.security.as_deref())?,
        primary_economy: lookup(universe, EntityKind::Economy, source.primary_economy.as_deref())?,
        power_state: lookup(universe, EntityKind::PowerState, source.power_state.as_deref())?,
        controlling_faction: reference(
            universe,
            EntityKind::Faction,
            source.controlling_minor_faction_id,
        ),
        updated_at: source.updated_at,
    };
    universe.system(&record).map(|_| ())
}

fn import_body(universe: &mut Universe, source: &SourceBody) -> starsync_core::Result<()> {
    let record = Body {
        eddb_id: source.id,
        edsm_id: source.edsm_id,
        name: source.name.as_deref().map(|n| n.trim().to_string()),
        system: reference(universe, EntityKind::System, source.system_id),
        body_type: source.type_name.clone(),
        distance_to_arrival: source.distance_to_arrival,
        radius: source.radius,
        gravity: source.gravity,
        surface_temperature: source.surface_temperature,
        is_landable: source.is_landable,
        updated_at: source.updated_at,
    };
    universe.body(&record).map(|_| ())
}

fn import_body_compositions(
    universe: &mut Universe,
    source: &SourceBody,
) -> starsync_core::Result<()> {
    let body = stored_parent(universe, EntityKind::Body, source.id)?;
    let lists = [
        (EntityKind::BodyAtmosphere, EntityKind::AtmosphereComponent, &source.atmosphere_composition),
        (EntityKind::BodySolid, EntityKind::SolidComponent, &source.solid_composition),
        (EntityKind::BodyMaterial, EntityKind::Material, &source.materials),
    ];
    for (kind, component_kind, shares) in lists {
        for share in shares {
            let component = universe.lookup(component_kind, &share.name)?;
            universe.composition(kind, body, component, share.share)?;
        }
    }
    Ok(())
}

fn import_station(universe: &mut Universe, source: &SourceStation) -> starsync_core::Result<()> {
    let record = Station {
        eddb_id: source.id,
        name: source.name.as_deref().map(|n| n.trim().to_string()),
        system: reference(universe, EntityKind::System, source.system_id),
        station_type: source.station_type.clone(),
        max_landing_pad_size: source.max_landing_pad_size.clone(),
        distance_to_star: source.distance_to_star,
        government: lookup(universe, EntityKind::Government, source.government.as_deref())?,
        allegiance: lookup(universe, EntityKind::Allegiance, source.allegiance.as_deref())?,
        controlling_faction: reference(
            universe,
            EntityKind::Faction,
            source.controlling_minor_faction_id,
        ),
        has_market: source.has_market,
        has_shipyard: source.has_shipyard,
        has_outfitting: source.has_outfitting,
        is_planetary: source.is_planetary,
        updated_at: source.updated_at,
    };
    universe.station(&record).map(|_| ())
}

fn import_station_links(universe: &mut Universe, source: &SourceStation) -> starsync_core::Result<()> {
    let station = stored_parent(universe, EntityKind::Station, source.id)?;
    let commodity_lists = [
        (EntityKind::StationImport, &source.import_commodities),
        (EntityKind::StationExport, &source.export_commodities),
        (EntityKind::StationProhibited, &source.prohibited_commodities),
    ];
    for (kind, ids) in commodity_lists {
        let children: Vec<Option<StoreId>> = ids
            .iter()
            .map(|id| universe.store_id(EntityKind::Commodity, *id))
            .collect();
        universe.join_set(kind, station, &children)?;
    }

    let mut ships = Vec::with_capacity(source.selling_ships.len());
    for name in &source.selling_ships {
        if let Some(ship) = lookup(universe, EntityKind::Ship, Some(name))? {
            ships.push(Some(ship));
        }
    }
    universe.join_set(EntityKind::StationShip, station, &ships)?;
    Ok(())
}

fn import_listing(universe: &mut Universe, source: &SourceListing) -> starsync_core::Result<()> {
    let station = reference(universe, EntityKind::Station, source.station_id);
    let commodity = reference(universe, EntityKind::Commodity, source.commodity_id);
    if station.is_none() || commodity.is_none() {
        return Err(SyncError::InvalidRecord {
            entity: EntityKind::Listing,
            reason: format!(
                "station {:?} or commodity {:?} is not stored",
                source.station_id, source.commodity_id
            ),
        });
    }
    let record = Listing {
        eddb_id: source.id,
        station,
        commodity,
        supply: source.supply,
        demand: source.demand,
        buy_price: source.buy_price,
        sell_price: source.sell_price,
        collected_at: source.collected_at,
    };
    universe.listing(&record).map(|_| ())
}

/// Parent rows of a link pass were written by the preceding record pass.
fn stored_parent(
    universe: &Universe,
    kind: EntityKind,
    external: Option<i64>,
) -> starsync_core::Result<StoreId> {
    external
        .and_then(|id| universe.store_id(kind, id))
        .ok_or_else(|| SyncError::InvalidRecord {
            entity: kind,
            reason: format!("{:?} was not stored", external),
        })
}
