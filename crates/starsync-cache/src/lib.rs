//! Client-side synchronization caches.
//!
//! An incoming record goes through its entity cache's `find_or_add`: the
//! identity index locates it, the change detector compares fingerprints,
//! and anything new or modified is written (synchronously when loaded,
//! through a bulk session's batches when accumulating). At the end of a
//! bulk session the refresh planner reconciles each touched cache with the
//! store, cascading into dependent caches first.

pub mod cache;
pub mod composition;
pub mod detector;
pub mod hashed;
pub mod identity;
pub mod join_set;
pub mod loader;
pub mod lookup;
pub mod planner;
pub mod session;
pub mod state;
pub mod stats;
pub mod universe;

pub use cache::SyncCache;
pub use composition::{CompositionCache, ShareChange};
pub use detector::{ChangeDetector, Verdict};
pub use hashed::{HashedCache, Outcome};
pub use identity::{IdentityIndex, Resolution};
pub use join_set::{JoinChange, JoinSetCache};
pub use loader::TableLoader;
pub use lookup::LookupCache;
pub use planner::{Cascade, DependencyRegistry, DependentLink, RefreshKind, RefreshReport};
pub use session::BulkSession;
pub use state::{CacheCore, CacheState};
pub use stats::{SessionStats, SessionSummary};
pub use universe::Universe;
