pub mod compact_map;
pub mod config;
pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod ids;
pub mod records;

pub use compact_map::CompactHashMap;
pub use config::{
    BatchingConfig, ConfigError, ConfigManager, DispatchConfig, FingerprintConfig, LoggingConfig,
    StoreConfig, SyncConfig,
};
pub use entity::{EntityKind, Shape, SizeClass};
pub use error::*;
pub use fingerprint::Fingerprint;
pub use ids::*;
pub use records::*;
