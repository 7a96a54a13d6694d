//! Typed per-entity records for the hash-identified tables.
//!
//! Foreign keys are already-resolved store ids; the dump readers translate
//! upstream ids and names before a record reaches a cache.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{EntityKind, ExternalId, Result, Row, StoreId, SyncError};

/// A record located by external id and compared by content fingerprint.
pub trait HashedRecord: Serialize {
    const KIND: EntityKind;

    fn primary_id(&self) -> Option<ExternalId>;

    fn secondary_id(&self) -> Option<ExternalId> {
        None
    }

    /// Outgoing payload; field names are the store's column names.
    fn to_row(&self) -> Result<Row> {
        match serde_json::to_value(self)? {
            Value::Object(row) => Ok(row),
            other => Err(SyncError::InvalidRecord {
                entity: Self::KIND,
                reason: format!("record serialized to {} instead of an object", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Faction {
    pub eddb_id: Option<ExternalId>,
    pub name: Option<String>,
    pub government: Option<StoreId>,
    pub allegiance: Option<StoreId>,
    pub home_system_eddb_id: Option<ExternalId>,
    pub is_player_faction: Option<bool>,
    pub updated_at: Option<i64>,
}

impl HashedRecord for Faction {
    const KIND: EntityKind = EntityKind::Faction;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub eddb_id: Option<ExternalId>,
    pub edsm_id: Option<ExternalId>,
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub population: Option<i64>,
    pub is_populated: Option<bool>,
    pub needs_permit: Option<bool>,
    pub government: Option<StoreId>,
    pub allegiance: Option<StoreId>,
    pub security: Option<StoreId>,
    pub primary_economy: Option<StoreId>,
    pub power_state: Option<StoreId>,
    pub controlling_faction: Option<StoreId>,
    pub updated_at: Option<i64>,
}

impl HashedRecord for System {
    const KIND: EntityKind = EntityKind::System;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }

    fn secondary_id(&self) -> Option<ExternalId> {
        self.edsm_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub eddb_id: Option<ExternalId>,
    pub edsm_id: Option<ExternalId>,
    pub name: Option<String>,
    pub system: Option<StoreId>,
    pub body_type: Option<String>,
    pub distance_to_arrival: Option<f64>,
    pub radius: Option<f64>,
    pub gravity: Option<f64>,
    pub surface_temperature: Option<f64>,
    pub is_landable: Option<bool>,
    pub updated_at: Option<i64>,
}

impl HashedRecord for Body {
    const KIND: EntityKind = EntityKind::Body;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }

    fn secondary_id(&self) -> Option<ExternalId> {
        self.edsm_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub eddb_id: Option<ExternalId>,
    pub name: Option<String>,
    pub system: Option<StoreId>,
    pub station_type: Option<String>,
    pub max_landing_pad_size: Option<String>,
    pub distance_to_star: Option<f64>,
    pub government: Option<StoreId>,
    pub allegiance: Option<StoreId>,
    pub controlling_faction: Option<StoreId>,
    pub has_market: Option<bool>,
    pub has_shipyard: Option<bool>,
    pub has_outfitting: Option<bool>,
    pub is_planetary: Option<bool>,
    pub updated_at: Option<i64>,
}

impl HashedRecord for Station {
    const KIND: EntityKind = EntityKind::Station;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub eddb_id: Option<ExternalId>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub average_price: Option<i64>,
    pub is_rare: Option<bool>,
}

impl HashedRecord for Commodity {
    const KIND: EntityKind = EntityKind::Commodity;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub eddb_id: Option<ExternalId>,
    pub station: Option<StoreId>,
    pub commodity: Option<StoreId>,
    pub supply: Option<i64>,
    pub demand: Option<i64>,
    pub buy_price: Option<i64>,
    pub sell_price: Option<i64>,
    pub collected_at: Option<i64>,
}

impl HashedRecord for Listing {
    const KIND: EntityKind = EntityKind::Listing;

    fn primary_id(&self) -> Option<ExternalId> {
        self.eddb_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_use_store_column_names() {
        let system = System {
            eddb_id: Some(17),
            edsm_id: Some(27),
            name: Some("Sol".into()),
            government: Some(StoreId(3)),
            ..Default::default()
        };
        let row = system.to_row().unwrap();
        assert_eq!(row.get("eddb_id"), Some(&Value::from(17)));
        assert_eq!(row.get("edsm_id"), Some(&Value::from(27)));
        assert_eq!(row.get("government"), Some(&Value::from(3)));
        assert_eq!(row.get("population"), Some(&Value::Null));
        assert_eq!(System::KIND.primary_field(), Some("eddb_id"));
        assert_eq!(system.secondary_id(), Some(27));
    }

    #[test]
    fn stations_have_no_secondary_source() {
        let station = Station {
            eddb_id: Some(5),
            ..Default::default()
        };
        assert_eq!(station.primary_id(), Some(5));
        assert_eq!(station.secondary_id(), None);
    }
}
