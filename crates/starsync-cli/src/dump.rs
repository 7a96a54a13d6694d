//! Upstream dump record shapes and ingestion-boundary validation.
//!
//! Dumps are inconsistent about booleans (`true`/`1`) and leave most
//! fields out; every field except the identity is optional here. Names
//! and ids of referenced rows are resolved later, in `import`.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use starsync_core::{EntityKind, ExternalId, Result, SyncError};

/// A dump record that can be checked before it reaches a cache.
pub trait SourceRecord: DeserializeOwned {
    const KIND: EntityKind;

    fn external_id(&self) -> Option<ExternalId>;

    fn validate(&self) -> Result<()>;
}

fn flag<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<bool>, D::Error> {
    match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(D::Error::custom(format!("expected 0 or 1, found {}", n))),
        },
        Some(other) => Err(D::Error::custom(format!("expected a boolean, found {}", other))),
    }
}

fn invalid(kind: EntityKind, reason: impl Into<String>) -> SyncError {
    SyncError::InvalidRecord {
        entity: kind,
        reason: reason.into(),
    }
}

fn check_id(kind: EntityKind, field: &str, id: Option<ExternalId>) -> Result<()> {
    match id {
        Some(id) if id <= 0 => Err(invalid(kind, format!("{} must be positive, got {}", field, id))),
        _ => Ok(()),
    }
}

fn require_id(kind: EntityKind, id: Option<ExternalId>) -> Result<()> {
    if id.is_none() {
        return Err(invalid(kind, "missing id"));
    }
    check_id(kind, "id", id)
}

fn require_name(kind: EntityKind, name: &Option<String>) -> Result<()> {
    match name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => Ok(()),
        _ => Err(invalid(kind, "missing name")),
    }
}

fn check_finite(kind: EntityKind, field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => Err(invalid(kind, format!("{} is not a finite number", field))),
        _ => Ok(()),
    }
}

fn check_non_negative(kind: EntityKind, field: &str, value: Option<i64>) -> Result<()> {
    match value {
        Some(v) if v < 0 => Err(invalid(kind, format!("{} is negative ({})", field, v))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceCategory {
    #[serde(default)]
    pub name: Option<String>,
}

/// Element of `commodities.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceCommodity {
    pub id: Option<ExternalId>,
    pub name: Option<String>,
    pub category: Option<SourceCategory>,
    pub average_price: Option<i64>,
    #[serde(deserialize_with = "flag")]
    pub is_rare: Option<bool>,
}

impl SourceRecord for SourceCommodity {
    const KIND: EntityKind = EntityKind::Commodity;

    fn external_id(&self) -> Option<ExternalId> {
        self.id
    }

    fn validate(&self) -> Result<()> {
        require_id(Self::KIND, self.id)?;
        require_name(Self::KIND, &self.name)?;
        check_non_negative(Self::KIND, "average_price", self.average_price)
    }
}

/// Line of `factions.jsonl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceFaction {
    pub id: Option<ExternalId>,
    pub name: Option<String>,
    pub government: Option<String>,
    pub allegiance: Option<String>,
    pub home_system_id: Option<ExternalId>,
    #[serde(deserialize_with = "flag")]
    pub is_player_faction: Option<bool>,
    pub updated_at: Option<i64>,
}

impl SourceRecord for SourceFaction {
    const KIND: EntityKind = EntityKind::Faction;

    fn external_id(&self) -> Option<ExternalId> {
        self.id
    }

    fn validate(&self) -> Result<()> {
        require_id(Self::KIND, self.id)?;
        require_name(Self::KIND, &self.name)?;
        check_id(Self::KIND, "home_system_id", self.home_system_id)
    }
}

/// Line of `systems.jsonl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceSystem {
    pub id: Option<ExternalId>,
    pub edsm_id: Option<ExternalId>,
    pub name: Option<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub population: Option<i64>,
    #[serde(deserialize_with = "flag")]
    pub is_populated: Option<bool>,
    #[serde(deserialize_with = "flag")]
    pub needs_permit: Option<bool>,
    pub government: Option<String>,
    pub allegiance: Option<String>,
    pub security: Option<String>,
    pub primary_economy: Option<String>,
    pub power_state: Option<String>,
    pub controlling_minor_faction_id: Option<ExternalId>,
    pub updated_at: Option<i64>,
}

impl SourceRecord for SourceSystem {
    const KIND: EntityKind = EntityKind::System;

    fn external_id(&self) -> Option<ExternalId> {
        self.id.or(self.edsm_id)
    }

    /// Either source id is enough to locate a system.
    fn validate(&self) -> Result<()> {
        if self.id.is_none() && self.edsm_id.is_none() {
            return Err(invalid(Self::KIND, "neither id nor edsm_id present"));
        }
        check_id(Self::KIND, "id", self.id)?;
        check_id(Self::KIND, "edsm_id", self.edsm_id)?;
        require_name(Self::KIND, &self.name)?;
        check_finite(Self::KIND, "x", self.x)?;
        check_finite(Self::KIND, "y", self.y)?;
        check_finite(Self::KIND, "z", self.z)?;
        check_non_negative(Self::KIND, "population", self.population)?;
        check_id(
            Self::KIND,
            "controlling_minor_faction_id",
            self.controlling_minor_faction_id,
        )
    }
}

/// One component of a body's atmosphere, crust or material list.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceShare {
    #[serde(
        alias = "atmosphere_component_name",
        alias = "solid_component_name",
        alias = "material_name"
    )]
    pub name: String,
    pub share: f64,
}

impl SourceShare {
    fn validate(&self, kind: EntityKind) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid(kind, "composition entry without a name"));
        }
        if !self.share.is_finite() || !(0.0..=100.0).contains(&self.share) {
            return Err(invalid(
                kind,
                format!("share of '{}' out of range: {}", self.name, self.share),
            ));
        }
        Ok(())
    }
}

/// Line of `bodies.jsonl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceBody {
    pub id: Option<ExternalId>,
    pub edsm_id: Option<ExternalId>,
    pub name: Option<String>,
    pub system_id: Option<ExternalId>,
    #[serde(alias = "group_name")]
    pub type_name: Option<String>,
    pub distance_to_arrival: Option<f64>,
    pub radius: Option<f64>,
    pub gravity: Option<f64>,
    pub surface_temperature: Option<f64>,
    #[serde(deserialize_with = "flag")]
    pub is_landable: Option<bool>,
    pub atmosphere_composition: Vec<SourceShare>,
    pub solid_composition: Vec<SourceShare>,
    pub materials: Vec<SourceShare>,
    pub updated_at: Option<i64>,
}

impl SourceRecord for SourceBody {
    const KIND: EntityKind = EntityKind::Body;

    fn external_id(&self) -> Option<ExternalId> {
        self.id.or(self.edsm_id)
    }

    fn validate(&self) -> Result<()> {
        if self.id.is_none() && self.edsm_id.is_none() {
            return Err(invalid(Self::KIND, "neither id nor edsm_id present"));
        }
        check_id(Self::KIND, "id", self.id)?;
        check_id(Self::KIND, "edsm_id", self.edsm_id)?;
        check_id(Self::KIND, "system_id", self.system_id)?;
        for (field, value) in [
            ("distance_to_arrival", self.distance_to_arrival),
            ("radius", self.radius),
            ("gravity", self.gravity),
            ("surface_temperature", self.surface_temperature),
        ] {
            check_finite(Self::KIND, field, value)?;
        }
        let shares = [
            (EntityKind::BodyAtmosphere, &self.atmosphere_composition),
            (EntityKind::BodySolid, &self.solid_composition),
            (EntityKind::BodyMaterial, &self.materials),
        ];
        for (kind, list) in shares {
            for share in list {
                share.validate(kind)?;
            }
        }
        Ok(())
    }
}

/// Line of `stations.jsonl`. Commodity lists carry commodity ids, ships
/// are listed by name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceStation {
    pub id: Option<ExternalId>,
    pub name: Option<String>,
    pub system_id: Option<ExternalId>,
    #[serde(rename = "type")]
    pub station_type: Option<String>,
    pub max_landing_pad_size: Option<String>,
    pub distance_to_star: Option<f64>,
    pub government: Option<String>,
    pub allegiance: Option<String>,
    pub controlling_minor_faction_id: Option<ExternalId>,
    #[serde(deserialize_with = "flag")]
    pub has_market: Option<bool>,
    #[serde(deserialize_with = "flag")]
    pub has_shipyard: Option<bool>,
    #[serde(deserialize_with = "flag")]
    pub has_outfitting: Option<bool>,
    #[serde(deserialize_with = "flag")]
    pub is_planetary: Option<bool>,
    pub import_commodities: Vec<ExternalId>,
    pub export_commodities: Vec<ExternalId>,
    pub prohibited_commodities: Vec<ExternalId>,
    pub selling_ships: Vec<String>,
    pub updated_at: Option<i64>,
}

impl SourceRecord for SourceStation {
    const KIND: EntityKind = EntityKind::Station;

    fn external_id(&self) -> Option<ExternalId> {
        self.id
    }

    fn validate(&self) -> Result<()> {
        require_id(Self::KIND, self.id)?;
        require_name(Self::KIND, &self.name)?;
        check_id(Self::KIND, "system_id", self.system_id)?;
        check_finite(Self::KIND, "distance_to_star", self.distance_to_star)?;
        check_id(
            Self::KIND,
            "controlling_minor_faction_id",
            self.controlling_minor_faction_id,
        )
    }
}

/// Line of `listings.jsonl`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourceListing {
    pub id: Option<ExternalId>,
    pub station_id: Option<ExternalId>,
    pub commodity_id: Option<ExternalId>,
    pub supply: Option<i64>,
    pub demand: Option<i64>,
    pub buy_price: Option<i64>,
    pub sell_price: Option<i64>,
    pub collected_at: Option<i64>,
}

impl SourceRecord for SourceListing {
    const KIND: EntityKind = EntityKind::Listing;

    fn external_id(&self) -> Option<ExternalId> {
        self.id
    }

    fn validate(&self) -> Result<()> {
        require_id(Self::KIND, self.id)?;
        if self.station_id.is_none() || self.commodity_id.is_none() {
            return Err(invalid(Self::KIND, "listing without station or commodity"));
        }
        check_id(Self::KIND, "station_id", self.station_id)?;
        check_id(Self::KIND, "commodity_id", self.commodity_id)?;
        for (field, value) in [
            ("supply", self.supply),
            ("demand", self.demand),
            ("buy_price", self.buy_price),
            ("sell_price", self.sell_price),
        ] {
            check_non_negative(Self::KIND, field, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_flags_are_accepted() {
        let system: SourceSystem = serde_json::from_str(
            r#"{"id": 1, "name": "Sol", "is_populated": 1, "needs_permit": 0}"#,
        )
        .unwrap();
        assert_eq!(system.is_populated, Some(true));
        assert_eq!(system.needs_permit, Some(false));

        let station: SourceStation =
            serde_json::from_str(r#"{"id": 2, "name": "Abraham Lincoln", "has_market": true}"#)
                .unwrap();
        assert_eq!(station.has_market, Some(true));
        assert_eq!(station.has_shipyard, None);

        let bad = serde_json::from_str::<SourceSystem>(r#"{"id": 1, "is_populated": 2}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn systems_need_one_source_id() {
        let mut system = SourceSystem {
            name: Some("Sol".into()),
            ..Default::default()
        };
        assert!(matches!(
            system.validate(),
            Err(SyncError::InvalidRecord { .. })
        ));
        system.edsm_id = Some(27);
        assert!(system.validate().is_ok());
        assert_eq!(system.external_id(), Some(27));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let system = SourceSystem {
            id: Some(1),
            name: Some("Sol".into()),
            x: Some(f64::NAN),
            ..Default::default()
        };
        assert!(system.validate().is_err());

        let listing = SourceListing {
            id: Some(9),
            station_id: Some(1),
            commodity_id: Some(2),
            buy_price: Some(-5),
            ..Default::default()
        };
        assert!(listing.validate().is_err());

        let body: SourceBody = serde_json::from_str(
            r#"{"id": 3, "materials": [{"material_name": "Iron", "share": 140.0}]}"#,
        )
        .unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn commodity_category_is_nested() {
        let commodity: SourceCommodity = serde_json::from_str(
            r#"{"id": 5, "name": "Gold", "category": {"id": 2, "name": "Metals"}, "is_rare": 0}"#,
        )
        .unwrap();
        assert!(commodity.validate().is_ok());
        assert_eq!(
            commodity.category.and_then(|c| c.name).as_deref(),
            Some("Metals")
        );
        assert_eq!(commodity.is_rare, Some(false));
    }

    #[test]
    fn blank_names_are_rejected() {
        let faction = SourceFaction {
            id: Some(4),
            name: Some("  ".into()),
            ..Default::default()
        };
        assert!(faction.validate().is_err());
    }
}
