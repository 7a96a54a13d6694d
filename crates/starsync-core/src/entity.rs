use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a table participates in synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Small enumerated name table, written synchronously.
    Lookup,
    /// Entity located by external id and compared by content fingerprint.
    Hashed,
    /// Parent owns an unordered set of children (station-style).
    JoinSet,
    /// Parent owns keyed weighted shares (composition-style).
    Composition,
}

/// Which batching threshold a kind falls back to when not overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Large,
    Join,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Government,
    Allegiance,
    Security,
    Economy,
    PowerState,
    Ship,
    AtmosphereComponent,
    SolidComponent,
    Material,

    Faction,
    System,
    Body,
    Station,
    Commodity,
    Listing,

    StationImport,
    StationExport,
    StationProhibited,
    StationShip,

    BodyAtmosphere,
    BodySolid,
    BodyMaterial,
}

impl EntityKind {
    pub const ALL: [EntityKind; 22] = [
        EntityKind::Government,
        EntityKind::Allegiance,
        EntityKind::Security,
        EntityKind::Economy,
        EntityKind::PowerState,
        EntityKind::Ship,
        EntityKind::AtmosphereComponent,
        EntityKind::SolidComponent,
        EntityKind::Material,
        EntityKind::Faction,
        EntityKind::System,
        EntityKind::Body,
        EntityKind::Station,
        EntityKind::Commodity,
        EntityKind::Listing,
        EntityKind::StationImport,
        EntityKind::StationExport,
        EntityKind::StationProhibited,
        EntityKind::StationShip,
        EntityKind::BodyAtmosphere,
        EntityKind::BodySolid,
        EntityKind::BodyMaterial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Government => "government",
            EntityKind::Allegiance => "allegiance",
            EntityKind::Security => "security",
            EntityKind::Economy => "economy",
            EntityKind::PowerState => "power_state",
            EntityKind::Ship => "ship",
            EntityKind::AtmosphereComponent => "atmosphere_component",
            EntityKind::SolidComponent => "solid_component",
            EntityKind::Material => "material",
            EntityKind::Faction => "faction",
            EntityKind::System => "system",
            EntityKind::Body => "body",
            EntityKind::Station => "station",
            EntityKind::Commodity => "commodity",
            EntityKind::Listing => "listing",
            EntityKind::StationImport => "station_import",
            EntityKind::StationExport => "station_export",
            EntityKind::StationProhibited => "station_prohibited",
            EntityKind::StationShip => "station_ship",
            EntityKind::BodyAtmosphere => "body_atmosphere",
            EntityKind::BodySolid => "body_solid",
            EntityKind::BodyMaterial => "body_material",
        }
    }

    /// REST collection path segment on the remote store.
    pub fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Government => "governments",
            EntityKind::Allegiance => "allegiances",
            EntityKind::Security => "securities",
            EntityKind::Economy => "economies",
            EntityKind::PowerState => "power-states",
            EntityKind::Ship => "ships",
            EntityKind::AtmosphereComponent => "atmosphere-components",
            EntityKind::SolidComponent => "solid-components",
            EntityKind::Material => "materials",
            EntityKind::Faction => "factions",
            EntityKind::System => "systems",
            EntityKind::Body => "bodies",
            EntityKind::Station => "stations",
            EntityKind::Commodity => "commodities",
            EntityKind::Listing => "listings",
            EntityKind::StationImport => "station-imports",
            EntityKind::StationExport => "station-exports",
            EntityKind::StationProhibited => "station-prohibited",
            EntityKind::StationShip => "station-ships",
            EntityKind::BodyAtmosphere => "body-atmospheres",
            EntityKind::BodySolid => "body-solids",
            EntityKind::BodyMaterial => "body-materials",
        }
    }

    pub fn shape(self) -> Shape {
        match self {
            EntityKind::Government
            | EntityKind::Allegiance
            | EntityKind::Security
            | EntityKind::Economy
            | EntityKind::PowerState
            | EntityKind::Ship
            | EntityKind::AtmosphereComponent
            | EntityKind::SolidComponent
            | EntityKind::Material => Shape::Lookup,
            EntityKind::Faction
            | EntityKind::System
            | EntityKind::Body
            | EntityKind::Station
            | EntityKind::Commodity
            | EntityKind::Listing => Shape::Hashed,
            EntityKind::StationImport
            | EntityKind::StationExport
            | EntityKind::StationProhibited
            | EntityKind::StationShip => Shape::JoinSet,
            EntityKind::BodyAtmosphere | EntityKind::BodySolid | EntityKind::BodyMaterial => {
                Shape::Composition
            }
        }
    }

    pub fn size_class(self) -> SizeClass {
        match self {
            EntityKind::System | EntityKind::Body | EntityKind::Listing => SizeClass::Large,
            _ => match self.shape() {
                Shape::JoinSet | Shape::Composition => SizeClass::Join,
                Shape::Lookup | Shape::Hashed => SizeClass::Small,
            },
        }
    }

    /// Authoritative external id field of hash-identified kinds.
    pub fn primary_field(self) -> Option<&'static str> {
        match self.shape() {
            Shape::Hashed => Some("eddb_id"),
            _ => None,
        }
    }

    /// Fallback external id field, for kinds delivered by a second source.
    pub fn secondary_field(self) -> Option<&'static str> {
        match self {
            EntityKind::System | EntityKind::Body => Some("edsm_id"),
            _ => None,
        }
    }

    /// Field on join rows pointing at the owning parent.
    pub fn parent_field(self) -> Option<&'static str> {
        match self.shape() {
            Shape::JoinSet => Some("station"),
            Shape::Composition => Some("body"),
            _ => None,
        }
    }

    /// Field on join rows identifying the child or component.
    pub fn child_field(self) -> Option<&'static str> {
        match self {
            EntityKind::StationImport | EntityKind::StationExport | EntityKind::StationProhibited => {
                Some("commodity")
            }
            EntityKind::StationShip => Some("ship"),
            EntityKind::BodyAtmosphere | EntityKind::BodySolid => Some("component"),
            EntityKind::BodyMaterial => Some("material"),
            _ => None,
        }
    }

    pub fn share_field(self) -> Option<&'static str> {
        match self.shape() {
            Shape::Composition => Some("share"),
            _ => None,
        }
    }

    /// Field whose touched values can filter a partial refresh.
    pub fn partial_field(self) -> Option<&'static str> {
        match self.shape() {
            Shape::Lookup => None,
            Shape::Hashed => self.primary_field(),
            Shape::JoinSet | Shape::Composition => self.parent_field(),
        }
    }

    /// Updates of this kind are expressed as delete-then-create.
    pub fn is_replace_style(self) -> bool {
        self.shape() == Shape::JoinSet
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s || k.endpoint() == s)
            .ok_or_else(|| format!("unknown entity kind: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
            assert_eq!(kind.endpoint().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("warp_drive".parse::<EntityKind>().is_err());
    }

    #[test]
    fn shape_specific_fields() {
        assert_eq!(EntityKind::System.partial_field(), Some("eddb_id"));
        assert_eq!(EntityKind::System.secondary_field(), Some("edsm_id"));
        assert_eq!(EntityKind::Station.secondary_field(), None);
        assert_eq!(EntityKind::StationExport.partial_field(), Some("station"));
        assert_eq!(EntityKind::BodyMaterial.child_field(), Some("material"));
        assert_eq!(EntityKind::Government.partial_field(), None);
        assert!(EntityKind::StationShip.is_replace_style());
        assert!(!EntityKind::BodySolid.is_replace_style());
        assert_eq!(EntityKind::Body.size_class(), SizeClass::Large);
        assert_eq!(EntityKind::StationImport.size_class(), SizeClass::Join);
    }
}
