use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One row as exchanged with the remote store.
pub type Row = serde_json::Map<String, Value>;

/// External natural key delivered by an upstream dump.
pub type ExternalId = i64;

pub const ID_FIELD: &str = "id";
pub const FINGERPRINT_FIELD: &str = "duphash";

/// Primary key assigned by the remote store. Kept at 32 bits so the
/// identity index stays small for multi-million row tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(pub u32);

impl StoreId {
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(StoreId)
    }

    /// The `id` column of a store row.
    pub fn of_row(row: &Row) -> Option<Self> {
        row.get(ID_FIELD).and_then(Self::from_value)
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<StoreId> for Value {
    fn from(id: StoreId) -> Self {
        Value::from(id.0)
    }
}

/// Integer field of a row; accepts integral floats and numeric strings
/// since dumps are not consistent about either.
pub fn row_i64(row: &Row, field: &str) -> Option<i64> {
    match row.get(field)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn row_store_id(row: &Row, field: &str) -> Option<StoreId> {
    row.get(field).and_then(StoreId::from_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_id_parsing() {
        assert_eq!(StoreId::from_value(&json!(7)), Some(StoreId(7)));
        assert_eq!(StoreId::from_value(&json!(-1)), None);
        assert_eq!(StoreId::from_value(&json!(u64::MAX)), None);
        assert_eq!(StoreId::from_value(&json!("7")), None);
    }

    #[test]
    fn lenient_integer_fields() {
        let row = json!({"a": 4, "b": 4.0, "c": " 12 ", "d": 4.5, "e": null})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(row_i64(&row, "a"), Some(4));
        assert_eq!(row_i64(&row, "b"), Some(4));
        assert_eq!(row_i64(&row, "c"), Some(12));
        assert_eq!(row_i64(&row, "d"), None);
        assert_eq!(row_i64(&row, "e"), None);
        assert_eq!(row_i64(&row, "missing"), None);
    }
}
