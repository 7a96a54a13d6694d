//! Decoding of list responses.
//!
//! The packed encoding is `{"count": N, "results": [ncols, "h1", .., "hn",
//! v11, .., v1n, v21, ..]}`: a column count, that many header names, then
//! flat row tuples. Rows are rebuilt by zipping the headers onto each tuple.

use std::collections::BTreeSet;

use serde_json::Value;
use starsync_core::{Result, Row, SyncError};

use crate::store::Page;

pub fn decode_page(body: Value) -> Result<Page> {
    let mut body = match body {
        Value::Object(map) => map,
        other => {
            return Err(SyncError::Decode(format!(
                "list response is not an object: {}",
                truncate(&other.to_string())
            )))
        }
    };

    let count = body
        .get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| SyncError::Decode("list response has no integer count".to_string()))?
        as usize;

    let results = match body.remove("results") {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(SyncError::Decode(format!(
                "results is not an array: {}",
                truncate(&other.to_string())
            )))
        }
    };

    let rows = match results.first() {
        None => Vec::new(),
        Some(Value::Number(_)) => decode_packed(results)?,
        Some(Value::Object(_)) => results
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(SyncError::Decode(format!(
                    "mixed list results: {}",
                    truncate(&other.to_string())
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(SyncError::Decode(format!(
                "unrecognised list results starting with {}",
                truncate(&other.to_string())
            )))
        }
    };

    Ok(Page { count, rows })
}

/// Rebuild row mappings from a packed result stream.
pub fn decode_packed(results: Vec<Value>) -> Result<Vec<Row>> {
    let mut items = results.into_iter();

    let columns = items
        .next()
        .and_then(|v| v.as_u64())
        .ok_or_else(|| SyncError::Decode("packed results lack a column count".to_string()))?
        as usize;
    if columns == 0 {
        return Err(SyncError::Decode("packed results declare zero columns".to_string()));
    }

    let mut headers = Vec::with_capacity(columns);
    for _ in 0..columns {
        match items.next() {
            Some(Value::String(name)) => headers.push(name),
            Some(other) => {
                return Err(SyncError::Decode(format!(
                    "packed header is not a string: {}",
                    truncate(&other.to_string())
                )))
            }
            None => {
                return Err(SyncError::Decode(format!(
                    "packed results end after {} of {} headers",
                    headers.len(),
                    columns
                )))
            }
        }
    }

    let values: Vec<Value> = items.collect();
    if values.len() % columns != 0 {
        return Err(SyncError::Decode(format!(
            "packed tuples: {} values do not divide into rows of {}",
            values.len(),
            columns
        )));
    }

    let row_count = values.len() / columns;
    let mut rows = Vec::with_capacity(row_count);
    let mut values = values.into_iter();
    for _ in 0..row_count {
        let mut row = Row::new();
        for header in &headers {
            // length checked above
            let value = values.next().unwrap_or(Value::Null);
            row.insert(header.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Inverse of [`decode_packed`], used by the in-memory store.
pub fn encode_packed(rows: &[Row]) -> Vec<Value> {
    if rows.is_empty() {
        return Vec::new();
    }
    let headers: Vec<&String> = rows
        .iter()
        .flat_map(|row| row.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut out = Vec::with_capacity(1 + headers.len() + rows.len() * headers.len());
    out.push(Value::from(headers.len()));
    out.extend(headers.iter().map(|h| Value::String((*h).clone())));
    for row in rows {
        for header in &headers {
            out.push(row.get(*header).cloned().unwrap_or(Value::Null));
        }
    }
    out
}

fn truncate(s: &str) -> String {
    s.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn packed_rows_are_zipped_with_headers() {
        let body = json!({
            "count": 2,
            "results": [3, "id", "eddb_id", "duphash", 1, 17, "aaaa", 2, 18, null]
        });
        let page = decode_page(body).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0]["eddb_id"], json!(17));
        assert_eq!(page.rows[1]["duphash"], Value::Null);
    }

    #[test]
    fn unpacked_rows_pass_through() {
        let body = json!({"count": 1, "results": [{"id": 4, "name": "Gold"}]});
        let page = decode_page(body).unwrap();
        assert_eq!(page.rows[0]["name"], json!("Gold"));
    }

    #[test]
    fn empty_page() {
        let page = decode_page(json!({"count": 0, "results": []})).unwrap();
        assert_eq!(page, Page::default());
    }

    #[test]
    fn malformed_packed_results_are_rejected() {
        assert!(decode_packed(vec![json!(2), json!("id")]).is_err());
        assert!(decode_packed(vec![json!(2), json!("id"), json!(5)]).is_err());
        assert!(decode_packed(vec![json!(2), json!("id"), json!("x"), json!(1)]).is_err());
        assert!(decode_packed(vec![json!(0)]).is_err());
        assert!(decode_page(json!({"results": []})).is_err());
        assert!(decode_page(json!([1, 2])).is_err());
    }

    #[test]
    fn encoder_matches_decoder() {
        let rows: Vec<Row> = vec![
            json!({"id": 1, "name": "Sol"}).as_object().cloned().unwrap(),
            json!({"id": 2, "name": "Achenar"}).as_object().cloned().unwrap(),
        ];
        let packed = encode_packed(&rows);
        assert_eq!(packed[0], json!(2));
        assert_eq!(decode_packed(packed).unwrap(), rows);
    }
}
