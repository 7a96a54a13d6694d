//! In-memory [`RemoteStore`] for dry runs and scenario tests.
//!
//! Lists go through the packed encoding and back, join tables enforce a
//! unique (parent, child) pair like the real schema, and every write is
//! recorded in order so callers can inspect what reached the store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::{json, Value};
use starsync_core::{EntityKind, Result, Row, Shape, StoreId, SyncError, ID_FIELD};
use tracing::debug;

use crate::packed::{decode_page, encode_packed};
use crate::store::{ListQuery, Page, RemoteStore};

/// A write as observed by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Create { kind: EntityKind, rows: Vec<Row> },
    Update { kind: EntityKind, rows: Vec<Row> },
    Delete { kind: EntityKind, id: StoreId },
}

impl StoreOp {
    pub fn kind(&self) -> EntityKind {
        match self {
            StoreOp::Create { kind, .. } | StoreOp::Update { kind, .. } | StoreOp::Delete { kind, .. } => *kind,
        }
    }
}

#[derive(Default)]
struct Inner {
    tables: HashMap<EntityKind, BTreeMap<u32, Row>>,
    next_id: u32,
    ops: Vec<StoreOp>,
    lists: Vec<(EntityKind, bool)>,
    busy_failures: u32,
    offline: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row directly, bypassing the op log. Returns its new id.
    pub fn seed(&self, kind: EntityKind, row: Row) -> StoreId {
        let mut inner = self.inner.lock();
        insert_row(&mut inner, kind, row)
    }

    pub fn rows(&self, kind: EntityKind) -> Vec<Row> {
        self.inner
            .lock()
            .tables
            .get(&kind)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, kind: EntityKind, id: StoreId) -> Option<Row> {
        self.inner.lock().tables.get(&kind)?.get(&id.0).cloned()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().ops.clone()
    }

    pub fn ops_for(&self, kind: EntityKind) -> Vec<StoreOp> {
        self.inner
            .lock()
            .ops
            .iter()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn clear_ops(&self) {
        let mut inner = self.inner.lock();
        inner.ops.clear();
        inner.lists.clear();
    }

    /// (kind, filtered) for every list call so far.
    pub fn list_calls(&self) -> Vec<(EntityKind, bool)> {
        self.inner.lock().lists.clone()
    }

    /// The next `n` write calls fail with a busy/locked error.
    pub fn fail_next_busy(&self, n: u32) {
        self.inner.lock().busy_failures = n;
    }

    /// Every later call fails at connection level.
    pub fn go_offline(&self) {
        self.inner.lock().offline = true;
    }

    fn check_write(inner: &mut Inner) -> Result<()> {
        if inner.offline {
            return Err(SyncError::Connection("memory store offline".to_string()));
        }
        if inner.busy_failures > 0 {
            inner.busy_failures -= 1;
            return Err(SyncError::StoreBusy("database is locked".to_string()));
        }
        Ok(())
    }
}

fn insert_row(inner: &mut Inner, kind: EntityKind, mut row: Row) -> StoreId {
    inner.next_id += 1;
    let id = inner.next_id;
    row.insert(ID_FIELD.to_string(), json!(id));
    inner.tables.entry(kind).or_default().insert(id, row);
    StoreId(id)
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn check_unique_pair(inner: &Inner, kind: EntityKind, row: &Row) -> Result<()> {
    if kind.shape() == Shape::Lookup {
        return Ok(());
    }
    let (Some(parent), Some(child)) = (kind.parent_field(), kind.child_field()) else {
        return Ok(());
    };
    let Some(table) = inner.tables.get(&kind) else {
        return Ok(());
    };
    let duplicate = table.values().any(|existing| {
        match (existing.get(parent), row.get(parent), existing.get(child), row.get(child)) {
            (Some(p1), Some(p2), Some(c1), Some(c2)) => same_value(p1, p2) && same_value(c1, c2),
            _ => false,
        }
    });
    if duplicate {
        return Err(SyncError::Rejected {
            entity: kind,
            status: 400,
            message: format!("duplicate ({}, {}) pair", parent, child),
        });
    }
    Ok(())
}

impl RemoteStore for MemoryStore {
    fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Page> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(SyncError::Connection("memory store offline".to_string()));
        }
        inner.lists.push((kind, query.filter.is_some()));

        let matching: Vec<Row> = inner
            .tables
            .get(&kind)
            .map(|table| {
                table
                    .values()
                    .filter(|row| match &query.filter {
                        None => true,
                        Some(filter) => row
                            .get(&filter.field)
                            .is_some_and(|v| filter.values.iter().any(|f| same_value(v, f))),
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let count = matching.len();
        let page: Vec<Row> = matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        debug!("memory list {}: {} of {}", kind, page.len(), count);
        decode_page(json!({ "count": count, "results": encode_packed(&page) }))
    }

    fn create(&self, kind: EntityKind, row: Row) -> Result<Row> {
        let mut inner = self.inner.lock();
        Self::check_write(&mut inner)?;
        check_unique_pair(&inner, kind, &row)?;
        inner.ops.push(StoreOp::Create {
            kind,
            rows: vec![row.clone()],
        });
        let id = insert_row(&mut inner, kind, row);
        inner
            .tables
            .get(&kind)
            .and_then(|t| t.get(&id.0))
            .cloned()
            .ok_or_else(|| SyncError::Decode("created row vanished".to_string()))
    }

    fn bulk_create(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        let mut inner = self.inner.lock();
        Self::check_write(&mut inner)?;
        for row in rows {
            check_unique_pair(&inner, kind, row)?;
        }
        inner.ops.push(StoreOp::Create {
            kind,
            rows: rows.to_vec(),
        });
        for row in rows {
            insert_row(&mut inner, kind, row.clone());
        }
        Ok(rows.len())
    }

    fn bulk_update(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        let mut inner = self.inner.lock();
        Self::check_write(&mut inner)?;
        let table = inner.tables.entry(kind).or_default();
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id = StoreId::of_row(row).ok_or_else(|| SyncError::Rejected {
                entity: kind,
                status: 400,
                message: "update row without id".to_string(),
            })?;
            if !table.contains_key(&id.0) {
                return Err(SyncError::Rejected {
                    entity: kind,
                    status: 404,
                    message: format!("no row {}", id),
                });
            }
            ids.push(id);
        }
        for (id, row) in ids.iter().zip(rows) {
            if let Some(existing) = table.get_mut(&id.0) {
                for (k, v) in row {
                    existing.insert(k.clone(), v.clone());
                }
            }
        }
        inner.ops.push(StoreOp::Update {
            kind,
            rows: rows.to_vec(),
        });
        Ok(rows.len())
    }

    fn destroy(&self, kind: EntityKind, id: StoreId) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check_write(&mut inner)?;
        if let Some(table) = inner.tables.get_mut(&kind) {
            table.remove(&id.0);
        }
        inner.ops.push(StoreOp::Delete { kind, id });
        Ok(())
    }
}
