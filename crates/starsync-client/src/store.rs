use serde_json::Value;
use starsync_core::{EntityKind, Result, Row, StoreId};

/// `field` equals one of `values`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub offset: usize,
    pub limit: usize,
    pub filter: Option<Filter>,
}

impl ListQuery {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            filter: None,
        }
    }

    pub fn filtered(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter = Some(Filter {
            field: field.into(),
            values,
        });
        self
    }
}

/// One page of a list call; `count` is the total across all pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub count: usize,
    pub rows: Vec<Row>,
}

/// The central store as seen by the synchronization pipeline.
///
/// Implementations are shared between the ingestion thread and the
/// dispatcher workers, hence `Send + Sync` and `&self` receivers.
pub trait RemoteStore: Send + Sync {
    fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Page>;

    /// Single synchronous create; returns the stored row including `id`.
    fn create(&self, kind: EntityKind, row: Row) -> Result<Row>;

    /// Returns the number of rows accepted.
    fn bulk_create(&self, kind: EntityKind, rows: &[Row]) -> Result<usize>;

    /// Every row carries its `id`.
    fn bulk_update(&self, kind: EntityKind, rows: &[Row]) -> Result<usize>;

    fn destroy(&self, kind: EntityKind, id: StoreId) -> Result<()>;
}
