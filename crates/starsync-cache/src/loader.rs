use std::sync::Arc;

use serde_json::Value;
use starsync_client::{ListQuery, RemoteStore};
use starsync_core::{EntityKind, Result, Row, StoreConfig};
use tracing::debug;

/// Reads whole tables, or the rows matching a set of values, from the store.
#[derive(Clone)]
pub struct TableLoader {
    store: Arc<dyn RemoteStore>,
    page_size: usize,
    filter_chunk: usize,
}

impl TableLoader {
    pub fn new(store: Arc<dyn RemoteStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            page_size: config.page_size.max(1),
            filter_chunk: config.filter_chunk.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Page through the table until the reported count is exhausted.
    pub fn scan_all(&self, kind: EntityKind, visit: &mut dyn FnMut(Row)) -> Result<usize> {
        let total = self.paginate(kind, None, visit)?;
        debug!("full scan of {}: {} rows", kind, total);
        Ok(total)
    }

    /// Rows whose `field` is one of `values`, requested a chunk of values
    /// at a time.
    pub fn scan_matching(
        &self,
        kind: EntityKind,
        field: &str,
        values: &[i64],
        visit: &mut dyn FnMut(Row),
    ) -> Result<usize> {
        let mut total = 0;
        for chunk in values.chunks(self.filter_chunk) {
            let filter: Vec<Value> = chunk.iter().map(|v| Value::from(*v)).collect();
            total += self.paginate(kind, Some((field, filter)), visit)?;
        }
        debug!("partial scan of {} on {} ({} values): {} rows", kind, field, values.len(), total);
        Ok(total)
    }

    fn paginate(
        &self,
        kind: EntityKind,
        filter: Option<(&str, Vec<Value>)>,
        visit: &mut dyn FnMut(Row),
    ) -> Result<usize> {
        let mut offset = 0;
        loop {
            let mut query = ListQuery::page(offset, self.page_size);
            if let Some((field, values)) = &filter {
                query = query.filtered(*field, values.clone());
            }
            let page = self.store.list(kind, &query)?;
            let received = page.rows.len();
            for row in page.rows {
                visit(row);
            }
            offset += received;
            if received == 0 || offset >= page.count {
                return Ok(offset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use starsync_client::MemoryStore;

    #[test]
    fn pages_until_count_is_reached() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..7 {
            store.seed(EntityKind::Faction, json!({"eddb_id": i}).as_object().cloned().unwrap());
        }
        let config = StoreConfig {
            page_size: 3,
            filter_chunk: 2,
            ..Default::default()
        };
        let loader = TableLoader::new(store.clone(), &config);
        let mut seen = Vec::new();
        assert_eq!(loader.scan_all(EntityKind::Faction, &mut |row| seen.push(row)).unwrap(), 7);
        assert_eq!(seen.len(), 7);
        assert_eq!(store.list_calls().len(), 3);

        store.clear_ops();
        let mut matched = 0;
        loader
            .scan_matching(EntityKind::Faction, "eddb_id", &[1, 3, 5], &mut |_| matched += 1)
            .unwrap();
        assert_eq!(matched, 3);
        assert_eq!(store.list_calls(), vec![(EntityKind::Faction, true), (EntityKind::Faction, true)]);
    }
}
