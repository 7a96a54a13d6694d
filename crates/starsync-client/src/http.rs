use std::time::Duration;

use reqwest::{Client, ClientBuilder, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use starsync_core::{EntityKind, Result, Row, StoreConfig, StoreId, SyncError};
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::packed::decode_page;
use crate::store::{ListQuery, Page, RemoteStore};

/// REST client for the central store.
///
/// The async `reqwest` client is driven through an owned runtime so that
/// the ingestion thread and dispatcher workers can call it synchronously.
pub struct HttpStore {
    client: Client,
    runtime: Runtime,
    base: Url,
    username: Option<String>,
    password: Option<SecretString>,
    packed: bool,
    timeout: Duration,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .field("packed", &self.packed)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base url {}: {}", config.base_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = ClientBuilder::new()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(8)
            .user_agent(concat!("starsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("starsync-http")
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            runtime,
            base,
            username: config.username.clone(),
            password: config.password.clone(),
            packed: config.packed,
            timeout: config.timeout(),
        })
    }

    fn collection_url(&self, kind: EntityKind) -> Result<Url> {
        self.base
            .join(&format!("{}/", kind.endpoint()))
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    fn item_url(&self, kind: EntityKind, id: StoreId) -> Result<Url> {
        self.base
            .join(&format!("{}/{}/", kind.endpoint(), id.0))
            .map_err(|e| SyncError::Config(e.to_string()))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(
                user,
                self.password.as_ref().map(|p| p.expose_secret().to_string()),
            ),
            None => builder,
        }
    }

    /// Send a request and return its body, mapping failures onto the
    /// store error taxonomy.
    fn execute(&self, kind: EntityKind, request: RequestBuilder) -> Result<String> {
        let limit = self.timeout;
        let (status, body) = self.runtime.block_on(async move {
            let response = match timeout(limit, request.send()).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(SyncError::Connection(format!("request failed: {}", e))),
                Err(_) => return Err(SyncError::Connection("request timed out".to_string())),
            };
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| SyncError::Connection(format!("failed to read body: {}", e)))?;
            Ok((status, body))
        })?;
        debug!("{} -> HTTP {}", kind, status.as_u16());
        classify_status(kind, status, &body)?;
        Ok(body)
    }
}

/// Map a non-success status onto the error taxonomy.
pub fn classify_status(kind: EntityKind, status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let excerpt: String = body.chars().take(200).collect();
    let lowered = excerpt.to_ascii_lowercase();
    if status == StatusCode::LOCKED
        || status == StatusCode::SERVICE_UNAVAILABLE
        || lowered.contains("locked")
        || lowered.contains("busy")
    {
        return Err(SyncError::StoreBusy(format!("HTTP {}: {}", status.as_u16(), excerpt)));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SyncError::Connection(format!(
            "store refused credentials (HTTP {})",
            status.as_u16()
        )));
    }
    Err(SyncError::Rejected {
        entity: kind,
        status: status.as_u16(),
        message: excerpt,
    })
}

fn filter_param(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl RemoteStore for HttpStore {
    fn list(&self, kind: EntityKind, query: &ListQuery) -> Result<Page> {
        let mut url = self.collection_url(kind)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("offset", &query.offset.to_string())
                .append_pair("limit", &query.limit.to_string());
            if self.packed {
                pairs.append_pair("format", "packed");
            }
            if let Some(filter) = &query.filter {
                pairs.append_pair(&format!("{}__in", filter.field), &filter_param(&filter.values));
            }
        }
        let body = self.execute(kind, self.request(Method::GET, url))?;
        decode_page(serde_json::from_str(&body)?)
    }

    fn create(&self, kind: EntityKind, row: Row) -> Result<Row> {
        let url = self.collection_url(kind)?;
        let body = self.execute(kind, self.request(Method::POST, url).json(&row))?;
        match serde_json::from_str(&body)? {
            Value::Object(created) => Ok(created),
            other => Err(SyncError::Decode(format!(
                "create {} returned {}",
                kind,
                other.to_string().chars().take(120).collect::<String>()
            ))),
        }
    }

    fn bulk_create(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let url = self.collection_url(kind)?;
        self.execute(kind, self.request(Method::POST, url).json(rows))?;
        Ok(rows.len())
    }

    fn bulk_update(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let url = self.collection_url(kind)?;
        self.execute(kind, self.request(Method::PATCH, url).json(rows))?;
        Ok(rows.len())
    }

    fn destroy(&self, kind: EntityKind, id: StoreId) -> Result<()> {
        let url = self.item_url(kind, id)?;
        match self.execute(kind, self.request(Method::DELETE, url)) {
            Ok(_) => Ok(()),
            // already gone is what we wanted
            Err(SyncError::Rejected { status: 404, .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(base: &str) -> HttpStore {
        let config = StoreConfig {
            base_url: base.to_string(),
            ..Default::default()
        };
        HttpStore::new(&config).unwrap()
    }

    #[test]
    fn urls_are_built_under_the_base_path() {
        let s = store("http://localhost:8000/api");
        assert_eq!(
            s.collection_url(EntityKind::StationExport).unwrap().as_str(),
            "http://localhost:8000/api/station-exports/"
        );
        assert_eq!(
            s.item_url(EntityKind::System, StoreId(12)).unwrap().as_str(),
            "http://localhost:8000/api/systems/12/"
        );
    }

    #[test]
    fn invalid_base_url_is_a_config_error() {
        let config = StoreConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(HttpStore::new(&config), Err(SyncError::Config(_))));
    }

    #[test]
    fn status_classification() {
        let kind = EntityKind::Body;
        assert!(classify_status(kind, StatusCode::OK, "").is_ok());
        assert!(classify_status(kind, StatusCode::LOCKED, "").unwrap_err().is_transient());
        assert!(classify_status(kind, StatusCode::INTERNAL_SERVER_ERROR, "database is locked")
            .unwrap_err()
            .is_transient());
        assert!(matches!(
            classify_status(kind, StatusCode::BAD_REQUEST, "{\"name\": [\"required\"]}"),
            Err(SyncError::Rejected { status: 400, .. })
        ));
        assert!(classify_status(kind, StatusCode::UNAUTHORIZED, "").unwrap_err().is_fatal());
    }

    #[test]
    fn filter_values_are_comma_joined() {
        assert_eq!(filter_param(&[json!(1), json!(22), json!("x")]), "1,22,x");
    }
}
