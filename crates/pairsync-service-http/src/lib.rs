// # HTTP Collection Service
//
// This crate provides a Store implementation over a generic JSON collection
// endpoint, used as the Secondary Service of a pairsync integration.
//
// ## Implementation Status
//
// - ✅ Makes one HTTP request per store call
// - ✅ Full error propagation to engine (engine handles retries and timeouts)
// - ✅ HTTP timeout configured (30 seconds)
// - ✅ Specific error handling for HTTP status codes (401, 403, 404, 429, 5xx)
// - ✅ Dry-run mode for safe testing
// - ✅ Configurable id and updated-at field names
// - ❌ NO retry logic (intentionally omitted - owned by Reconciler)
// - ❌ NO caching (intentionally omitted - every pass is a full scan)
// - ❌ NO background tasks (intentionally omitted - violates shutdown determinism)
//
// ## Trust Level: Untrusted (Store)
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS calls to the configured collection only
// - ✅ Parse collection-specific responses
//
// **Forbidden Capabilities**:
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic (owned by Reconciler)
// - ❌ Access the pairing table (owned by Reconciler)
//
// ## Security Requirements
//
// - API token NEVER appears in logs
// - API token MUST be provided via environment variables only
//
// ## API Shape
//
// - List: GET `{base}` → `[ {..}, .. ]` or `{ "results": [ {..}, .. ] }`
// - Create: POST `{base}` → the created object (or a `Location` header)
// - Update: PATCH `{base}/{id}`
// - Delete: DELETE `{base}/{id}` (404 means already gone)
//
// Every object carries its id and last-modification time under configurable
// field names; the time is epoch milliseconds or an RFC 3339 string.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pairsync_core::config::StoreConfig;
use pairsync_core::traits::{Document, Record, Store, StoreFactory, Timestamp};
use pairsync_core::{Error, Result, StoreRegistry};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Adapter name used in error messages
const SERVICE: &str = "http";

/// JSON collection reachable over HTTP
///
/// # Trust Level: Untrusted
///
/// This store is isolated, stateless, and single-shot. All coordination
/// (retries, timeouts, scheduling) is owned by `Reconciler`.
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the store will:
/// - Perform GET requests
/// - Log the intended PATCH and DELETE requests and report success
/// - Refuse creates, since there would be no real id to pair with
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API token.
pub struct HttpService {
    /// Collection name (for logging)
    name: String,

    /// Collection endpoint
    base_url: Url,

    /// Bearer token
    /// ⚠️ NEVER log this value
    api_token: Option<String>,

    /// Field carrying the record id
    id_field: String,

    /// Field carrying the last-modification time
    updated_at_field: String,

    /// HTTP client for API requests
    client: reqwest::Client,

    /// Dry-run mode: if true, perform GET requests but skip writes
    dry_run: bool,
}

// Custom Debug implementation that hides the API token
impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("api_token", &self.api_token.as_ref().map(|_| "<REDACTED>"))
            .field("id_field", &self.id_field)
            .field("updated_at_field", &self.updated_at_field)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl HttpService {
    /// Create a new HTTP collection store
    ///
    /// # Parameters
    ///
    /// - `name`: Collection name (for logging)
    /// - `base_url`: Collection endpoint, e.g. `https://api.example.com/crm/deals`
    /// - `api_token`: Optional bearer token
    /// - `dry_run`: If true, perform GET requests but skip writes
    ///
    /// Field names default to `id` and `updatedAt`; see
    /// [`with_fields`](Self::with_fields).
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_token: Option<String>,
        dry_run: bool,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(Error::config("HTTP store base URL cannot be empty"));
        }
        let base_url = Url::parse(&base_url)
            .map_err(|e| Error::config(format!("Invalid HTTP store base URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "HTTP store base URL cannot carry record paths: {}",
                base_url
            )));
        }
        if matches!(api_token.as_deref(), Some("")) {
            return Err(Error::config("HTTP store API token cannot be empty when set"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            base_url,
            api_token,
            id_field: "id".to_string(),
            updated_at_field: "updatedAt".to_string(),
            client,
            dry_run,
        })
    }

    /// Use custom id and updated-at field names
    pub fn with_fields(mut self, id_field: impl Into<String>, updated_at_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self.updated_at_field = updated_at_field.into();
        self
    }

    /// Whether writes are only logged
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// URL of one record; the id is percent-encoded as a single segment
    fn record_url(&self, id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::config(format!("HTTP store base URL cannot carry record paths: {}", self.base_url)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and map transport and status failures
    ///
    /// `missing_ok` turns a 404 into success (used by delete).
    async fn send(&self, what: &str, builder: RequestBuilder, missing_ok: bool) -> Result<Option<Response>> {
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("{} on '{}': {}", what, self.name, e))
            } else {
                Error::http(format!("{} on '{}' failed: {}", what, self.name, e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(Some(response));
        }
        if missing_ok && status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        Err(status_error(status.as_u16(), &format!("{} on '{}'", what, self.name), &body))
    }

    async fn read_json(&self, what: &str, response: Response) -> Result<Value> {
        response
            .json()
            .await
            .map_err(|e| Error::service(SERVICE, format!("{}: failed to parse response: {}", what, e)))
    }
}

#[async_trait]
impl Store<Document> for HttpService {
    fn name(&self) -> &str {
        &self.name
    }

    /// List the whole collection
    ///
    /// # API Call
    ///
    /// ```http
    /// GET {base}
    /// Authorization: Bearer <token>
    /// ```
    async fn list(&self) -> Result<Vec<Record<Document>>> {
        let response = self
            .send("list", self.request(Method::GET, self.base_url.clone()), false)
            .await?
            .ok_or_else(|| Error::not_found(format!("collection '{}'", self.name)))?;
        let body = self.read_json("list", response).await?;

        let records = parse_list(body, &self.id_field, &self.updated_at_field)?;
        tracing::debug!("Listed {} records from '{}'", records.len(), self.name);
        Ok(records)
    }

    async fn create(&self, data: &Document) -> Result<String> {
        let payload = outgoing(data, &self.id_field, &self.updated_at_field);

        if self.dry_run {
            let body = serde_json::Value::Object(payload);
            tracing::info!(
                "[DRY-RUN] Would send POST request to {} with payload: {}",
                self.base_url,
                body
            );
            return Err(Error::service(SERVICE, "dry-run: create not sent"));
        }

        let response = self
            .send(
                "create",
                self.request(Method::POST, self.base_url.clone()).json(&payload),
                false,
            )
            .await?
            .ok_or_else(|| Error::not_found(format!("collection '{}'", self.name)))?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Value = response.json().await.unwrap_or(Value::Null);

        let id = created_id(&body, &self.id_field, location.as_deref())?;
        tracing::info!("Created record {} in '{}'", id, self.name);
        Ok(id)
    }

    async fn update(&self, id: &str, data: &Document) -> Result<()> {
        let url = self.record_url(id)?;
        let payload = outgoing(data, &self.id_field, &self.updated_at_field);

        if self.dry_run {
            let body = serde_json::Value::Object(payload);
            tracing::info!(
                "[DRY-RUN] Would send PATCH request to {} with payload: {}",
                url,
                body
            );
            return Ok(());
        }

        self.send("update", self.request(Method::PATCH, url).json(&payload), false)
            .await?;
        tracing::info!("Updated record {} in '{}'", id, self.name);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let url = self.record_url(id)?;

        if self.dry_run {
            tracing::info!("[DRY-RUN] Would send DELETE request to {}", url);
            return Ok(());
        }

        match self.send("delete", self.request(Method::DELETE, url), true).await? {
            Some(_) => tracing::info!("Deleted record {} from '{}'", id, self.name),
            None => tracing::debug!("Record {} already gone from '{}'", id, self.name),
        }
        Ok(())
    }
}

/// Map a non-success status to an error
///
/// Transient statuses map to variants the engine retries.
pub fn status_error(status: u16, context: &str, body: &str) -> Error {
    match status {
        401 | 403 => Error::auth(format!(
            "{}: invalid API token or insufficient permissions. Status: {}",
            context, status
        )),
        404 => Error::not_found(context.to_string()),
        429 => Error::rate_limited(format!("{}: rate limit exceeded. Status: {}", context, status)),
        500..=599 => Error::unavailable(format!("{}: server error {} - {}", context, status, body)),
        _ => Error::service(SERVICE, format!("{}: unexpected status {} - {}", context, status, body)),
    }
}

/// Parse a list response: a bare array, or an object with a `results` array
pub fn parse_list(body: Value, id_field: &str, updated_at_field: &str) -> Result<Vec<Record<Document>>> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("results") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::service(
                    SERVICE,
                    "Invalid response format: expected an array or an object with a 'results' array",
                ));
            }
        },
        _ => {
            return Err(Error::service(
                SERVICE,
                "Invalid response format: expected an array",
            ));
        }
    };

    items
        .into_iter()
        .map(|item| parse_record(item, id_field, updated_at_field))
        .collect()
}

/// Split one object into id, timestamp and payload
pub fn parse_record(item: Value, id_field: &str, updated_at_field: &str) -> Result<Record<Document>> {
    let Value::Object(mut data) = item else {
        return Err(Error::service(SERVICE, "Invalid response format: record is not an object"));
    };

    let id = data
        .remove(id_field)
        .as_ref()
        .and_then(id_string)
        .ok_or_else(|| Error::service(SERVICE, format!("record without a usable '{}'", id_field)))?;

    let updated_at = data
        .remove(updated_at_field)
        .as_ref()
        .and_then(parse_timestamp)
        .ok_or_else(|| {
            Error::service(
                SERVICE,
                format!("record '{}' without a usable '{}'", id, updated_at_field),
            )
        })?;

    Ok(Record::new(id, updated_at, data))
}

/// Read a timestamp given as epoch milliseconds or an RFC 3339 string
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Id of a freshly created object, from the body or the `Location` header
fn created_id(body: &Value, id_field: &str, location: Option<&str>) -> Result<String> {
    if let Some(id) = body.get(id_field).and_then(id_string) {
        return Ok(id);
    }
    location
        .and_then(|loc| loc.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::service(
                SERVICE,
                format!("create response carries no '{}' and no Location header", id_field),
            )
        })
}

/// Payload sent to the service: the document without server-owned fields
fn outgoing(data: &Document, id_field: &str, updated_at_field: &str) -> Document {
    let mut payload = data.clone();
    payload.remove(id_field);
    payload.remove(updated_at_field);
    payload
}

/// Factory for creating HTTP collection stores
pub struct HttpServiceFactory;

#[async_trait]
impl StoreFactory for HttpServiceFactory {
    async fn create(&self, name: &str, config: &StoreConfig) -> Result<Arc<dyn Store<Document>>> {
        match config {
            StoreConfig::Http {
                base_url,
                api_token,
                id_field,
                updated_at_field,
            } => {
                config.validate()?;

                // Check for dry-run mode environment variable
                let dry_run = std::env::var("PAIRSYNC_MODE")
                    .unwrap_or_default()
                    .eq_ignore_ascii_case("dry-run");

                if dry_run {
                    tracing::warn!("HTTP store '{}' running in DRY-RUN mode - no changes will be made", name);
                }

                let service = HttpService::new(name, base_url.clone(), api_token.clone(), dry_run)?
                    .with_fields(id_field.clone(), updated_at_field.clone());
                Ok(Arc::new(service))
            }
            _ => Err(Error::config("Invalid config for HTTP store")),
        }
    }
}

/// Register the HTTP store with a registry
///
/// This function should be called during initialization to make the
/// `http` store type available.
///
/// # Example
///
/// ```rust
/// use pairsync_core::StoreRegistry;
///
/// let registry = StoreRegistry::with_builtins();
/// pairsync_service_http::register(&registry);
/// assert!(registry.has_store("http"));
/// ```
pub fn register(registry: &StoreRegistry) {
    registry.register_store("http", Arc::new(HttpServiceFactory));
}
