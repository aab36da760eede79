//! Backend client
//!
//! One [`BackendClient`] exists per (service, region, account). It sends named
//! operations through a [`Transport`], drains every page of a paginated
//! operation into one result, retries throttled calls with exponential
//! backoff, and optionally records results to disk.

use super::auth::Credentials;
use super::http::transport_for;
use crate::config::Config;
use crate::error::{ApiError, ErrorClass};
use crate::fieldpath::{scalar_to_string, FieldPath};
use crate::resource::{Pagination, Registry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Longest single backoff sleep
const MAX_BACKOFF: Duration = Duration::from_secs(20);

/// Pages drained per call before giving up on a paginator
pub const MAX_PAGES: usize = 1000;

/// Identity of a backend client
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey {
    pub service: String,
    pub region: String,
    pub account: String,
}

impl ClientKey {
    pub fn new(service: &str, region: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service, self.region, self.account)
    }
}

/// One page request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub key: ClientKey,
    pub operation: String,
    pub params: Value,
}

/// Sends one request and returns one raw response page
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError>;
}

/// Builds transports and knows which accounts exist
pub trait ClientFactory: Send + Sync {
    /// Account ids known to the local credential configuration
    fn accounts(&self) -> Vec<String>;

    /// Build an authenticated transport for one client key
    fn transport(&self, key: &ClientKey) -> Result<Arc<dyn Transport>>;
}

/// Throttling retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1`, doubling each time
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Pagination tokens for one service
#[derive(Debug, Clone, Default)]
pub struct Paging {
    default: Pagination,
    overrides: HashMap<String, Pagination>,
}

impl Paging {
    pub fn new(default: Pagination, overrides: HashMap<String, Pagination>) -> Self {
        Self { default, overrides }
    }

    pub fn for_operation(&self, operation: &str) -> &Pagination {
        self.overrides.get(operation).unwrap_or(&self.default)
    }
}

/// Client for one (service, region, account)
pub struct BackendClient {
    key: ClientKey,
    transport: Arc<dyn Transport>,
    paging: Paging,
    retry: RetryPolicy,
    max_pages: usize,
    record_path: Option<PathBuf>,
}

impl fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendClient")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(key: ClientKey, transport: Arc<dyn Transport>) -> Self {
        Self {
            key,
            transport,
            paging: Paging::default(),
            retry: RetryPolicy::default(),
            max_pages: MAX_PAGES,
            record_path: None,
        }
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_record_path(mut self, path: Option<PathBuf>) -> Self {
        self.record_path = path;
        self
    }

    pub fn key(&self) -> &ClientKey {
        &self.key
    }

    pub fn service(&self) -> &str {
        &self.key.service
    }

    pub fn region(&self) -> &str {
        &self.key.region
    }

    pub fn account(&self) -> &str {
        &self.key.account
    }

    /// Call an operation, draining all pages, and apply `query` to the
    /// merged result. A query that finds nothing yields `Value::Null`.
    pub async fn call(
        &self,
        operation: &str,
        query: Option<&FieldPath>,
        params: Value,
    ) -> Result<Value, ApiError> {
        tracing::debug!("call {} {} params={}", self.key, operation, params);

        let mut params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ApiError::transport(
                    operation,
                    format!("parameters must be an object, got {}", other),
                ))
            },
        };
        let paging = self.paging.for_operation(operation);
        let mut pages = Vec::new();
        let mut last_token: Option<String> = None;

        loop {
            let request = ApiRequest {
                key: self.key.clone(),
                operation: operation.to_string(),
                params: Value::Object(params.clone()),
            };
            let page = self.send_with_retry(&request).await?;

            let next_token = page
                .get(&paging.output_token)
                .and_then(scalar_to_string)
                .filter(|t| !t.is_empty());
            pages.push(page);

            match next_token {
                Some(_) if pages.len() >= self.max_pages => {
                    tracing::warn!(
                        "{} {}: stopping after {} pages, results may be incomplete",
                        self.key,
                        operation,
                        pages.len()
                    );
                    break;
                },
                Some(token) if last_token.as_deref() != Some(token.as_str()) => {
                    params.insert(paging.input_token.clone(), Value::String(token.clone()));
                    last_token = Some(token);
                },
                Some(_) => {
                    tracing::warn!(
                        "{} {}: pagination token repeated, stopping",
                        self.key,
                        operation
                    );
                    break;
                },
                None => break,
            }
        }

        tracing::debug!("{} {}: {} page(s)", self.key, operation, pages.len());
        let mut merged = merge_pages(pages);
        if let Value::Object(map) = &mut merged {
            map.remove(&paging.output_token);
        }
        self.record(operation, &request_params_without_token(params, paging), &merged)
            .await;

        Ok(match query {
            Some(path) => path.search(&merged).unwrap_or(Value::Null),
            None => merged,
        })
    }

    async fn send_with_retry(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let mut attempt = 1;
        loop {
            match self.transport.send(request).await {
                Err(e) if e.class() == ErrorClass::Throttled => {
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(
                            "{} {}: still throttled after {} attempts",
                            self.key,
                            request.operation,
                            attempt
                        );
                        return Err(ApiError::Throttled {
                            operation: request.operation.clone(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::debug!(
                        "{} {}: throttled, retrying in {:?}",
                        self.key,
                        request.operation,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                other => return other,
            }
        }
    }

    /// Write a call result below the record path, one file per call
    async fn record(&self, operation: &str, params: &Map<String, Value>, data: &Value) {
        let Some(root) = &self.record_path else {
            return;
        };

        let dir = root
            .join(&self.key.service)
            .join(&self.key.region)
            .join(&self.key.account);
        let path = dir.join(record_file_name(operation, params));

        if let Err(e) = write_record(&dir, &path, data).await {
            tracing::warn!("failed to record {:?}: {:#}", path, e);
        }
    }
}

async fn write_record(dir: &Path, path: &Path, data: &Value) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dir))?;
    let body = serde_json::to_string_pretty(data)?;
    tokio::fs::write(path, body).await?;
    Ok(())
}

fn request_params_without_token(
    mut params: Map<String, Value>,
    paging: &Pagination,
) -> Map<String, Value> {
    params.remove(&paging.input_token);
    params
}

/// `ListQueues` + `{"QueueNamePrefix": "jobs"}` -> `ListQueues_QueueNamePrefix_jobs.json`
pub fn record_file_name(operation: &str, params: &Map<String, Value>) -> String {
    let mut name = operation.to_string();
    let mut keys: Vec<_> = params.keys().collect();
    keys.sort();
    for key in keys {
        let value = match &params[key] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        name.push_str(&format!("_{}_{}", key, value));
    }
    let safe: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '-' })
        .collect();
    format!("{}.json", safe)
}

/// Combine response pages: list-valued fields are concatenated, other
/// fields keep their first value
fn merge_pages(pages: Vec<Value>) -> Value {
    let mut pages = pages.into_iter();
    let Some(mut merged) = pages.next() else {
        return Value::Null;
    };

    for page in pages {
        let (Value::Object(acc), Value::Object(next)) = (&mut merged, page) else {
            continue;
        };
        for (key, value) in next {
            match (acc.get_mut(&key), value) {
                (Some(Value::Array(existing)), Value::Array(more)) => existing.extend(more),
                (None, value) => {
                    acc.insert(key, value);
                },
                _ => {},
            }
        }
    }

    merged
}

/// Settings every client built by a cache shares
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub retry: RetryPolicy,
    pub record_path: Option<PathBuf>,
}

/// Keyed cache of backend clients.
///
/// Owned by one scan unless a scanner is told to share it across scans.
pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    registry: Arc<Registry>,
    provider: String,
    settings: ClientSettings,
    clients: Mutex<HashMap<ClientKey, Arc<BackendClient>>>,
    /// Home region per (service, account, id), for services whose list
    /// operation is not scoped to a region
    locations: Mutex<HashMap<(String, String, String), String>>,
}

impl ClientCache {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        registry: Arc<Registry>,
        provider: &str,
        settings: ClientSettings,
    ) -> Self {
        Self {
            factory,
            registry,
            provider: provider.to_string(),
            settings,
            clients: Mutex::new(HashMap::new()),
            locations: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached client for `key`, building it on first use
    pub fn get(&self, key: &ClientKey) -> Result<Arc<BackendClient>> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| anyhow::anyhow!("client cache lock poisoned"))?;

        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        tracing::debug!("creating client {}", key);
        let transport = self.factory.transport(key)?;
        let paging = self
            .registry
            .service(&self.provider, &key.service)
            .map(|s| Paging::new(s.pagination.clone(), s.paginators.clone()))
            .unwrap_or_default();
        let client = Arc::new(
            BackendClient::new(key.clone(), transport)
                .with_paging(paging)
                .with_retry(self.settings.retry)
                .with_record_path(self.settings.record_path.clone()),
        );
        clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    /// Previously resolved home region of a resource
    pub fn location(&self, service: &str, account: &str, id: &str) -> Option<String> {
        let locations = self.locations.lock().ok()?;
        locations
            .get(&(service.to_string(), account.to_string(), id.to_string()))
            .cloned()
    }

    pub fn remember_location(&self, service: &str, account: &str, id: &str, region: &str) {
        if let Ok(mut locations) = self.locations.lock() {
            locations.insert(
                (service.to_string(), account.to_string(), id.to_string()),
                region.to_string(),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Factory for real AWS endpoints, driven by the configuration file
pub struct AwsClientFactory {
    registry: Arc<Registry>,
    config: Config,
    http: reqwest::Client,
}

impl AwsClientFactory {
    pub fn new(registry: Arc<Registry>, config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("arnscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            registry,
            config,
            http,
        })
    }
}

impl ClientFactory for AwsClientFactory {
    fn accounts(&self) -> Vec<String> {
        self.config.account_ids()
    }

    fn transport(&self, key: &ClientKey) -> Result<Arc<dyn Transport>> {
        let service = self
            .registry
            .service(&self.config.provider, &key.service)
            .with_context(|| format!("no service metadata for '{}'", key.service))?;

        let profile = self.config.profile_for(&key.account);
        let credentials = Credentials::resolve(profile)
            .with_context(|| format!("no credentials for account '{}'", key.account))?;

        transport_for(
            self.http.clone(),
            service,
            &key.service,
            &key.region,
            self.config.endpoint_url.as_deref(),
            credentials,
        )
    }
}
