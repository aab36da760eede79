//! Resource Enumerator
//!
//! Turns one fully resolved leaf of the cascade (service, region, account,
//! resource type, optional literal id) into a stream of resources:
//!
//! 1. resolve the descriptor (unknown types yield nothing)
//! 2. list records, filtering by id server-side when the type supports it
//! 3. filter by id client-side when it does not
//! 4. drop records whose home region is not the leaf's, for types listed
//!    globally (the home region is looked up once per scan)
//! 5. fetch details and attributes per record
//! 6. build and yield a [`ResourceInstance`]
//!
//! NotFound from the backend means "nothing here": an empty leaf during
//! listing, a skipped record during detail fetch. Any other backend error is
//! yielded once and ends the leaf.

use super::descriptor::ResourceDescriptor;
use super::instance::{build_arn, param_value, Origin, ResourceInstance};
use super::registry::Registry;
use crate::aws::{BackendClient, ClientCache, ClientKey};
use crate::error::ScanError;
use crate::fieldpath::{scalar_to_string, FieldPath};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Callback run for every resource before it is yielded
pub type Observer = Arc<dyn Fn(&ResourceInstance) + Send + Sync>;

/// One fully resolved branch of the cascade
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Leaf {
    pub scheme: String,
    pub provider: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource_type: String,
    /// Literal id to select; `None` selects everything
    pub resource_id: Option<String>,
}

impl Leaf {
    pub fn client_key(&self) -> ClientKey {
        ClientKey::new(&self.service, &self.region, &self.account)
    }
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.scheme, self.provider, self.service, self.region, self.account, self.resource_type
        )?;
        if let Some(id) = &self.resource_id {
            write!(f, "/{}", id)?;
        }
        Ok(())
    }
}

/// State of one leaf's listing
struct LeafCursor {
    leaf: Leaf,
    descriptor: Arc<ResourceDescriptor>,
    client: Arc<BackendClient>,
    origin: Arc<Origin>,
    records: VecDeque<Value>,
    client_side: bool,
    seen: HashSet<String>,
}

enum LeafState {
    Start(Leaf),
    Records(Box<LeafCursor>),
    Done,
}

/// Enumerates leaves for one scan
pub struct Enumerator {
    registry: Arc<Registry>,
    clients: Arc<ClientCache>,
    post_filter: Option<FieldPath>,
    observers: Vec<Observer>,
}

impl Enumerator {
    pub fn new(registry: Arc<Registry>, clients: Arc<ClientCache>) -> Self {
        Self {
            registry,
            clients,
            post_filter: None,
            observers: Vec::new(),
        }
    }

    pub fn with_post_filter(mut self, post_filter: Option<FieldPath>) -> Self {
        self.post_filter = post_filter;
        self
    }

    pub fn with_observers(mut self, observers: Vec<Observer>) -> Self {
        self.observers = observers;
        self
    }

    pub fn clients(&self) -> &Arc<ClientCache> {
        &self.clients
    }

    /// Lazily enumerate one leaf. Nothing is called until the stream is polled.
    pub fn enumerate(
        self: Arc<Self>,
        leaf: Leaf,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<ResourceInstance, ScanError>> {
        stream::unfold(LeafState::Start(leaf), move |state| {
            let this = self.clone();
            let cancel = cancel.clone();
            async move { this.step(state, &cancel).await }
        })
        .boxed()
    }

    async fn step(
        &self,
        mut state: LeafState,
        cancel: &CancellationToken,
    ) -> Option<(Result<ResourceInstance, ScanError>, LeafState)> {
        loop {
            if cancel.is_cancelled() {
                tracing::debug!("scan cancelled");
                return None;
            }

            state = match state {
                LeafState::Done => return None,
                LeafState::Start(leaf) => match self.open(leaf).await {
                    Ok(Some(cursor)) => LeafState::Records(Box::new(cursor)),
                    Ok(None) => return None,
                    Err(e) => return Some((Err(e), LeafState::Done)),
                },
                LeafState::Records(mut cursor) => {
                    let record = cursor.records.pop_front()?;
                    match self.build(&mut cursor, record).await {
                        Ok(Some(instance)) => {
                            return Some((Ok(instance), LeafState::Records(cursor)))
                        },
                        Ok(None) => LeafState::Records(cursor),
                        Err(e) => return Some((Err(e), LeafState::Done)),
                    }
                },
            };
        }
    }

    /// Resolve the descriptor and run the listing call
    async fn open(&self, leaf: Leaf) -> Result<Option<LeafCursor>, ScanError> {
        let Some(descriptor) = self
            .registry
            .resolve_descriptor(&leaf.provider, &leaf.service, &leaf.resource_type)
        else {
            tracing::debug!("{}: no descriptor registered", leaf);
            return Ok(None);
        };

        let key = leaf.client_key();
        let client = self.clients.get(&key).map_err(|e| ScanError::Client {
            target: leaf.to_string(),
            message: format!("{:#}", e),
        })?;

        let mut params: Map<String, Value> = descriptor.enum_spec.params.clone();
        let mut client_side = false;
        if let Some(id) = &leaf.resource_id {
            match descriptor.filter_params(id) {
                Some((name, value)) => {
                    params.insert(name, value);
                    client_side = descriptor.filter_is_prefix;
                },
                None => client_side = true,
            }
        }

        tracing::info!("enumerating {}", leaf);
        let listing = client
            .call(
                &descriptor.enum_spec.operation,
                descriptor.enum_spec.path.as_ref(),
                Value::Object(params),
            )
            .await;

        let records: VecDeque<Value> = match listing {
            Ok(Value::Array(items)) => items.into(),
            Ok(Value::Null) => VecDeque::new(),
            Ok(single) => VecDeque::from([single]),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{}: {}", leaf, e);
                VecDeque::new()
            },
            Err(e) => {
                tracing::warn!("{}: {}", leaf, e);
                return Err(ScanError::backend(&leaf, e));
            },
        };
        tracing::debug!("{}: {} record(s)", leaf, records.len());

        let service_def = self.registry.service(&leaf.provider, &leaf.service);
        let omits_region = service_def.is_some_and(|s| s.arn_omits_region);
        let omits_account = service_def.is_some_and(|s| s.arn_omits_account);
        let origin = Arc::new(Origin {
            scheme: leaf.scheme.clone(),
            provider: leaf.provider.clone(),
            service: leaf.service.clone(),
            region: leaf.region.clone(),
            account: leaf.account.clone(),
            resource_type: leaf.resource_type.clone(),
            arn_region: if omits_region { String::new() } else { leaf.region.clone() },
            arn_account: if omits_account { String::new() } else { leaf.account.clone() },
        });

        Ok(Some(LeafCursor {
            leaf,
            descriptor,
            client,
            origin,
            records,
            client_side,
            seen: HashSet::new(),
        }))
    }

    /// Turn one raw record into a resource; `Ok(None)` skips it
    async fn build(
        &self,
        cursor: &mut LeafCursor,
        record: Value,
    ) -> Result<Option<ResourceInstance>, ScanError> {
        let d = cursor.descriptor.clone();

        let record = match d.hooks.transform {
            Some(transform) => match transform(record) {
                Some(r) => r,
                None => return Ok(None),
            },
            None => record,
        };
        let mut data = d.wrap_scalar(record);

        let id = match &d.id {
            Some(path) => match path.search_str(&data).filter(|s| !s.is_empty()) {
                Some(id) => id,
                None => {
                    tracing::warn!("{}: record has no '{}', skipping: {}", cursor.leaf, path, data);
                    return Ok(None);
                },
            },
            None => String::new(),
        };

        if cursor.client_side {
            if let Some(wanted) = &cursor.leaf.resource_id {
                if !d.matches_id(wanted, &data) {
                    return Ok(None);
                }
            }
        }

        if !id.is_empty() && !cursor.seen.insert(id.clone()) {
            tracing::debug!("{}: duplicate id {}", cursor.leaf, id);
            return Ok(None);
        }

        if let Some(spec) = &d.location_spec {
            let (service, account) = (&cursor.leaf.service, &cursor.leaf.account);
            let region = match self.clients.location(service, account, &id) {
                Some(region) => region,
                None => {
                    let arn = build_arn(&d, &cursor.origin, &id, &data);
                    let Some(value) = param_value(&spec.fetch.source, &id, &arn, &data) else {
                        return Ok(None);
                    };
                    let fetch = &spec.fetch;
                    let reported = match cursor
                        .client
                        .call(&fetch.operation, fetch.path.as_ref(), fetch.build_params(value))
                        .await
                    {
                        Ok(found) => found,
                        Err(e) if e.is_not_found() => {
                            tracing::debug!("{}: {} disappeared: {}", cursor.leaf, id, e);
                            return Ok(None);
                        },
                        Err(e) => return Err(ScanError::backend(&cursor.leaf, e)),
                    };
                    let region = spec.region_for(scalar_to_string(&reported).as_deref());
                    self.clients.remember_location(service, account, &id, &region);
                    region
                },
            };
            if region != cursor.leaf.region {
                tracing::trace!("{}: {} lives in {}", cursor.leaf, id, region);
                return Ok(None);
            }
        }

        if let Some(spec) = &d.detail_spec {
            let arn = build_arn(&d, &cursor.origin, &id, &data);
            let Some(value) = param_value(&spec.source, &id, &arn, &data) else {
                tracing::warn!(
                    "{}: no value for detail parameter {}, skipping {}",
                    cursor.leaf,
                    spec.param,
                    id
                );
                return Ok(None);
            };
            match cursor
                .client
                .call(&spec.operation, spec.path.as_ref(), spec.build_params(value))
                .await
            {
                Ok(detail) => merge(&mut data, detail),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("{}: {} disappeared: {}", cursor.leaf, id, e);
                    return Ok(None);
                },
                Err(e) => return Err(ScanError::backend(&cursor.leaf, e)),
            }
        }

        for attr in &d.attr_specs {
            let spec = &attr.fetch;
            let arn = build_arn(&d, &cursor.origin, &id, &data);
            let value = match param_value(&spec.source, &id, &arn, &data) {
                Some(value) => match cursor
                    .client
                    .call(&spec.operation, spec.path.as_ref(), spec.build_params(value))
                    .await
                {
                    Ok(found) => found,
                    Err(e) if e.is_not_found() => {
                        tracing::debug!(
                            "{}: attribute {} not found for {}",
                            cursor.leaf,
                            attr.key,
                            id
                        );
                        Value::Null
                    },
                    Err(e) => return Err(ScanError::backend(&cursor.leaf, e)),
                },
                None => Value::Null,
            };
            if let Value::Object(map) = &mut data {
                map.insert(attr.key.clone(), value);
            }
        }

        let filtered_data = self.post_filter.as_ref().and_then(|p| p.search(&data));
        let instance = ResourceInstance::new(
            d,
            cursor.client.clone(),
            self.clients.clone(),
            cursor.origin.clone(),
            id,
            data,
            filtered_data,
        );

        for observer in &self.observers {
            observer(&instance);
        }
        Ok(Some(instance))
    }
}

/// Detail results extend an object record, and replace anything else
fn merge(data: &mut Value, detail: Value) {
    match (data, detail) {
        (_, Value::Null) => {},
        (Value::Object(base), Value::Object(extra)) => base.extend(extra),
        (data, detail) => *data = detail,
    }
}
