//! In-memory backend shared by the integration tests

#![allow(dead_code)]

use arnscan::aws::{ApiRequest, ClientFactory, ClientKey, RetryPolicy, Transport};
use arnscan::{ApiError, Registry, ScanOptions, Scanner};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ACCOUNT: &str = "111111111111";
pub const OTHER_ACCOUNT: &str = "222222222222";

type Handler = dyn Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync;

/// Answers every call with a test-supplied closure and remembers the calls
#[derive(Clone)]
pub struct MockBackend {
    handler: Arc<Handler>,
    accounts: Vec<String>,
    calls: Arc<Mutex<Vec<ApiRequest>>>,
    connects: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new<F>(accounts: &[&str], handler: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            accounts: accounts.iter().map(|s| s.to_string()).collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Sleep before answering, so concurrent scans interleave
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == operation)
            .collect()
    }

    /// Number of transports handed out
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }
}

impl ClientFactory for MockBackend {
    fn accounts(&self) -> Vec<String> {
        self.accounts.clone()
    }

    fn transport(&self, _key: &ClientKey) -> anyhow::Result<Arc<dyn Transport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.clone()))
    }
}

/// Registry with a made-up `svc-x` service:
///
/// - `widget`: no server-side filter, inline tags absent, tag call `ListWidgetTags`
/// - `gadget`: list filter `GadgetIds`, detail call `DescribeGadget`
/// - `gizmo`: scalar records, attribute call, metric dimension `GizmoName`
pub fn registry() -> Arc<Registry> {
    let registry = Registry::from_json(
        r#"{
            "regions": ["region-1", "region-2"],
            "resources": {
                "aws.svc-x.widget": {
                    "enum_spec": {"operation": "ListWidgets", "path": "Widgets"},
                    "id": "WidgetId",
                    "name": "Name",
                    "date": "Created",
                    "tags_spec": {
                        "operation": "ListWidgetTags",
                        "param": "WidgetArn",
                        "source": "arn",
                        "path": "Tags"
                    }
                },
                "aws.svc-x.gadget": {
                    "enum_spec": {"operation": "ListGadgets", "path": "Gadgets"},
                    "id": "GadgetId",
                    "filter_name": "GadgetIds",
                    "filter_type": "list",
                    "detail_spec": {
                        "operation": "DescribeGadget",
                        "param": "GadgetId",
                        "path": "Gadget"
                    },
                    "tags_path": "Labels",
                    "tag_key": "k",
                    "tag_value": "v"
                },
                "aws.svc-x.gizmo": {
                    "enum_spec": {
                        "operation": "ListGizmos",
                        "path": "GizmoNames",
                        "params": {"Scope": "all"}
                    },
                    "id": "GizmoName",
                    "dimension": "GizmoName",
                    "attr_specs": [
                        {
                            "key": "Policy",
                            "operation": "GetGizmoPolicy",
                            "param": "GizmoName",
                            "path": "Policy"
                        }
                    ]
                }
            }
        }"#,
    )
    .expect("test registry should load");
    Arc::new(registry)
}

pub fn fast_options() -> ScanOptions {
    ScanOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
        ..ScanOptions::default()
    }
}

/// Scanner with scheme `loc` over [`registry`]
pub fn scanner(backend: &MockBackend) -> Scanner {
    Scanner::new(registry(), Arc::new(backend.clone()))
        .with_scheme("loc")
        .with_options(fast_options())
}

/// String parameter of a request
pub fn param<'a>(request: &'a ApiRequest, name: &str) -> Option<&'a str> {
    request.params.get(name).and_then(|v| v.as_str())
}
