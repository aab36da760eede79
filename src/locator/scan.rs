//! Scanning
//!
//! The [`Scanner`] resolves a locator into leaves and enumerates them as one
//! lazy stream. Adjacent leaves sharing one client, i.e. the same
//! (service, region, account), form a work unit. With `concurrency` above
//! one, that many units run at once; results come back either in cascade
//! order or as soon as they are ready. Sequential scans always follow
//! cascade order.

use super::component::{Catalog, Component};
use super::Locator;
use crate::aws::{AwsClientFactory, ClientCache, ClientFactory, ClientSettings, RetryPolicy};
use crate::config::Config;
use crate::error::ScanError;
use crate::fieldpath::FieldPathError;
use crate::resource::{Enumerator, Leaf, Observer, Registry, ResourceInstance};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// How a scan runs
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Work units run at once; 1 is strictly sequential
    pub concurrency: usize,
    /// Keep cascade order when running concurrently
    pub ordered: bool,
    pub retry: RetryPolicy,
    pub record_path: Option<PathBuf>,
    pub cancel: Option<CancellationToken>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            ordered: true,
            retry: RetryPolicy::default(),
            record_path: None,
            cancel: None,
        }
    }
}

/// Resolves locators into resources
pub struct Scanner {
    registry: Arc<Registry>,
    factory: Arc<dyn ClientFactory>,
    scheme: String,
    provider: String,
    options: ScanOptions,
    observers: Vec<Observer>,
    shared_clients: Option<Arc<ClientCache>>,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            registry,
            factory,
            scheme: "arn".to_string(),
            provider: "aws".to_string(),
            options: ScanOptions::default(),
            observers: Vec::new(),
            shared_clients: None,
        }
    }

    /// A scanner over the built-in registry talking to AWS
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry = Registry::builtin();
        let factory = AwsClientFactory::new(registry.clone(), config.clone())?;
        Ok(Self::new(registry, Arc::new(factory))
            .with_scheme(&config.scheme)
            .with_provider(&config.provider)
            .with_options(config.scan_options()))
    }

    pub fn with_scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_string();
        self
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize, ordered: bool) -> Self {
        self.options.concurrency = concurrency.max(1);
        self.options.ordered = ordered;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.options.cancel = Some(token);
        self
    }

    /// Register a callback run for every resource as it is created
    pub fn on_resource<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ResourceInstance) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Reuse one client cache across every scan of this scanner
    pub fn with_shared_clients(mut self) -> Self {
        self.shared_clients = Some(Arc::new(self.new_cache()));
        self
    }

    fn new_cache(&self) -> ClientCache {
        ClientCache::new(
            self.factory.clone(),
            self.registry.clone(),
            &self.provider,
            ClientSettings {
                retry: self.options.retry,
                record_path: self.options.record_path.clone(),
            },
        )
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn catalog(&self) -> Catalog {
        Catalog {
            registry: self.registry.clone(),
            scheme: self.scheme.clone(),
            provider: self.provider.clone(),
            accounts: self.factory.accounts(),
        }
    }

    /// The leaves a locator expands to
    pub fn resolve(&self, locator: &Locator) -> Vec<Leaf> {
        self.catalog().resolve(locator)
    }

    /// Choices for `component` starting with `prefix`, given the values
    /// resolved to its left
    pub fn complete(&self, component: Component, context: &[&str], prefix: &str) -> Vec<String> {
        let context: Vec<String> = context.iter().map(|s| s.to_string()).collect();
        self.catalog().complete(component, &context, prefix)
    }

    pub fn scan_str(&self, locator: &str) -> Result<Scan, FieldPathError> {
        Ok(self.scan(&Locator::parse(locator)?))
    }

    /// Start scanning. The stream is lazy: no backend call happens before
    /// it is polled.
    pub fn scan(&self, locator: &Locator) -> Scan {
        let leaves = self.resolve(locator);
        let leaf_count = leaves.len();

        let clients = match &self.shared_clients {
            Some(shared) => shared.clone(),
            None => Arc::new(self.new_cache()),
        };
        let enumerator = Arc::new(
            Enumerator::new(self.registry.clone(), clients)
                .with_post_filter(locator.post_filter().cloned())
                .with_observers(self.observers.clone()),
        );
        let cancel = self.options.cancel.clone().unwrap_or_default();

        let units = work_units(leaves);
        let unit_stream = move |leaves: Vec<Leaf>| {
            let enumerator = enumerator.clone();
            let cancel = cancel.clone();
            stream::iter(leaves)
                .flat_map(move |leaf| enumerator.clone().enumerate(leaf, cancel.clone()))
                .boxed()
        };

        let concurrency = self.options.concurrency.max(1);
        let stream: BoxStream<'static, Result<ResourceInstance, ScanError>> = if concurrency == 1 {
            stream::iter(units).flat_map(unit_stream).boxed()
        } else if self.options.ordered {
            stream::iter(units)
                .map(move |unit| unit_stream(unit).collect::<Vec<_>>())
                .buffered(concurrency)
                .flat_map(stream::iter)
                .boxed()
        } else {
            stream::iter(units)
                .map(unit_stream)
                .flatten_unordered(concurrency)
                .boxed()
        };

        tracing::debug!(
            "scanning {}: {} leaves, concurrency {}",
            locator,
            leaf_count,
            concurrency
        );
        Scan { leaf_count, stream }
    }
}

/// Split leaves into runs sharing one client key. Only adjacent leaves
/// are grouped, so concatenating the units gives back the input order.
fn work_units(leaves: Vec<Leaf>) -> Vec<Vec<Leaf>> {
    let mut units: Vec<Vec<Leaf>> = Vec::new();
    for leaf in leaves {
        match units.last_mut() {
            Some(unit) if unit[0].client_key() == leaf.client_key() => unit.push(leaf),
            _ => units.push(vec![leaf]),
        }
    }
    units
}

/// A running scan
pub struct Scan {
    leaf_count: usize,
    stream: BoxStream<'static, Result<ResourceInstance, ScanError>>,
}

impl Scan {
    /// Number of leaves the locator expanded to
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Drain the scan, keeping going past failed leaves
    pub async fn collect_lenient(self) -> (Vec<ResourceInstance>, Vec<ScanError>) {
        let mut resources = Vec::new();
        let mut errors = Vec::new();
        let mut stream = self.stream;
        while let Some(item) = stream.next().await {
            match item {
                Ok(resource) => resources.push(resource),
                Err(e) => errors.push(e),
            }
        }
        (resources, errors)
    }

    /// Drain the scan, stopping at the first error
    pub async fn try_collect_all(self) -> Result<Vec<ResourceInstance>, ScanError> {
        let mut resources = Vec::new();
        let mut stream = self.stream;
        while let Some(item) = stream.next().await {
            resources.push(item?);
        }
        Ok(resources)
    }
}

impl Stream for Scan {
    type Item = Result<ResourceInstance, ScanError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(service: &str, region: &str, account: &str, resource_type: &str) -> Leaf {
        Leaf {
            scheme: "loc".to_string(),
            provider: "aws".to_string(),
            service: service.to_string(),
            region: region.to_string(),
            account: account.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
        }
    }

    #[test]
    fn test_work_units_group_adjacent_leaves() {
        let units = work_units(vec![
            leaf("svc-x", "r1", "a", "widget"),
            leaf("svc-x", "r1", "a", "gadget"),
            leaf("svc-x", "r1", "b", "widget"),
            leaf("svc-x", "r2", "a", "widget"),
            leaf("svc-y", "r2", "a", "widget"),
            leaf("svc-x", "r1", "a", "sprocket"),
        ]);
        let sizes: Vec<usize> = units.iter().map(|u| u.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1, 1, 1]);
        assert_eq!(units[3][0].service, "svc-y");
        assert_eq!(units[4][0].resource_type, "sprocket");
    }

    #[test]
    fn test_work_units_keep_input_order() {
        let leaves = vec![
            leaf("sa", "r1", "a", "thing"),
            leaf("sa", "r2", "a", "thing"),
            leaf("sb", "r1", "a", "thing"),
            leaf("sb", "r2", "a", "thing"),
        ];
        let flattened: Vec<Leaf> = work_units(leaves.clone()).into_iter().flatten().collect();
        assert_eq!(flattened, leaves);
    }

    #[test]
    fn test_default_options() {
        let options = ScanOptions::default();
        assert_eq!(options.concurrency, 1);
        assert!(options.ordered);
        assert!(options.cancel.is_none());
    }
}
