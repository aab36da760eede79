//! Resource Registry - Load resource descriptors from JSON
//!
//! This module loads the service table and every resource descriptor from
//! embedded JSON files and answers the lookups the cascade needs.

use super::descriptor::ResourceDescriptor;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};

/// Embedded resource JSON files (compiled into the binary)
const RESOURCE_FILES: &[&str] = &[
    include_str!("../resources/common.json"),
    include_str!("../resources/compute.json"),
    include_str!("../resources/containers.json"),
    include_str!("../resources/database.json"),
    include_str!("../resources/messaging.json"),
    include_str!("../resources/network.json"),
    include_str!("../resources/security.json"),
    include_str!("../resources/storage.json"),
];

fn next_token() -> String {
    "NextToken".to_string()
}

fn default_json_version() -> String {
    "1.0".to_string()
}

/// Request/response field names carrying the pagination token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default = "next_token")]
    pub input_token: String,
    #[serde(default = "next_token")]
    pub output_token: String,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            input_token: next_token(),
            output_token: next_token(),
        }
    }
}

/// Wire protocol a service speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    /// `POST /` with `X-Amz-Target` and a JSON body
    #[default]
    Json,
    /// Form-encoded `Action=` requests, XML responses with `member` lists
    Query,
    /// The EC2 dialect of the query protocol: `item` lists, no result wrapper
    Ec2,
    /// Routed HTTP requests with XML responses
    RestXml,
    /// Routed HTTP requests with JSON responses
    RestJson,
}

impl Protocol {
    pub fn is_rest(self) -> bool {
        matches!(self, Protocol::RestXml | Protocol::RestJson)
    }
}

fn get() -> String {
    "GET".to_string()
}

/// HTTP route of one REST operation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Route {
    #[serde(default = "get")]
    pub method: String,
    /// Path template with `{Param}` placeholders and an optional fixed
    /// query, e.g. `/{Bucket}?location`. Parameters without a placeholder
    /// go to the query string under their own name.
    pub uri: String,
}

/// Service definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDef {
    #[serde(default)]
    pub protocol: Protocol,
    /// Host prefix, defaults to the service name
    #[serde(default)]
    pub endpoint_prefix: Option<String>,
    /// SigV4 service name, defaults to the endpoint prefix
    #[serde(default)]
    pub signing_name: Option<String>,
    /// `X-Amz-Target` prefix
    #[serde(default)]
    pub target_prefix: Option<String>,
    #[serde(default = "default_json_version")]
    pub json_version: String,
    /// `Version` parameter of query protocol requests
    #[serde(default)]
    pub api_version: Option<String>,
    /// Operation routes of REST services
    #[serde(default)]
    pub routes: HashMap<String, Route>,
    /// XML element names that mark list entries, besides `member` and `item`
    #[serde(default)]
    pub list_items: Vec<String>,
    /// Host of a global service's single endpoint, e.g. `iam.amazonaws.com`
    #[serde(default)]
    pub global_endpoint: Option<String>,
    /// Restricts the region choice set
    #[serde(default)]
    pub regions: Option<Vec<String>>,
    /// Global services have the single region choice `""`
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub arn_omits_region: bool,
    #[serde(default)]
    pub arn_omits_account: bool,
    #[serde(default)]
    pub pagination: Pagination,
    /// Per-operation pagination overrides
    #[serde(default)]
    pub paginators: HashMap<String, Pagination>,
}

impl Default for ServiceDef {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            endpoint_prefix: None,
            signing_name: None,
            target_prefix: None,
            json_version: default_json_version(),
            api_version: None,
            routes: HashMap::new(),
            list_items: Vec::new(),
            global_endpoint: None,
            regions: None,
            global: false,
            arn_omits_region: false,
            arn_omits_account: false,
            pagination: Pagination::default(),
            paginators: HashMap::new(),
        }
    }
}

/// Root structure of resources/*.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub regions: Vec<String>,
    /// Keyed `provider.service`
    #[serde(default)]
    pub services: HashMap<String, ServiceDef>,
    /// Keyed `provider.service.type`
    #[serde(default)]
    pub resources: HashMap<String, Value>,
}

/// Lookup table of services and descriptors
#[derive(Debug, Default)]
pub struct Registry {
    regions: Vec<String>,
    services: BTreeMap<(String, String), ServiceDef>,
    descriptors: BTreeMap<(String, String, String), Arc<ResourceDescriptor>>,
}

/// Global registry loaded from the embedded JSON
static REGISTRY: OnceLock<Arc<Registry>> = OnceLock::new();

impl Registry {
    /// An empty registry, for building one up by hand
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry compiled into the binary (loaded on first access)
    pub fn builtin() -> Arc<Registry> {
        REGISTRY
            .get_or_init(|| {
                let registry = Registry::from_json_files(RESOURCE_FILES)
                    .unwrap_or_else(|e| panic!("Failed to parse embedded resource JSON: {:#}", e));
                Arc::new(registry)
            })
            .clone()
    }

    /// Merge several JSON documents; later files extend earlier ones
    pub fn from_json_files(files: &[&str]) -> Result<Self> {
        let mut registry = Registry::new();
        for (n, content) in files.iter().enumerate() {
            let file: RegistryFile =
                serde_json::from_str(content).with_context(|| format!("resource file #{}", n))?;
            registry.merge(file)?;
        }
        Ok(registry)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Self::from_json_files(&[content])
    }

    fn merge(&mut self, file: RegistryFile) -> Result<()> {
        if !file.regions.is_empty() {
            self.regions = file.regions;
        }

        for (key, def) in file.services {
            let Some((provider, service)) = key.split_once('.') else {
                bail!("service key '{}' is not provider.service", key);
            };
            self.add_service(provider, service, def);
        }

        for (key, value) in file.resources {
            let mut parts = key.splitn(3, '.');
            let (Some(provider), Some(service), Some(resource_type)) =
                (parts.next(), parts.next(), parts.next())
            else {
                bail!("resource key '{}' is not provider.service.type", key);
            };
            let descriptor = ResourceDescriptor::from_value(provider, service, resource_type, value)
                .with_context(|| format!("resource '{}'", key))?;
            self.add_descriptor(descriptor);
        }

        Ok(())
    }

    pub fn set_regions(&mut self, regions: Vec<String>) {
        self.regions = regions;
    }

    pub fn add_service(&mut self, provider: &str, service: &str, def: ServiceDef) {
        self.services
            .insert((provider.to_string(), service.to_string()), def);
    }

    pub fn add_descriptor(&mut self, descriptor: ResourceDescriptor) {
        let key = (
            descriptor.provider.clone(),
            descriptor.service.clone(),
            descriptor.resource_type.clone(),
        );
        self.descriptors.insert(key, Arc::new(descriptor));
    }

    /// Providers that have at least one resource type
    pub fn all_providers(&self) -> Vec<String> {
        let providers: BTreeSet<&String> = self.descriptors.keys().map(|(p, _, _)| p).collect();
        providers.into_iter().cloned().collect()
    }

    /// Services of `provider` that have at least one resource type
    pub fn all_services(&self, provider: &str) -> Vec<String> {
        let services: BTreeSet<&String> = self
            .descriptors
            .keys()
            .filter(|(p, _, _)| p == provider)
            .map(|(_, s, _)| s)
            .collect();
        services.into_iter().cloned().collect()
    }

    pub fn all_types(&self, provider: &str, service: &str) -> Vec<String> {
        self.descriptors
            .keys()
            .filter(|(p, s, _)| p == provider && s == service)
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    pub fn resolve_descriptor(
        &self,
        provider: &str,
        service: &str,
        resource_type: &str,
    ) -> Option<Arc<ResourceDescriptor>> {
        self.descriptors
            .get(&(provider.to_string(), service.to_string(), resource_type.to_string()))
            .cloned()
    }

    pub fn service(&self, provider: &str, service: &str) -> Option<&ServiceDef> {
        self.services.get(&(provider.to_string(), service.to_string()))
    }

    /// Region choice set for a service
    pub fn regions_for(&self, provider: &str, service: &str) -> Vec<String> {
        match self.service(provider, service) {
            Some(def) if def.global => vec![String::new()],
            Some(ServiceDef {
                regions: Some(regions),
                ..
            }) => regions.clone(),
            _ => self.regions.clone(),
        }
    }

    /// Number of registered resource types
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Get a descriptor from the built-in registry
pub fn resolve_descriptor(
    provider: &str,
    service: &str,
    resource_type: &str,
) -> Option<Arc<ResourceDescriptor>> {
    Registry::builtin().resolve_descriptor(provider, service, resource_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads_successfully() {
        let registry = Registry::builtin();
        assert!(!registry.is_empty(), "Registry should have resources");
    }

    #[test]
    fn test_every_service_has_protocol_metadata() {
        let registry = Registry::builtin();
        for provider in registry.all_providers() {
            for service in registry.all_services(&provider) {
                let def = registry
                    .service(&provider, &service)
                    .unwrap_or_else(|| panic!("no service entry for {}", service));
                match def.protocol {
                    Protocol::Json => {
                        assert!(def.target_prefix.is_some(), "{} has no target prefix", service)
                    },
                    Protocol::Query | Protocol::Ec2 => {
                        assert!(def.api_version.is_some(), "{} has no api version", service)
                    },
                    Protocol::RestXml | Protocol::RestJson => {
                        let descriptors = registry
                            .all_types(&provider, &service)
                            .into_iter()
                            .filter_map(|t| registry.resolve_descriptor(&provider, &service, &t));
                        for d in descriptors {
                            let mut ops = vec![d.enum_spec.operation.clone()];
                            ops.extend(d.detail_spec.iter().map(|s| s.operation.clone()));
                            ops.extend(d.tags_spec.iter().map(|s| s.operation.clone()));
                            ops.extend(d.attr_specs.iter().map(|a| a.fetch.operation.clone()));
                            ops.extend(d.location_spec.iter().map(|l| l.fetch.operation.clone()));
                            for op in ops {
                                let routed = def.routes.contains_key(&op);
                                assert!(routed, "{} has no route for {}", service, op);
                            }
                        }
                    },
                }
            }
        }
    }

    #[test]
    fn test_query_services() {
        let registry = Registry::builtin();
        let ec2 = registry.service("aws", "ec2").unwrap();
        assert_eq!(ec2.protocol, Protocol::Ec2);
        assert_eq!(ec2.pagination.output_token, "nextToken");

        let instance = resolve_descriptor("aws", "ec2", "instance").unwrap();
        assert_eq!(
            instance.enum_spec.path.as_ref().unwrap().as_str(),
            "reservationSet[].instancesSet[]"
        );
        assert_eq!(
            instance.filter_params("i-1"),
            Some(("InstanceId".to_string(), serde_json::json!(["i-1"])))
        );

        assert_eq!(registry.regions_for("aws", "iam"), vec![""]);
        assert_eq!(registry.service("aws", "iam").unwrap().protocol, Protocol::Query);
        for (service, resource_type) in [
            ("ec2", "volume"),
            ("ec2", "security-group"),
            ("iam", "user"),
            ("rds", "db"),
            ("sns", "topic"),
            ("elb", "loadbalancer"),
        ] {
            let found = resolve_descriptor("aws", service, resource_type);
            assert!(found.is_some(), "{}", resource_type);
        }
    }

    #[test]
    fn test_s3_bucket_uses_locations() {
        let registry = Registry::builtin();
        let s3 = registry.service("aws", "s3").unwrap();
        assert_eq!(s3.protocol, Protocol::RestXml);
        assert_eq!(s3.routes["GetBucketLocation"].uri, "/{Bucket}?location");

        let bucket = resolve_descriptor("aws", "s3", "bucket").unwrap();
        let location = bucket.location_spec.as_ref().unwrap();
        assert_eq!(location.region_for(None), "us-east-1");
        assert_eq!(location.region_for(Some("EU")), "eu-west-1");
        assert_eq!(location.region_for(Some("ap-south-1")), "ap-south-1");
    }

    #[test]
    fn test_sqs_queue_descriptor_exists() {
        let queue = resolve_descriptor("aws", "sqs", "queue").expect("sqs queue should exist");
        assert_eq!(queue.enum_spec.operation, "ListQueues");
        assert_eq!(queue.filter_name.as_deref(), Some("QueueNamePrefix"));
        assert!(queue.hooks.transform.is_some());
    }

    #[test]
    fn test_kms_key_attr_specs() {
        let key = resolve_descriptor("aws", "kms", "key").unwrap();
        let names: Vec<_> = key.attr_specs.iter().map(|a| a.key.as_str()).collect();
        assert!(names.contains(&"Policy"));
        assert_eq!(key.tag_key, "TagKey");
    }

    #[test]
    fn test_queries() {
        let registry = Registry::builtin();
        assert_eq!(registry.all_providers(), vec!["aws"]);
        let services = registry.all_services("aws");
        assert!(services.contains(&"dynamodb".to_string()));
        assert!(services.contains(&"logs".to_string()));
        assert_eq!(registry.all_types("aws", "dynamodb"), vec!["table"]);
        assert!(registry.all_types("aws", "nope").is_empty());
        assert!(registry.resolve_descriptor("aws", "dynamodb", "index").is_none());
    }

    #[test]
    fn test_region_choices() {
        let registry = Registry::builtin();
        assert_eq!(registry.regions_for("aws", "organizations"), vec![""]);
        assert!(registry.regions_for("aws", "dynamodb").contains(&"us-east-1".to_string()));
    }

    #[test]
    fn test_from_json_and_bad_keys() {
        let registry = Registry::from_json(
            r#"{
                "regions": ["region-1", "region-2"],
                "services": {"loc.svc-x": {"regions": ["region-1"]}},
                "resources": {"loc.svc-x.widget": {"enum_spec": {"operation": "ListWidgets"}}}
            }"#,
        )
        .unwrap();
        assert_eq!(registry.regions_for("loc", "svc-x"), vec!["region-1"]);
        assert_eq!(registry.regions_for("loc", "svc-y"), vec!["region-1", "region-2"]);
        assert_eq!(registry.all_types("loc", "svc-x"), vec!["widget"]);

        let bad_key = r#"{"resources": {"noservice": {"enum_spec": {"operation": "X"}}}}"#;
        assert!(Registry::from_json(bad_key).is_err());
        assert!(Registry::from_json(r#"{"services": {"flat": {}}}"#).is_err());
    }
}
