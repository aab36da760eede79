//! Resource descriptors
//!
//! A descriptor tells the enumerator how to list one resource type, how to
//! fetch more about each record, and where id, name, date, tags and ARN live
//! in the record. Descriptors are plain data read from JSON; the only code
//! they reference are named hooks (see [`super::hooks`]).

use super::hooks::{HookNames, Hooks};
use crate::fieldpath::FieldPath;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How a parameter value is passed: as-is, or wrapped in a one-element list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamShape {
    #[default]
    Scalar,
    List,
}

impl ParamShape {
    pub fn wrap(self, value: Value) -> Value {
        match self {
            ParamShape::Scalar => value,
            ParamShape::List => Value::Array(vec![value]),
        }
    }
}

/// Where a fetch parameter takes its value from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ParamSource {
    /// The resource id
    #[default]
    Id,
    /// The resource's ARN
    Arn,
    /// A field of the record
    Field(FieldPath),
}

impl<'de> Deserialize<'de> for ParamSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "id" => ParamSource::Id,
            "arn" => ParamSource::Arn,
            other => ParamSource::Field(FieldPath::parse(other).map_err(serde::de::Error::custom)?),
        })
    }
}

/// Listing operation
#[derive(Debug, Clone, Deserialize)]
pub struct EnumSpec {
    pub operation: String,
    /// Where the list of records sits in the response
    #[serde(default)]
    pub path: Option<FieldPath>,
    /// Fixed parameters sent with every call
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// A per-resource call: detail fetch, attribute fetch or tag fetch
#[derive(Debug, Clone, Deserialize)]
pub struct FetchSpec {
    pub operation: String,
    /// Parameter that carries the resource reference
    pub param: String,
    #[serde(default)]
    pub source: ParamSource,
    #[serde(default)]
    pub shape: ParamShape,
    #[serde(default)]
    pub path: Option<FieldPath>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl FetchSpec {
    /// Parameters for one call, given the resolved reference value
    pub fn build_params(&self, value: Value) -> Value {
        let mut params = self.params.clone();
        params.insert(self.param.clone(), self.shape.wrap(value));
        Value::Object(params)
    }
}

/// Attribute fetch: the result is stored in the record under `key`
#[derive(Debug, Clone, Deserialize)]
pub struct AttrSpec {
    pub key: String,
    #[serde(flatten)]
    pub fetch: FetchSpec,
}

/// Lookup of the region a record really lives in, for types whose listing
/// returns the same records in every region
#[derive(Debug, Clone, Deserialize)]
pub struct LocationSpec {
    #[serde(flatten)]
    pub fetch: FetchSpec,
    /// Region meant by an empty answer
    pub default: String,
    /// Legacy location names
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl LocationSpec {
    /// Region name for a reported location
    pub fn region_for(&self, reported: Option<&str>) -> String {
        match reported.filter(|s| !s.is_empty()) {
            None => self.default.clone(),
            Some(name) => self
                .aliases
                .get(name)
                .cloned()
                .unwrap_or_else(|| name.to_string()),
        }
    }
}

fn default_tag_key() -> String {
    "Key".to_string()
}

fn default_tag_value() -> String {
    "Value".to_string()
}

/// Everything known about one resource type
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(skip)]
    pub provider: String,
    #[serde(skip)]
    pub service: String,
    #[serde(skip)]
    pub resource_type: String,

    pub enum_spec: EnumSpec,
    #[serde(default)]
    pub detail_spec: Option<FetchSpec>,
    #[serde(default)]
    pub attr_specs: Vec<AttrSpec>,
    /// Records whose location is another region are dropped
    #[serde(default)]
    pub location_spec: Option<LocationSpec>,
    #[serde(default)]
    pub tags_spec: Option<FetchSpec>,
    /// Where inline tags sit in the record when there is no tag call
    #[serde(default)]
    pub tags_path: Option<FieldPath>,
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
    #[serde(default = "default_tag_value")]
    pub tag_value: String,

    #[serde(default)]
    pub id: Option<FieldPath>,
    #[serde(default)]
    pub name: Option<FieldPath>,
    #[serde(default)]
    pub date: Option<FieldPath>,
    /// Field holding the ARN the service itself reports
    #[serde(default)]
    pub arn_field: Option<FieldPath>,
    /// Metric dimension name; no dimension means no metrics
    #[serde(default)]
    pub dimension: Option<String>,

    /// Listing parameter that filters by id server-side
    #[serde(default)]
    pub filter_name: Option<String>,
    #[serde(default)]
    pub filter_type: ParamShape,
    /// The server-side filter matches by prefix, so results are re-checked
    #[serde(default)]
    pub filter_is_prefix: bool,

    #[serde(default, rename = "hooks")]
    pub hook_names: HookNames,
    #[serde(skip)]
    pub hooks: Hooks,
}

impl ResourceDescriptor {
    /// Parse a descriptor and attach its identity
    pub fn from_value(
        provider: &str,
        service: &str,
        resource_type: &str,
        value: Value,
    ) -> anyhow::Result<Self> {
        let descriptor: ResourceDescriptor = serde_json::from_value(value)?;
        descriptor.bind(provider, service, resource_type)
    }

    /// Attach identity and resolve hook names
    pub fn bind(
        mut self,
        provider: &str,
        service: &str,
        resource_type: &str,
    ) -> anyhow::Result<Self> {
        self.provider = provider.to_string();
        self.service = service.to_string();
        self.resource_type = resource_type.to_string();
        self.hooks = self.hook_names.resolve()?;
        Ok(self)
    }

    /// `aws.sqs.queue`
    pub fn key(&self) -> String {
        format!("{}.{}.{}", self.provider, self.service, self.resource_type)
    }

    /// The record's id, rendered as a string
    pub fn id_of(&self, record: &Value) -> Option<String> {
        self.id.as_ref().and_then(|p| p.search_str(record))
    }

    /// Path to inline tags, `Tags` unless configured
    pub fn tags_path(&self) -> Option<FieldPath> {
        self.tags_path.clone().or_else(|| FieldPath::parse("Tags").ok())
    }

    /// Server-side filter parameter for a literal id, if the type has one
    pub fn filter_params(&self, resource_id: &str) -> Option<(String, Value)> {
        let name = self.filter_name.as_ref()?;
        Some((
            name.clone(),
            self.filter_type.wrap(Value::String(resource_id.to_string())),
        ))
    }

    /// Turn a bare scalar record into an object keyed by the id field
    pub fn wrap_scalar(&self, record: Value) -> Value {
        match (&record, self.id.as_ref().and_then(|p| p.single_key())) {
            (Value::String(_) | Value::Number(_), Some(key)) => {
                let mut map = Map::new();
                map.insert(key.to_string(), record);
                Value::Object(map)
            },
            _ => record,
        }
    }

    /// Does `record` belong to the literal `resource_id`, for types that
    /// cannot filter server-side
    pub fn matches_id(&self, resource_id: &str, record: &Value) -> bool {
        match self.hooks.filter {
            Some(predicate) => predicate(self, resource_id, record),
            None => self.id_of(record).as_deref() == Some(resource_id),
        }
    }
}
