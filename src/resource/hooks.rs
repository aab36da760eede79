//! Named hooks
//!
//! Descriptors stay plain data; where a resource type needs code (reshaping
//! a raw record, matching ids, building an ARN) the descriptor names a hook
//! and the name is resolved here once, when the registry loads.

use super::descriptor::ResourceDescriptor;
use anyhow::{bail, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// Reshape a raw listing record; `None` drops it
pub type RecordTransform = fn(Value) -> Option<Value>;

/// Does a record belong to a literal resource id
pub type IdPredicate = fn(&ResourceDescriptor, &str, &Value) -> bool;

/// Build an ARN from its parts
pub type ArnBuilder = fn(&ArnParts<'_>) -> String;

/// Inputs for ARN construction
#[derive(Debug, Clone, Copy)]
pub struct ArnParts<'a> {
    pub scheme: &'a str,
    pub provider: &'a str,
    pub service: &'a str,
    pub region: &'a str,
    pub account: &'a str,
    pub resource_type: &'a str,
    pub id: &'a str,
}

impl ArnParts<'_> {
    /// `scheme:provider:service:region:account:type/id`
    pub fn default_arn(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}:{}/{}",
            self.scheme,
            self.provider,
            self.service,
            self.region,
            self.account,
            self.resource_type,
            self.id
        )
    }

    fn prefix(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.scheme, self.provider, self.service, self.region, self.account
        )
    }
}

/// Hook names as written in descriptor JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookNames {
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub arn: Option<String>,
}

/// Resolved hooks
#[derive(Clone, Copy, Default)]
pub struct Hooks {
    pub transform: Option<RecordTransform>,
    pub filter: Option<IdPredicate>,
    pub arn: Option<ArnBuilder>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("transform", &self.transform.is_some())
            .field("filter", &self.filter.is_some())
            .field("arn", &self.arn.is_some())
            .finish()
    }
}

impl HookNames {
    pub fn resolve(&self) -> Result<Hooks> {
        Ok(Hooks {
            transform: self.transform.as_deref().map(transform_by_name).transpose()?,
            filter: self.filter.as_deref().map(filter_by_name).transpose()?,
            arn: self.arn.as_deref().map(arn_by_name).transpose()?,
        })
    }
}

fn transform_by_name(name: &str) -> Result<RecordTransform> {
    let hook: RecordTransform = match name {
        "sqs_queue_url" => sqs_queue_url,
        "ecs_cluster_arn" => ecs_cluster_arn,
        "sns_topic_arn" => sns_topic_arn,
        "route53_zone_id" => route53_zone_id,
        other => bail!("unknown transform hook '{}'", other),
    };
    Ok(hook)
}

fn filter_by_name(name: &str) -> Result<IdPredicate> {
    let hook: IdPredicate = match name {
        "id_or_arn" => id_or_arn,
        "name_prefix" => name_prefix,
        other => bail!("unknown filter hook '{}'", other),
    };
    Ok(hook)
}

fn arn_by_name(name: &str) -> Result<ArnBuilder> {
    let hook: ArnBuilder = match name {
        "bare_id" => bare_id,
        "colon_type" => colon_type,
        other => bail!("unknown arn hook '{}'", other),
    };
    Ok(hook)
}

/// Last non-empty `/`-separated segment
fn last_segment(s: &str) -> &str {
    s.trim_end_matches('/').rsplit('/').next().unwrap_or(s)
}

/// Queue URL string -> `{QueueUrl, QueueName}`
fn sqs_queue_url(record: Value) -> Option<Value> {
    match record {
        Value::String(url) => {
            let name = last_segment(&url).to_string();
            Some(json!({"QueueUrl": url, "QueueName": name}))
        },
        Value::Null => None,
        other => Some(other),
    }
}

/// Cluster ARN string -> `{clusterArn, clusterName}`
fn ecs_cluster_arn(record: Value) -> Option<Value> {
    match record {
        Value::String(arn) => {
            let name = last_segment(&arn).to_string();
            Some(json!({"clusterArn": arn, "clusterName": name}))
        },
        Value::Null => None,
        other => Some(other),
    }
}

/// `{TopicArn}` -> `{TopicArn, TopicName}`
fn sns_topic_arn(record: Value) -> Option<Value> {
    match record {
        Value::Object(mut map) => {
            let name = map
                .get("TopicArn")
                .and_then(Value::as_str)
                .and_then(|arn| arn.rsplit(':').next())
                .map(str::to_string);
            if let Some(name) = name {
                map.insert("TopicName".to_string(), Value::String(name));
            }
            Some(Value::Object(map))
        },
        Value::String(arn) => {
            let name = arn.rsplit(':').next().unwrap_or_default().to_string();
            Some(json!({"TopicArn": arn, "TopicName": name}))
        },
        Value::Null => None,
        other => Some(other),
    }
}

/// Hosted zone ids are reported as `/hostedzone/Z123`
fn route53_zone_id(record: Value) -> Option<Value> {
    match record {
        Value::Object(mut map) => {
            let id = map
                .get("Id")
                .and_then(Value::as_str)
                .map(|id| id.trim_start_matches("/hostedzone/").to_string());
            if let Some(id) = id {
                map.insert("Id".to_string(), Value::String(id));
            }
            Some(Value::Object(map))
        },
        Value::Null => None,
        other => Some(other),
    }
}

/// Match on id, or on the service-reported ARN
fn id_or_arn(descriptor: &ResourceDescriptor, resource_id: &str, record: &Value) -> bool {
    if descriptor.id_of(record).as_deref() == Some(resource_id) {
        return true;
    }
    descriptor
        .arn_field
        .as_ref()
        .and_then(|p| p.search_str(record))
        .is_some_and(|arn| arn == resource_id)
}

/// Match ids starting with the literal
fn name_prefix(descriptor: &ResourceDescriptor, resource_id: &str, record: &Value) -> bool {
    descriptor
        .id_of(record)
        .is_some_and(|id| id.starts_with(resource_id))
}

/// `scheme:provider:service:region:account:id`
fn bare_id(parts: &ArnParts<'_>) -> String {
    format!("{}:{}", parts.prefix(), parts.id)
}

/// `scheme:provider:service:region:account:type:id`
fn colon_type(parts: &ArnParts<'_>) -> String {
    format!("{}:{}:{}", parts.prefix(), parts.resource_type, parts.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts<'a>(id: &'a str) -> ArnParts<'a> {
        ArnParts {
            scheme: "arn",
            provider: "aws",
            service: "logs",
            region: "us-east-1",
            account: "123456789012",
            resource_type: "log-group",
            id,
        }
    }

    #[test]
    fn test_arn_builders() {
        assert_eq!(
            parts("/app/web").default_arn(),
            "arn:aws:logs:us-east-1:123456789012:log-group//app/web"
        );
        assert_eq!(
            colon_type(&parts("/app/web")),
            "arn:aws:logs:us-east-1:123456789012:log-group:/app/web"
        );
        assert_eq!(bare_id(&parts("jobs")), "arn:aws:logs:us-east-1:123456789012:jobs");
    }

    #[test]
    fn test_sqs_queue_url() {
        let url = "https://sqs.us-east-1.amazonaws.com/123456789012/jobs";
        let record = sqs_queue_url(json!(url)).unwrap();
        assert_eq!(record["QueueName"], "jobs");
        assert_eq!(record["QueueUrl"], "https://sqs.us-east-1.amazonaws.com/123456789012/jobs");
        assert_eq!(sqs_queue_url(Value::Null), None);
    }

    #[test]
    fn test_ecs_cluster_arn() {
        let arn = "arn:aws:ecs:us-east-1:123456789012:cluster/web";
        let record = ecs_cluster_arn(json!(arn)).unwrap();
        assert_eq!(record["clusterName"], "web");
    }

    #[test]
    fn test_sns_topic_arn() {
        let arn = "arn:aws:sns:us-east-1:123456789012:alerts";
        let record = sns_topic_arn(json!({ "TopicArn": arn })).unwrap();
        assert_eq!(record["TopicName"], "alerts");
        assert_eq!(record["TopicArn"], "arn:aws:sns:us-east-1:123456789012:alerts");

        let record = sns_topic_arn(json!("arn:aws:sns:us-east-1:123456789012:jobs")).unwrap();
        assert_eq!(record["TopicName"], "jobs");
        assert_eq!(sns_topic_arn(Value::Null), None);
    }

    #[test]
    fn test_route53_zone_id() {
        let zone = json!({"Id": "/hostedzone/Z1D633PJN98FT9", "Name": "example.com."});
        let record = route53_zone_id(zone).unwrap();
        assert_eq!(record["Id"], "Z1D633PJN98FT9");
        assert_eq!(record["Name"], "example.com.");

        let record = route53_zone_id(json!({"Id": "Z2"})).unwrap();
        assert_eq!(record["Id"], "Z2");
    }

    #[test]
    fn test_resolve_names() {
        let names = HookNames {
            transform: Some("sqs_queue_url".to_string()),
            filter: Some("name_prefix".to_string()),
            arn: Some("bare_id".to_string()),
        };
        let hooks = names.resolve().unwrap();
        assert!(hooks.transform.is_some());
        assert!(hooks.filter.is_some());
        assert!(hooks.arn.is_some());

        let bad = HookNames {
            filter: Some("missing".to_string()),
            ..HookNames::default()
        };
        assert!(bad.resolve().is_err());
    }

    #[test]
    fn test_id_predicates() {
        let d = ResourceDescriptor::from_value(
            "aws",
            "kms",
            "key",
            json!({
                "enum_spec": {"operation": "ListKeys", "path": "Keys"},
                "id": "KeyId",
                "arn_field": "KeyArn",
                "hooks": {"filter": "id_or_arn"}
            }),
        )
        .unwrap();
        let record = json!({"KeyId": "k-1", "KeyArn": "arn:aws:kms:us-east-1:1:key/k-1"});

        assert!(id_or_arn(&d, "k-1", &record));
        assert!(id_or_arn(&d, "arn:aws:kms:us-east-1:1:key/k-1", &record));
        assert!(!id_or_arn(&d, "k-2", &record));

        assert!(name_prefix(&d, "k-", &record));
        assert!(!name_prefix(&d, "x", &record));
    }
}
