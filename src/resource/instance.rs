//! Resource instances
//!
//! A [`ResourceInstance`] is one enumerated record plus everything needed to
//! derive more from it later. Identity fields are computed once; tags and
//! metrics cost a backend call and are fetched on first access only.

use super::descriptor::{ParamSource, ResourceDescriptor};
use super::hooks::ArnParts;
use super::metrics::{self, MetricData, MetricQuery, MONITORING_SERVICE};
use super::tags::{normalize_tags, TagMap};
use crate::aws::{BackendClient, ClientCache, ClientKey};
use crate::error::{ApiError, ScanError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;

/// Where a resource was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    pub provider: String,
    pub service: String,
    pub region: String,
    pub account: String,
    pub resource_type: String,
    /// Region as written in the ARN (empty for services that omit it)
    pub arn_region: String,
    /// Account as written in the ARN (empty for services that omit it)
    pub arn_account: String,
}

impl Origin {
    pub(crate) fn arn_parts<'a>(&'a self, id: &'a str) -> ArnParts<'a> {
        ArnParts {
            scheme: &self.scheme,
            provider: &self.provider,
            service: &self.service,
            region: &self.arn_region,
            account: &self.arn_account,
            resource_type: &self.resource_type,
            id,
        }
    }
}

/// ARN for a record: the service-reported one when the descriptor names a
/// field for it, else the descriptor's ARN hook, else the default layout
pub(crate) fn build_arn(
    descriptor: &ResourceDescriptor,
    origin: &Origin,
    id: &str,
    data: &Value,
) -> String {
    if let Some(arn) = descriptor.arn_field.as_ref().and_then(|p| p.search_str(data)) {
        return arn;
    }
    let parts = origin.arn_parts(id);
    match descriptor.hooks.arn {
        Some(builder) => builder(&parts),
        None => parts.default_arn(),
    }
}

/// Value of a fetch parameter; `None` when the record lacks the source field
pub(crate) fn param_value(
    source: &ParamSource,
    id: &str,
    arn: &str,
    data: &Value,
) -> Option<Value> {
    match source {
        ParamSource::Id => Some(Value::String(id.to_string())),
        ParamSource::Arn => Some(Value::String(arn.to_string())),
        ParamSource::Field(path) => path.search(data),
    }
}

/// One live resource
pub struct ResourceInstance {
    descriptor: Arc<ResourceDescriptor>,
    client: Arc<BackendClient>,
    clients: Arc<ClientCache>,
    origin: Arc<Origin>,
    id: String,
    data: Value,
    filtered_data: Option<Value>,
    arn: OnceLock<String>,
    name: OnceLock<Option<String>>,
    date: OnceLock<Option<String>>,
    tags: OnceCell<TagMap>,
    metrics: OnceCell<Vec<Value>>,
}

impl fmt::Debug for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceInstance")
            .field("type", &self.descriptor.key())
            .field("id", &self.id)
            .field("region", &self.origin.region)
            .field("account", &self.origin.account)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ResourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arn())
    }
}

impl ResourceInstance {
    pub(crate) fn new(
        descriptor: Arc<ResourceDescriptor>,
        client: Arc<BackendClient>,
        clients: Arc<ClientCache>,
        origin: Arc<Origin>,
        id: String,
        data: Value,
        filtered_data: Option<Value>,
    ) -> Self {
        Self {
            descriptor,
            client,
            clients,
            origin,
            id,
            data,
            filtered_data,
            arn: OnceLock::new(),
            name: OnceLock::new(),
            date: OnceLock::new(),
            tags: OnceCell::new(),
            metrics: OnceCell::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw record, with detail and attribute results merged in
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Result of the locator's `|path` expression, if it had one and it matched
    pub fn filtered_data(&self) -> Option<&Value> {
        self.filtered_data.as_ref()
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn client(&self) -> &BackendClient {
        &self.client
    }

    pub fn scheme(&self) -> &str {
        &self.origin.scheme
    }

    pub fn provider(&self) -> &str {
        &self.origin.provider
    }

    pub fn service(&self) -> &str {
        &self.origin.service
    }

    pub fn region(&self) -> &str {
        &self.origin.region
    }

    pub fn account(&self) -> &str {
        &self.origin.account
    }

    pub fn resource_type(&self) -> &str {
        &self.origin.resource_type
    }

    pub fn arn(&self) -> &str {
        self.arn
            .get_or_init(|| build_arn(&self.descriptor, &self.origin, &self.id, &self.data))
    }

    pub fn name(&self) -> Option<&str> {
        self.name
            .get_or_init(|| self.descriptor.name.as_ref().and_then(|p| p.search_str(&self.data)))
            .as_deref()
    }

    /// Creation timestamp as reported by the service
    pub fn date(&self) -> Option<&str> {
        self.date
            .get_or_init(|| self.descriptor.date.as_ref().and_then(|p| p.search_str(&self.data)))
            .as_deref()
    }

    /// Creation timestamp, parsed from RFC 3339 or epoch seconds
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.date()?;
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
            return Some(t.with_timezone(&Utc));
        }
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(Utc.from_utc_datetime(&t));
        }
        let secs: f64 = raw.parse().ok()?;
        // Some services report milliseconds
        let secs = if secs > 1e11 { secs / 1000.0 } else { secs };
        DateTime::from_timestamp(secs.trunc() as i64, (secs.fract() * 1e9) as u32)
    }

    /// Tags, fetched and normalized on first access
    pub async fn tags(&self) -> Result<&TagMap, ApiError> {
        self.tags.get_or_try_init(|| self.load_tags()).await
    }

    /// Tags if they were already fetched
    pub fn cached_tags(&self) -> Option<&TagMap> {
        self.tags.get()
    }

    async fn load_tags(&self) -> Result<TagMap, ApiError> {
        let d = &self.descriptor;

        let source = match &d.tags_spec {
            Some(spec) => {
                let Some(value) = param_value(&spec.source, &self.id, self.arn(), &self.data) else {
                    tracing::debug!("{}: no value for tag parameter {}", self.arn(), spec.param);
                    return Ok(TagMap::new());
                };
                match self
                    .client
                    .call(&spec.operation, spec.path.as_ref(), spec.build_params(value))
                    .await
                {
                    Ok(found) => found,
                    Err(e) if e.is_not_found() => {
                        tracing::debug!("{}: tags not found: {}", self.arn(), e);
                        Value::Null
                    },
                    Err(e) => return Err(e),
                }
            },
            None => d
                .tags_path()
                .and_then(|p| p.search(&self.data))
                .unwrap_or(Value::Null),
        };

        Ok(normalize_tags(&source, &d.tag_key, &d.tag_value))
    }

    fn monitoring_client(&self) -> Result<Arc<BackendClient>, ScanError> {
        let key = ClientKey::new(MONITORING_SERVICE, &self.origin.region, &self.origin.account);
        self.clients.get(&key).map_err(|e| ScanError::Client {
            target: key.to_string(),
            message: format!("{:#}", e),
        })
    }

    /// Metrics published for this resource; empty without a dimension
    pub async fn metrics(&self) -> Result<&[Value], ScanError> {
        let metrics = self
            .metrics
            .get_or_try_init(|| async {
                let Some(dimension) = &self.descriptor.dimension else {
                    return Ok(Vec::new());
                };
                let client = self.monitoring_client()?;
                match metrics::list_metrics(&client, dimension, &self.id).await {
                    Ok(found) => Ok(found),
                    Err(e) if e.is_not_found() => Ok(Vec::new()),
                    Err(e) => Err(ScanError::backend(client.key(), e)),
                }
            })
            .await?;
        Ok(metrics.as_slice())
    }

    pub async fn metric_names(&self) -> Result<Vec<String>, ScanError> {
        Ok(self
            .metrics()
            .await?
            .iter()
            .filter_map(|m| m.get("MetricName").and_then(|n| n.as_str()))
            .map(|n| n.to_string())
            .collect())
    }

    pub async fn find_metric(&self, metric_name: &str) -> Result<Option<&Value>, ScanError> {
        Ok(self
            .metrics()
            .await?
            .iter()
            .find(|m| m.get("MetricName").and_then(|n| n.as_str()) == Some(metric_name)))
    }

    /// Statistics for one metric; an unknown metric is an error
    pub async fn get_metric_data(&self, query: &MetricQuery) -> Result<MetricData, ScanError> {
        let metric = self
            .find_metric(&query.metric_name)
            .await?
            .ok_or_else(|| ScanError::MetricUnavailable(query.metric_name.clone()))?;

        let client = self.monitoring_client()?;
        metrics::metric_statistics(&client, metric, query)
            .await
            .map_err(|e| ScanError::backend(client.key(), e))
    }

    /// Two weeks of Average, Maximum and SampleCount
    pub async fn summary(&self, metric_name: &str) -> Result<MetricData, ScanError> {
        self.get_metric_data(&MetricQuery::summary(metric_name)).await
    }

    /// The last five minutes
    pub async fn tail(&self, metric_name: &str) -> Result<MetricData, ScanError> {
        self.get_metric_data(&MetricQuery::tail(metric_name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn origin(service: &str, arn_region: &str) -> Origin {
        Origin {
            scheme: "arn".to_string(),
            provider: "aws".to_string(),
            service: service.to_string(),
            region: "us-east-1".to_string(),
            account: "123456789012".to_string(),
            resource_type: "thing".to_string(),
            arn_region: arn_region.to_string(),
            arn_account: "123456789012".to_string(),
        }
    }

    fn descriptor(extra: Value) -> ResourceDescriptor {
        let mut def = json!({"enum_spec": {"operation": "List"}, "id": "Id"});
        if let (Value::Object(base), Value::Object(extra)) = (&mut def, extra) {
            base.extend(extra);
        }
        ResourceDescriptor::from_value("aws", "svc", "thing", def).unwrap()
    }

    #[test]
    fn test_default_arn() {
        let d = descriptor(json!({}));
        assert_eq!(
            build_arn(&d, &origin("svc", "us-east-1"), "t1", &json!({"Id": "t1"})),
            "arn:aws:svc:us-east-1:123456789012:thing/t1"
        );
    }

    #[test]
    fn test_arn_omitting_region() {
        let d = descriptor(json!({}));
        assert_eq!(
            build_arn(&d, &origin("svc", ""), "t1", &json!({})),
            "arn:aws:svc::123456789012:thing/t1"
        );
    }

    #[test]
    fn test_arn_field_wins() {
        let d = descriptor(json!({"arn_field": "Arn", "hooks": {"arn": "bare_id"}}));
        let data = json!({"Id": "t1", "Arn": "arn:aws:svc:us-east-1:1:thing/real"});
        assert_eq!(
            build_arn(&d, &origin("svc", "us-east-1"), "t1", &data),
            "arn:aws:svc:us-east-1:1:thing/real"
        );
        assert_eq!(
            build_arn(&d, &origin("svc", "us-east-1"), "t1", &json!({"Id": "t1"})),
            "arn:aws:svc:us-east-1:123456789012:t1"
        );
    }

    #[test]
    fn test_param_value_sources() {
        let data = json!({"QueueUrl": "https://q/1"});
        assert_eq!(param_value(&ParamSource::Id, "q1", "arn:x", &data), Some(json!("q1")));
        assert_eq!(param_value(&ParamSource::Arn, "q1", "arn:x", &data), Some(json!("arn:x")));
        let field = ParamSource::Field("QueueUrl".parse().unwrap());
        assert_eq!(param_value(&field, "q1", "arn:x", &data), Some(json!("https://q/1")));
        let missing = ParamSource::Field("Nope".parse().unwrap());
        assert_eq!(param_value(&missing, "q1", "arn:x", &data), None);
    }
}
