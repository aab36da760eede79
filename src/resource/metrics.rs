//! Monitoring metrics
//!
//! Resources with a metric dimension can list the metrics published for
//! them and fetch statistics for one metric over a time window.

use crate::aws::BackendClient;
use crate::error::ApiError;
use crate::fieldpath::FieldPath;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::cmp::Ordering;

/// Service answering metric calls
pub const MONITORING_SERVICE: &str = "cloudwatch";

/// Time span ending now (or at the query's end time)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricWindow {
    Days(u32),
    Hours(u32),
    Minutes(u32),
}

impl Default for MetricWindow {
    fn default() -> Self {
        MetricWindow::Hours(1)
    }
}

impl MetricWindow {
    pub fn duration(self) -> Duration {
        match self {
            MetricWindow::Days(n) => Duration::days(n.into()),
            MetricWindow::Hours(n) => Duration::hours(n.into()),
            MetricWindow::Minutes(n) => Duration::minutes(n.into()),
        }
    }

    /// One datapoint per minute at most, and never more than 1440 datapoints
    pub fn default_period(self) -> i64 {
        (self.duration().num_seconds() / 1440).max(60)
    }
}

/// A statistics request for one metric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub metric_name: String,
    pub window: MetricWindow,
    pub statistics: Vec<String>,
    /// Seconds per datapoint; derived from the window when unset
    pub period: Option<i64>,
    /// End of the window; now when unset
    pub end: Option<DateTime<Utc>>,
}

impl MetricQuery {
    pub fn new(metric_name: &str) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            window: MetricWindow::default(),
            statistics: vec!["Average".to_string()],
            period: None,
            end: None,
        }
    }

    pub fn window(mut self, window: MetricWindow) -> Self {
        self.window = window;
        self
    }

    pub fn statistics<I, S>(mut self, statistics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statistics = statistics.into_iter().map(Into::into).collect();
        self
    }

    pub fn period(mut self, seconds: i64) -> Self {
        self.period = Some(seconds);
        self
    }

    pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn effective_period(&self) -> i64 {
        self.period.unwrap_or_else(|| self.window.default_period())
    }

    /// 14 days of Average, Maximum and SampleCount
    pub fn summary(metric_name: &str) -> Self {
        Self::new(metric_name)
            .window(MetricWindow::Days(14))
            .statistics(["Average", "Maximum", "SampleCount"])
    }

    /// The last 5 minutes
    pub fn tail(metric_name: &str) -> Self {
        Self::new(metric_name).window(MetricWindow::Minutes(5))
    }
}

/// Result of a statistics request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricData {
    /// Sorted by timestamp
    pub datapoints: Vec<Value>,
    pub period: i64,
}

fn path(expr: &str) -> Option<FieldPath> {
    FieldPath::parse(expr).ok()
}

/// Metrics published with dimension `name = value`
pub(crate) async fn list_metrics(
    client: &BackendClient,
    name: &str,
    value: &str,
) -> Result<Vec<Value>, ApiError> {
    let params = json!({"Dimensions": [{"Name": name, "Value": value}]});
    let found = client.call("ListMetrics", path("Metrics").as_ref(), params).await?;
    Ok(match found {
        Value::Array(metrics) => metrics,
        _ => Vec::new(),
    })
}

fn timestamp_key(datapoint: &Value) -> f64 {
    match datapoint.get("Timestamp") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp() as f64)
            .unwrap_or_default(),
        _ => 0.0,
    }
}

/// Statistics for one metric as returned by [`list_metrics`]
pub(crate) async fn metric_statistics(
    client: &BackendClient,
    metric: &Value,
    query: &MetricQuery,
) -> Result<MetricData, ApiError> {
    let end = query.end.unwrap_or_else(Utc::now);
    let start = end - query.window.duration();
    let period = query.effective_period();

    let params = json!({
        "Namespace": metric.get("Namespace").cloned().unwrap_or(Value::Null),
        "MetricName": query.metric_name,
        "Dimensions": metric.get("Dimensions").cloned().unwrap_or_else(|| json!([])),
        "StartTime": start.timestamp(),
        "EndTime": end.timestamp(),
        "Period": period,
        "Statistics": query.statistics,
    });

    let found = client
        .call("GetMetricStatistics", path("Datapoints").as_ref(), params)
        .await?;
    let mut datapoints = match found {
        Value::Array(points) => points,
        _ => Vec::new(),
    };
    datapoints.sort_by(|a, b| {
        timestamp_key(a)
            .partial_cmp(&timestamp_key(b))
            .unwrap_or(Ordering::Equal)
    });

    Ok(MetricData { datapoints, period })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_period() {
        assert_eq!(MetricWindow::Hours(1).default_period(), 60);
        assert_eq!(MetricWindow::Minutes(5).default_period(), 60);
        assert_eq!(MetricWindow::Days(14).default_period(), 840);
        assert_eq!(MetricWindow::Days(1).default_period(), 60);
        assert_eq!(MetricWindow::Days(2).default_period(), 120);
    }

    #[test]
    fn test_query_builders() {
        let q = MetricQuery::new("CPUUtilization");
        assert_eq!(q.window, MetricWindow::Hours(1));
        assert_eq!(q.statistics, vec!["Average"]);
        assert_eq!(q.effective_period(), 60);

        let s = MetricQuery::summary("NumberOfMessagesSent");
        assert_eq!(s.window, MetricWindow::Days(14));
        assert_eq!(s.statistics, vec!["Average", "Maximum", "SampleCount"]);

        let t = MetricQuery::tail("X").period(300);
        assert_eq!(t.window, MetricWindow::Minutes(5));
        assert_eq!(t.effective_period(), 300);
    }

    #[test]
    fn test_timestamp_key() {
        assert_eq!(timestamp_key(&json!({"Timestamp": 1700000000})), 1_700_000_000.0);
        assert_eq!(
            timestamp_key(&json!({"Timestamp": "2023-11-14T22:13:20Z"})),
            1_700_000_000.0
        );
        assert_eq!(timestamp_key(&json!({})), 0.0);
    }
}
