//! Query protocol transport
//!
//! IAM, RDS, SNS, ELB and friends take form-encoded `Action=...&Version=...`
//! requests and answer in XML. EC2 speaks a dialect of the same protocol:
//! lists are numbered without `.member`, and responses have no result
//! wrapper. Parameters arrive as JSON and are flattened:
//!
//! ```text
//! {"UserName": "bob"}                         UserName=bob
//! {"Names": ["a", "b"]}       (query)         Names.member.1=a&Names.member.2=b
//! {"InstanceId": ["i-1"]}     (ec2)           InstanceId.1=i-1
//! {"Filter": [{"Name": "x"}]} (ec2)           Filter.1.Name=x
//! ```

use super::auth::Credentials;
use super::client::{ApiRequest, Transport};
use super::http::{SignedEndpoint, SignedRequest};
use super::xml;
use crate::error::ApiError;
use crate::resource::{Protocol, ServiceDef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use url::form_urlencoded;

const CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";

/// Flatten one parameter value into form fields
pub fn flatten_param(
    name: &str,
    value: &Value,
    protocol: Protocol,
    out: &mut Vec<(String, String)>,
) {
    match value {
        Value::Null => {},
        Value::String(s) => out.push((name.to_string(), s.clone())),
        Value::Bool(_) | Value::Number(_) => out.push((name.to_string(), value.to_string())),
        Value::Array(items) => {
            for (n, item) in items.iter().enumerate() {
                let entry = match protocol {
                    Protocol::Ec2 => format!("{}.{}", name, n + 1),
                    _ => format!("{}.member.{}", name, n + 1),
                };
                flatten_param(&entry, item, protocol, out);
            }
        },
        Value::Object(fields) => {
            for (key, field) in fields {
                flatten_param(&format!("{}.{}", name, key), field, protocol, out);
            }
        },
    }
}

/// Transport for one (service, region) query protocol endpoint
pub struct QueryProtocolTransport {
    endpoint: SignedEndpoint,
    protocol: Protocol,
    api_version: String,
    list_items: Vec<String>,
}

impl QueryProtocolTransport {
    pub fn new(
        client: Client,
        service_def: &ServiceDef,
        service: &str,
        region: &str,
        endpoint_override: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self> {
        let api_version = service_def
            .api_version
            .clone()
            .with_context(|| format!("service '{}' has no query API version", service))?;

        Ok(Self {
            endpoint: SignedEndpoint::new(
                client,
                service_def,
                service,
                region,
                endpoint_override,
                credentials,
            )?,
            protocol: service_def.protocol,
            api_version,
            list_items: service_def.list_items.clone(),
        })
    }

    /// Form body for one call
    pub fn encode(&self, operation: &str, params: &Value) -> String {
        let mut fields = Vec::new();
        if let Value::Object(map) = params {
            for (name, value) in map {
                flatten_param(name, value, self.protocol, &mut fields);
            }
        }

        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("Action", operation);
        form.append_pair("Version", &self.api_version);
        for (name, value) in &fields {
            form.append_pair(name, value);
        }
        form.finish()
    }
}

#[async_trait]
impl Transport for QueryProtocolTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let operation = request.operation.as_str();
        let body = self.encode(operation, &request.params);

        let path = self.endpoint.url().path().to_string();
        let response = self
            .endpoint
            .send(SignedRequest {
                operation,
                method: Method::POST,
                path: &path,
                query: "",
                canonical_path: None,
                headers: vec![("content-type".to_string(), CONTENT_TYPE.to_string())],
                payload: body.into_bytes(),
            })
            .await?;

        if !response.is_success() {
            return Err(ApiError::from_xml_response(operation, response.status, &response.body));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        xml::decode(&response.body, self.protocol, &self.list_items)
            .map_err(|e| ApiError::transport(operation, format!("failed to parse response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(protocol: Protocol, version: &str) -> QueryProtocolTransport {
        let def = ServiceDef {
            protocol,
            api_version: Some(version.to_string()),
            ..ServiceDef::default()
        };
        QueryProtocolTransport::new(
            Client::new(),
            &def,
            "svc",
            "us-east-1",
            None,
            Credentials::new("AKIDEXAMPLE", "secret", None),
        )
        .unwrap()
    }

    fn flat(value: Value, protocol: Protocol) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Value::Object(map) = value {
            for (name, v) in &map {
                flatten_param(name, v, protocol, &mut out);
            }
        }
        out
    }

    #[test]
    fn test_query_lists_use_members() {
        assert_eq!(
            flat(json!({"LoadBalancerNames": ["a", "b"]}), Protocol::Query),
            vec![
                ("LoadBalancerNames.member.1".to_string(), "a".to_string()),
                ("LoadBalancerNames.member.2".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn test_ec2_lists_are_numbered() {
        assert_eq!(
            flat(json!({"InstanceId": ["i-1"], "MaxResults": 5}), Protocol::Ec2),
            vec![
                ("InstanceId.1".to_string(), "i-1".to_string()),
                ("MaxResults".to_string(), "5".to_string()),
            ]
        );
        assert_eq!(
            flat(json!({"Filter": [{"Name": "vpc-id", "Value": ["v1"]}]}), Protocol::Ec2),
            vec![
                ("Filter.1.Name".to_string(), "vpc-id".to_string()),
                ("Filter.1.Value.1".to_string(), "v1".to_string()),
            ]
        );
        assert!(flat(json!({"Marker": null}), Protocol::Ec2).is_empty());
    }

    #[test]
    fn test_encode_body() {
        let t = transport(Protocol::Query, "2010-05-08");
        assert_eq!(
            t.encode("ListUsers", &json!({"PathPrefix": "/ops/"})),
            "Action=ListUsers&Version=2010-05-08&PathPrefix=%2Fops%2F"
        );
        assert_eq!(t.encode("ListUsers", &Value::Null), "Action=ListUsers&Version=2010-05-08");
    }

    #[test]
    fn test_missing_api_version_is_an_error() {
        let def = ServiceDef {
            protocol: Protocol::Query,
            ..ServiceDef::default()
        };
        let result = QueryProtocolTransport::new(
            Client::new(),
            &def,
            "iam",
            "",
            None,
            Credentials::new("AKIDEXAMPLE", "secret", None),
        );
        assert!(result.is_err());
    }
}
