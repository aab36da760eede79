//! REST protocol transport
//!
//! S3, Route 53 (XML) and Lambda (JSON) address every operation by an HTTP
//! method and path. The service definition routes each operation; a
//! `{Param}` placeholder takes the parameter from the request (`{Param+}`
//! keeps slashes), and every other parameter goes to the query string.

use super::auth::{canonical_query, payload_hash, uri_encode, Credentials};
use super::client::{ApiRequest, Transport};
use super::http::{parse_json_body, SignedEndpoint, SignedRequest};
use super::xml;
use crate::error::ApiError;
use crate::fieldpath::scalar_to_string;
use crate::resource::{Protocol, Route, ServiceDef};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Method, path and query of one routed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedCall {
    pub method: String,
    /// Percent-encoded path relative to the endpoint
    pub path: String,
    /// Canonical query string
    pub query: String,
}

/// Expand a route with request parameters
pub fn route_call(operation: &str, route: &Route, params: &Value) -> Result<RoutedCall, ApiError> {
    let mut params: Map<String, Value> = match params {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    let (template, fixed_query) = match route.uri.split_once('?') {
        Some((path, query)) => (path, query),
        None => (route.uri.as_str(), ""),
    };

    let mut path = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let close = rest[open..]
            .find('}')
            .map(|n| open + n)
            .ok_or_else(|| ApiError::transport(operation, format!("bad route '{}'", route.uri)))?;
        path.push_str(&rest[..open]);

        let placeholder = &rest[open + 1..close];
        let (name, greedy) = match placeholder.strip_suffix('+') {
            Some(name) => (name, true),
            None => (placeholder, false),
        };
        let value = params
            .remove(name)
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| {
                ApiError::transport(operation, format!("missing path parameter '{}'", name))
            })?;
        path.push_str(&uri_encode(&value, !greedy));
        rest = &rest[close + 1..];
    }
    path.push_str(rest);

    let mut pairs: Vec<(String, String)> = fixed_query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect();
    for (name, value) in &params {
        match value {
            Value::Array(items) => {
                let values = items.iter().filter_map(scalar_to_string);
                pairs.extend(values.map(|v| (name.clone(), v)));
            },
            other => pairs.extend(scalar_to_string(other).map(|v| (name.clone(), v))),
        }
    }

    Ok(RoutedCall {
        method: route.method.to_ascii_uppercase(),
        path,
        query: canonical_query(&pairs),
    })
}

/// Transport for one (service, region) REST endpoint
pub struct RestTransport {
    endpoint: SignedEndpoint,
    protocol: Protocol,
    routes: HashMap<String, Route>,
    list_items: Vec<String>,
    /// S3 signs the path as sent; every other service encodes it again
    double_encode: bool,
}

impl RestTransport {
    pub fn new(
        client: Client,
        service_def: &ServiceDef,
        service: &str,
        region: &str,
        endpoint_override: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self> {
        let endpoint = SignedEndpoint::new(
            client,
            service_def,
            service,
            region,
            endpoint_override,
            credentials,
        )?;
        let double_encode = endpoint.signing_name() != "s3";
        Ok(Self {
            endpoint,
            protocol: service_def.protocol,
            routes: service_def.routes.clone(),
            list_items: service_def.list_items.clone(),
            double_encode,
        })
    }
}

#[async_trait]
impl Transport for RestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let operation = request.operation.as_str();
        let route = self
            .routes
            .get(operation)
            .ok_or_else(|| ApiError::transport(operation, "no route for operation"))?;
        let call = route_call(operation, route, &request.params)?;
        let method = Method::from_bytes(call.method.as_bytes())
            .map_err(|_| ApiError::transport(operation, format!("bad method '{}'", call.method)))?;

        let path = self.endpoint.join_path(&call.path);
        let canonical_path = self.double_encode.then(|| uri_encode(&path, false));
        let response = self
            .endpoint
            .send(SignedRequest {
                operation,
                method,
                path: &path,
                query: &call.query,
                canonical_path: canonical_path.as_deref(),
                headers: vec![("x-amz-content-sha256".to_string(), payload_hash(b""))],
                payload: Vec::new(),
            })
            .await?;

        match self.protocol {
            Protocol::RestJson if !response.is_success() => Err(ApiError::from_response(
                operation,
                response.status,
                response.error_type.as_deref(),
                &response.body,
            )),
            Protocol::RestJson => parse_json_body(operation, &response.body),
            _ if !response.is_success() => Err(ApiError::from_xml_response(
                operation,
                response.status,
                &response.body,
            )),
            _ if response.body.trim().is_empty() => Ok(Value::Object(Map::new())),
            _ => xml::decode(&response.body, self.protocol, &self.list_items).map_err(|e| {
                ApiError::transport(operation, format!("failed to parse response: {}", e))
            }),
        }
    }
}
