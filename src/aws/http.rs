//! HTTP transports
//!
//! [`SignedEndpoint`] resolves a service's endpoint and signs requests with
//! SigV4; every protocol transport sends through it. This module also holds
//! the AWS JSON protocol transport, where every operation is a signed
//! `POST /` with the operation named in the `X-Amz-Target` header and the
//! parameters as a JSON body. The query and REST protocols live in
//! [`super::query`] and [`super::rest`].

use super::auth::{authorization, Credentials, SigningInput, SigningScope};
use super::client::{ApiRequest, Transport};
use super::query::QueryProtocolTransport;
use super::rest::RestTransport;
use crate::error::ApiError;
use crate::resource::{Protocol, ServiceDef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Maximum length of response body to log
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Region used to sign requests for global services
pub const GLOBAL_SIGNING_REGION: &str = "us-east-1";

/// Truncate a response body and drop non-printable characters before logging
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Build the transport a service's protocol needs
pub fn transport_for(
    client: Client,
    service_def: &ServiceDef,
    service: &str,
    region: &str,
    endpoint_override: Option<&str>,
    credentials: Credentials,
) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match service_def.protocol {
        Protocol::Json => Arc::new(JsonProtocolTransport::new(
            client,
            service_def,
            service,
            region,
            endpoint_override,
            credentials,
        )?),
        Protocol::Query | Protocol::Ec2 => Arc::new(QueryProtocolTransport::new(
            client,
            service_def,
            service,
            region,
            endpoint_override,
            credentials,
        )?),
        Protocol::RestXml | Protocol::RestJson => Arc::new(RestTransport::new(
            client,
            service_def,
            service,
            region,
            endpoint_override,
            credentials,
        )?),
    };
    Ok(transport)
}

/// A response as it came off the wire
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    /// `x-amzn-ErrorType` header
    pub error_type: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One request to send through a [`SignedEndpoint`]
pub struct SignedRequest<'a> {
    pub operation: &'a str,
    pub method: Method,
    /// Already percent-encoded
    pub path: &'a str,
    /// Already canonical, see [`super::auth::canonical_query`]
    pub query: &'a str,
    /// Path as it enters the signature, when it differs from `path`
    pub canonical_path: Option<&'a str>,
    /// Protocol headers; `host`, date, token and signature are added
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

/// Endpoint and signing identity of one (service, region)
pub struct SignedEndpoint {
    client: Client,
    url: Url,
    signing_region: String,
    signing_name: String,
    credentials: Credentials,
}

impl SignedEndpoint {
    /// Resolve the endpoint. `endpoint_override` replaces the regional
    /// endpoint, which is `https://{prefix}.{region}.amazonaws.com/` otherwise;
    /// global services may name a single host instead.
    pub fn new(
        client: Client,
        service_def: &ServiceDef,
        service: &str,
        region: &str,
        endpoint_override: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self> {
        let signing_region = if region.is_empty() || service_def.global {
            GLOBAL_SIGNING_REGION.to_string()
        } else {
            region.to_string()
        };
        let endpoint_prefix = service_def.endpoint_prefix.as_deref().unwrap_or(service);

        let default_url = match (&service_def.global_endpoint, service_def.global) {
            (Some(host), true) => format!("https://{}/", host),
            _ => format!("https://{}.{}.amazonaws.com/", endpoint_prefix, signing_region),
        };
        let url = Url::parse(endpoint_override.unwrap_or(&default_url))
            .with_context(|| format!("invalid endpoint for service '{}'", service))?;

        Ok(Self {
            client,
            url,
            signing_region,
            signing_name: service_def
                .signing_name
                .clone()
                .unwrap_or_else(|| endpoint_prefix.to_string()),
            credentials,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn signing_region(&self) -> &str {
        &self.signing_region
    }

    pub fn signing_name(&self) -> &str {
        &self.signing_name
    }

    /// Endpoint path joined with an operation path
    pub fn join_path(&self, path: &str) -> String {
        let base = self.url.path().trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Headers for one request, `authorization` last
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        query: &str,
        mut headers: Vec<(String, String)>,
        payload: &[u8],
    ) -> Vec<(String, String)> {
        let scope = SigningScope {
            region: &self.signing_region,
            service: &self.signing_name,
            time: chrono::Utc::now(),
        };

        headers.push(("host".to_string(), self.host_header()));
        headers.push(("x-amz-date".to_string(), scope.amz_date()));
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let input = SigningInput {
            method,
            path,
            query,
            headers: &headers,
            payload,
        };
        let auth = authorization(&input, &self.credentials, &scope);
        headers.push(("authorization".to_string(), auth));
        headers
    }

    /// Sign and send one request; only transport failures are errors here
    pub async fn send(&self, request: SignedRequest<'_>) -> Result<RawResponse, ApiError> {
        let operation = request.operation;
        let mut url = self.url.clone();
        url.set_path(request.path);
        url.set_query(Some(request.query).filter(|q| !q.is_empty()));
        tracing::debug!("{} {} {}", request.method, url, operation);

        let headers = self.sign(
            request.method.as_str(),
            request.canonical_path.unwrap_or(request.path),
            request.query,
            request.headers,
            &request.payload,
        );

        let mut builder = self.client.request(request.method, url);
        for (name, value) in headers {
            if name != "host" {
                builder = builder.header(name, value);
            }
        }
        if !request.payload.is_empty() {
            builder = builder.body(request.payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::transport(operation, format!("failed to send request: {}", e)))?;

        let status = response.status().as_u16();
        let error_type = response
            .headers()
            .get("x-amzn-errortype")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .text()
            .await
            .map_err(|e| {
                ApiError::transport(operation, format!("failed to read response body: {}", e))
            })?;

        if !(200..300).contains(&status) {
            tracing::error!("API error: {} {} - {}", operation, status, sanitize_for_log(&body));
        }
        Ok(RawResponse {
            status,
            error_type,
            body,
        })
    }
}

/// Parse a JSON response body; an empty body is an empty object
pub(crate) fn parse_json_body(operation: &str, body: &str) -> Result<Value, ApiError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(body)
        .map_err(|e| {
            ApiError::transport(operation, format!("failed to parse response JSON: {}", e))
        })
}

/// Transport for one (service, region) JSON protocol endpoint
pub struct JsonProtocolTransport {
    endpoint: SignedEndpoint,
    target_prefix: String,
    content_type: String,
}

impl JsonProtocolTransport {
    pub fn new(
        client: Client,
        service_def: &ServiceDef,
        service: &str,
        region: &str,
        endpoint_override: Option<&str>,
        credentials: Credentials,
    ) -> Result<Self> {
        let target_prefix = service_def
            .target_prefix
            .clone()
            .with_context(|| format!("service '{}' has no JSON target prefix", service))?;

        Ok(Self {
            endpoint: SignedEndpoint::new(
                client,
                service_def,
                service,
                region,
                endpoint_override,
                credentials,
            )?,
            target_prefix,
            content_type: format!("application/x-amz-json-{}", service_def.json_version),
        })
    }

    pub fn endpoint(&self) -> &Url {
        self.endpoint.url()
    }

    fn protocol_headers(&self, operation: &str) -> Vec<(String, String)> {
        vec![
            ("content-type".to_string(), self.content_type.clone()),
            (
                "x-amz-target".to_string(),
                format!("{}.{}", self.target_prefix, operation),
            ),
        ]
    }
}

#[async_trait]
impl Transport for JsonProtocolTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let operation = request.operation.as_str();

        let payload = serde_json::to_vec(&request.params)
            .map_err(|e| {
                ApiError::transport(operation, format!("cannot encode parameters: {}", e))
            })?;

        let path = self.endpoint.url().path().to_string();
        let response = self
            .endpoint
            .send(SignedRequest {
                operation,
                method: Method::POST,
                path: &path,
                query: "",
                canonical_path: None,
                headers: self.protocol_headers(operation),
                payload,
            })
            .await?;

        if !response.is_success() {
            return Err(ApiError::from_response(
                operation,
                response.status,
                response.error_type.as_deref(),
                &response.body,
            ));
        }
        parse_json_body(operation, &response.body)
    }
}
