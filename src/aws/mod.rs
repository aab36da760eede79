//! AWS API interaction module
//!
//! # Module Structure
//!
//! - [`auth`] - Credential loading and Signature Version 4 signing
//! - [`client`] - Per-(service, region, account) clients, pagination, retry and the client cache
//! - [`http`] - Signed endpoints, the JSON protocol transport and protocol dispatch
//! - [`query`] - The form-encoded query protocol (IAM, RDS, SNS, ELB) and its EC2 dialect
//! - [`rest`] - Routed REST transports (S3, Route 53, Lambda)
//! - [`xml`] - Decoding XML responses into JSON values
//! - [`replay`] - Transport serving previously recorded responses
//!
//! # Example
//!
//! ```ignore
//! use arnscan::aws::client::{BackendClient, ClientKey};
//!
//! async fn example(client: &BackendClient) -> anyhow::Result<()> {
//!     let path = "TableNames".parse()?;
//!     let tables = client.call("ListTables", Some(&path), serde_json::json!({})).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
pub mod query;
pub mod replay;
pub mod rest;
pub mod xml;

pub use client::{
    ApiRequest, AwsClientFactory, BackendClient, ClientCache, ClientFactory, ClientKey,
    ClientSettings, RetryPolicy, Transport,
};
pub use http::transport_for;
pub use replay::{ReplayClientFactory, ReplayTransport};
