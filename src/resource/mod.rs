//! Resource abstraction layer
//!
//! This module provides a data-driven approach to enumerating AWS resources.
//! Resource descriptors are loaded from JSON files at compile time, allowing
//! new resource types to be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads the service table and resource descriptors from embedded JSON
//! - [`descriptor`] - The descriptor data model
//! - [`hooks`] - Named functions descriptors can refer to
//! - [`enumerator`] - Lists, filters and completes the records of one leaf
//! - [`instance`] - The resulting [`ResourceInstance`]
//! - [`tags`] - Tag normalization
//! - [`metrics`] - Monitoring metrics of a resource
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`:
//! - `common.json` - default regions, CloudWatch alarms, log groups
//! - `compute.json` - EC2 instances, volumes, security groups, VPCs and subnets,
//!   Auto Scaling groups, Lambda functions
//! - `containers.json` - ECS clusters, ECR repositories, Step Functions state machines
//! - `database.json` - DynamoDB tables, RDS instances and clusters, ElastiCache clusters
//! - `messaging.json` - SQS queues, SNS topics, Kinesis streams, Firehose delivery streams
//! - `network.json` - classic and v2 load balancers, target groups, Route 53 hosted zones
//! - `security.json` - KMS keys, CloudTrail trails, Organizations accounts,
//!   IAM users, groups and roles
//! - `storage.json` - S3 buckets
//!
//! # Example
//!
//! ```ignore
//! use arnscan::resource::resolve_descriptor;
//!
//! let queue = resolve_descriptor("aws", "sqs", "queue").unwrap();
//! assert_eq!(queue.enum_spec.operation, "ListQueues");
//! ```

pub mod descriptor;
pub mod enumerator;
pub mod hooks;
pub mod instance;
pub mod metrics;
mod registry;
pub mod tags;

pub use descriptor::{
    AttrSpec, EnumSpec, FetchSpec, LocationSpec, ParamShape, ParamSource, ResourceDescriptor,
};
pub use enumerator::{Enumerator, Leaf, Observer};
pub use instance::ResourceInstance;
pub use metrics::{MetricData, MetricQuery, MetricWindow};
pub use registry::*;
pub use tags::{normalize_tags, TagMap, TagValue};
