//! Resource locators
//!
//! A locator is a glob-style address of six colon-separated segments:
//!
//! ```text
//! scheme:provider:service:region:account:type[/id]   (or type:id)
//! ```
//!
//! Missing segments are wildcards, so `arn:aws:sqs` addresses every queue
//! (and every other sqs resource type) in every region and account. A
//! trailing `|path` attaches a field path evaluated against each match.
//!
//! The first `|` always starts the field path, so regex alternation cannot
//! appear in a segment: `widget|gadget` is type `widget` with field path
//! `gadget`. Use a character class or a looser pattern instead.
//!
//! # Module Structure
//!
//! - [`component`] - the six components, their choice sets and the cascade
//! - [`scan`] - the [`Scanner`] that turns a locator into a resource stream

pub mod component;
pub mod scan;

pub use component::{Catalog, Component};
pub use scan::{Scan, ScanOptions, Scanner};

use crate::fieldpath::{FieldPath, FieldPathError};
use std::fmt;
use std::str::FromStr;

const WILDCARD: &str = "*";

/// A parsed locator. Parsing never fails on segment count; only a broken
/// `|path` expression is rejected. Everything after the first `|` is the
/// field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    segments: [String; 5],
    resource_type: String,
    resource_id: Option<String>,
    post_filter: Option<FieldPath>,
}

impl Locator {
    pub fn parse(input: &str) -> Result<Self, FieldPathError> {
        let raw = input.trim().to_string();

        let (address, post_filter) = match raw.split_once('|') {
            Some((address, expr)) => (address.trim(), Some(FieldPath::parse(expr)?)),
            None => (raw.as_str(), None),
        };

        let mut parts = address.splitn(6, ':').map(|s| s.trim().to_string());
        let mut next = || {
            parts
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| WILDCARD.to_string())
        };
        let segments = [next(), next(), next(), next(), next()];
        let resource = next();

        let (resource_type, resource_id) = match resource.find(['/', ':']) {
            Some(pos) => (resource[..pos].to_string(), Some(resource[pos + 1..].to_string())),
            None => (resource, None),
        };
        let resource_type = if resource_type.is_empty() {
            WILDCARD.to_string()
        } else {
            resource_type
        };
        let resource_id = resource_id.filter(|id| !id.is_empty() && id != WILDCARD);

        Ok(Self {
            raw,
            segments,
            resource_type,
            resource_id,
            post_filter,
        })
    }

    /// The pattern for one component; for [`Component::Resource`] this is the
    /// type part only
    pub fn pattern(&self, component: Component) -> &str {
        match component {
            Component::Resource => &self.resource_type,
            other => &self.segments[other.index()],
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The literal id, if the locator selects one
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn post_filter(&self) -> Option<&FieldPath> {
        self.post_filter.as_ref()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for Locator {
    type Err = FieldPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[test]
    fn test_full_locator() {
        let l = parse("arn:aws:sqs:us-east-1:123456789012:queue/jobs");
        assert_eq!(l.pattern(Component::Scheme), "arn");
        assert_eq!(l.pattern(Component::Provider), "aws");
        assert_eq!(l.pattern(Component::Service), "sqs");
        assert_eq!(l.pattern(Component::Region), "us-east-1");
        assert_eq!(l.pattern(Component::Account), "123456789012");
        assert_eq!(l.pattern(Component::Resource), "queue");
        assert_eq!(l.resource_id(), Some("jobs"));
        assert!(l.post_filter().is_none());
    }

    #[test]
    fn test_short_locator_pads_with_wildcards() {
        let l = parse("arn:aws:dynamodb");
        assert_eq!(l.pattern(Component::Region), "*");
        assert_eq!(l.pattern(Component::Account), "*");
        assert_eq!(l.pattern(Component::Resource), "*");
        assert_eq!(l.resource_id(), None);

        let empty = parse("");
        for c in Component::ALL {
            assert_eq!(empty.pattern(c), "*");
        }
    }

    #[test]
    fn test_empty_segments_are_wildcards() {
        let l = parse("arn:aws:organizations::123:account/*");
        assert_eq!(l.pattern(Component::Region), "*");
        assert_eq!(l.resource_id(), None);
    }

    #[test]
    fn test_colon_separated_id() {
        let l = parse("arn:aws:logs:us-east-1:123:log-group:/app/web");
        assert_eq!(l.resource_type(), "log-group");
        assert_eq!(l.resource_id(), Some("/app/web"));
    }

    #[test]
    fn test_earliest_separator_wins() {
        let l = parse("arn:aws:s3:::bucket/key:with:colons");
        assert_eq!(l.resource_type(), "bucket");
        assert_eq!(l.resource_id(), Some("key:with:colons"));

        let l = parse("arn:aws:x:r:a:type:id/with/slashes");
        assert_eq!(l.resource_type(), "type");
        assert_eq!(l.resource_id(), Some("id/with/slashes"));
    }

    #[test]
    fn test_post_filter() {
        let l = parse("arn:aws:dynamodb:*:*:table/*|Table.ItemCount");
        assert_eq!(l.resource_type(), "table");
        assert_eq!(l.post_filter().map(|p| p.as_str()), Some("Table.ItemCount"));
        assert!(Locator::parse("arn:aws|a..b").is_err());
    }

    #[test]
    fn test_first_pipe_starts_post_filter() {
        let l = parse("arn:aws:svc:*:*:widget|gadget");
        assert_eq!(l.resource_type(), "widget");
        assert_eq!(l.post_filter().map(|p| p.as_str()), Some("gadget"));

        let l = parse("arn:aws:svc:*:*:[wg]*get");
        assert_eq!(l.resource_type(), "[wg]*get");
        assert!(l.post_filter().is_none());
    }

    #[test]
    fn test_display_round_trip() {
        let raw = "arn:aws:sqs:*:*:queue/jobs";
        assert_eq!(parse(raw).to_string(), raw);
        assert_eq!(raw.parse::<Locator>().unwrap(), parse(raw));
    }
}
