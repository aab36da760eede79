//! Property-based tests using proptest
//!
//! These tests check locator parsing, segment matching, field paths and the
//! small normalizers against randomized inputs.

use arnscan::aws::client::record_file_name;
use arnscan::aws::{ApiRequest, BackendClient, ClientKey, Transport};
use arnscan::ApiError;
use async_trait::async_trait;
use arnscan::dump::to_snake_case;
use arnscan::matcher::{complete, Matcher};
use arnscan::resource::normalize_tags;
use arnscan::{Component, FieldPath, Locator};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A locator segment without separators
fn arb_segment() -> impl Strategy<Value = String> {
    "[a-z0-9][a-z0-9-]{0,11}"
}

/// A resource type name
fn arb_type() -> impl Strategy<Value = String> {
    prop_oneof!["queue", "table", "key", "log-group", "[a-z][a-z-]{0,10}"]
}

/// A JSON object key usable in a field path
fn arb_key() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,8}"
}

/// Nest `leaf` under `keys`, outermost first
fn nest(keys: &[String], leaf: Value) -> Value {
    keys.iter().rev().fold(leaf, |inner, key| json!({ key.as_str(): inner }))
}

mod locator_tests {
    use super::*;

    proptest! {
        /// A fully spelled-out locator keeps every segment
        #[test]
        fn full_locator_round_trips(
            segments in prop::collection::vec(arb_segment(), 5),
            resource_type in arb_type(),
            id in arb_segment(),
        ) {
            let raw = format!("{}:{}/{}", segments.join(":"), resource_type, id);
            let locator = Locator::parse(&raw).unwrap();

            for (component, segment) in Component::ALL.iter().take(5).zip(&segments) {
                prop_assert_eq!(locator.pattern(*component), segment.as_str());
            }
            prop_assert_eq!(locator.resource_type(), resource_type.as_str());
            prop_assert_eq!(locator.resource_id(), Some(id.as_str()));
            prop_assert!(locator.post_filter().is_none());
        }

        /// Segments left out at the end are wildcards
        #[test]
        fn missing_segments_are_wildcards(
            segments in prop::collection::vec(arb_segment(), 6),
            given in 0usize..=6,
        ) {
            let raw = segments[..given].join(":");
            let locator = Locator::parse(&raw).unwrap();

            for (i, component) in Component::ALL.iter().enumerate() {
                let expected = if i < given { segments[i].as_str() } else { "*" };
                prop_assert_eq!(locator.pattern(*component), expected);
            }
            prop_assert_eq!(locator.resource_id(), None);
        }

        /// `type:id` and `type/id` address the same thing
        #[test]
        fn id_separators_agree(resource_type in arb_type(), id in arb_segment()) {
            let slash = format!("arn:aws:svc:r:a:{}/{}", resource_type, id);
            let colon = format!("arn:aws:svc:r:a:{}:{}", resource_type, id);
            let slash = Locator::parse(&slash).unwrap();
            let colon = Locator::parse(&colon).unwrap();
            prop_assert_eq!(slash.resource_type(), colon.resource_type());
            prop_assert_eq!(slash.resource_id(), colon.resource_id());
        }

        /// Without a post filter, parsing never fails
        #[test]
        fn parse_is_total(raw in "[^|]{0,60}") {
            prop_assert!(Locator::parse(&raw).is_ok());
        }

        /// The post filter is everything after the first `|`
        #[test]
        fn post_filter_is_split_off(keys in prop::collection::vec(arb_key(), 1..4)) {
            let expr = keys.join(".");
            let locator = Locator::parse(&format!("arn:aws:sqs:*:*:queue|{}", expr)).unwrap();
            prop_assert_eq!(locator.resource_type(), "queue");
            prop_assert_eq!(locator.post_filter().map(|p| p.as_str()), Some(expr.as_str()));
        }
    }
}

mod matcher_tests {
    use super::*;

    proptest! {
        /// `*` matches every candidate
        #[test]
        fn star_matches_everything(choices in prop::collection::vec("[ -~]{0,12}", 0..20)) {
            prop_assert_eq!(Matcher::new("*").matches(&choices), choices);
        }

        /// A literal is found anywhere in the candidate
        #[test]
        fn literal_is_unanchored(
            pattern in "[a-z0-9]{1,6}",
            before in "[a-z0-9]{0,6}",
            after in "[a-z0-9]{0,6}",
        ) {
            let candidate = format!("{}{}{}", before, pattern, after);
            prop_assert!(Matcher::new(&pattern).is_match(&candidate));
        }

        /// Matching filters without reordering
        #[test]
        fn matches_is_an_ordered_subset(
            pattern in "[a-z.*]{1,4}",
            choices in prop::collection::vec("[a-z]{1,8}", 0..20),
        ) {
            let found = Matcher::new(&pattern).matches(&choices);
            let mut rest = choices.iter();
            for item in &found {
                prop_assert!(rest.any(|c| c == item));
            }
        }

        /// Patterns that are not valid regular expressions are taken literally
        #[test]
        fn broken_regex_is_literal(stem in "[a-z]{1,6}") {
            let pattern = format!("{}(", stem);
            let matcher = Matcher::new(&pattern);
            let wrapped = format!("x{}y", pattern);
            prop_assert!(matcher.is_match(&wrapped));
            prop_assert!(!matcher.is_match(&stem));
        }

        /// Completion only returns choices with the prefix
        #[test]
        fn completion_respects_prefix(
            prefix in "[a-c]{0,2}",
            choices in prop::collection::vec("[a-c]{1,4}", 0..20),
        ) {
            let found = complete(&choices, &prefix);
            prop_assert!(found.iter().all(|c| c.starts_with(&prefix)));
            let expected = choices.iter().filter(|c| c.starts_with(&prefix)).count();
            prop_assert_eq!(found.len(), expected);
        }
    }
}

mod fieldpath_tests {
    use super::*;

    proptest! {
        /// A dotted path reaches the value it was nested under
        #[test]
        fn dotted_path_finds_leaf(
            keys in prop::collection::vec(arb_key(), 1..6),
            leaf in any::<i64>(),
        ) {
            let value = nest(&keys, json!(leaf));
            let path = FieldPath::parse(&keys.join(".")).unwrap();
            prop_assert_eq!(path.search(&value), Some(json!(leaf)));
        }

        /// A path one key too deep finds nothing
        #[test]
        fn overlong_path_is_none(
            keys in prop::collection::vec(arb_key(), 1..5),
            extra in arb_key(),
        ) {
            let value = nest(&keys, json!("leaf"));
            let path = FieldPath::parse(&format!("{}.{}", keys.join("."), extra)).unwrap();
            prop_assert_eq!(path.search(&value), None);
        }

        /// Positive and negative indexes address the same elements
        #[test]
        fn indexes(
            items in prop::collection::vec(any::<i32>(), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let i = pick.index(items.len());
            let value = json!({"Items": items});

            let forward = FieldPath::parse(&format!("Items[{}]", i)).unwrap();
            let backward = FieldPath::parse(&format!("Items[-{}]", items.len() - i)).unwrap();
            prop_assert_eq!(forward.search(&value), Some(json!(items[i])));
            prop_assert_eq!(backward.search(&value), Some(json!(items[i])));

            let past = FieldPath::parse(&format!("Items[{}]", items.len())).unwrap();
            prop_assert_eq!(past.search(&value), None);
        }

        /// Flattening projects the rest of the path over every element
        #[test]
        fn flatten_projects(names in prop::collection::vec("[a-z]{1,8}", 0..20)) {
            let records: Vec<Value> =
                names.iter().map(|n| json!({"Name": n, "Other": 1})).collect();
            let value = json!({"Records": records});

            let found = FieldPath::parse("Records[].Name").unwrap().search(&value);
            prop_assert_eq!(found, Some(json!(names)));
        }
    }
}

mod normalizer_tests {
    use super::*;

    proptest! {
        /// Every key of a pair list ends up in the tag map, each value kept once
        #[test]
        fn tag_pairs_collected(pairs in prop::collection::vec(("[a-d]", "[a-z]{0,5}"), 0..20)) {
            let source: Vec<Value> =
                pairs.iter().map(|(k, v)| json!({"Key": k, "Value": v})).collect();
            let tags = normalize_tags(&Value::Array(source), "Key", "Value");

            let keys: BTreeSet<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
            prop_assert_eq!(tags.len(), keys.len());

            let total: usize = tags.values().map(|v| v.values().len()).sum();
            prop_assert_eq!(total, pairs.len());
            for (k, v) in &pairs {
                prop_assert!(tags[k].values().contains(&v.as_str()));
            }
        }

        /// snake_case output is lowercase and stable
        #[test]
        fn snake_case_is_idempotent(name in "[A-Za-z][A-Za-z0-9]{0,20}") {
            let once = to_snake_case(&name);
            prop_assert!(!once.chars().any(|c| c.is_ascii_uppercase()));
            prop_assert_eq!(to_snake_case(&once), once.clone());
        }

        /// Recording file names are filesystem safe and ignore parameter order
        #[test]
        fn record_file_names_are_safe(
            operation in "[A-Z][A-Za-z]{2,12}",
            params in prop::collection::btree_map("[A-Za-z]{1,6}", "[ -~]{0,10}", 0..4),
        ) {
            let forward: Map<String, Value> =
                params.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            let backward: Map<String, Value> =
                params.iter().rev().map(|(k, v)| (k.clone(), json!(v))).collect();

            let name = record_file_name(&operation, &forward);
            prop_assert!(name.starts_with(&operation));
            prop_assert!(name.ends_with(".json"));
            prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || "-_.".contains(c)));
            prop_assert_eq!(name, record_file_name(&operation, &backward));
        }
    }
}

/// Serves `pages[n]` for token `n`, chaining tokens until the last page
struct PagedTransport {
    pages: Vec<Vec<i32>>,
}

#[async_trait]
impl Transport for PagedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, ApiError> {
        let n: usize = request
            .params
            .get("NextToken")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let mut page = json!({"Items": self.pages.get(n).cloned().unwrap_or_default()});
        if n + 1 < self.pages.len() {
            page["NextToken"] = json!((n + 1).to_string());
        }
        Ok(page)
    }
}

mod paging_tests {
    use super::*;

    proptest! {
        /// Draining pages keeps every item, in page order
        #[test]
        fn pages_concatenate(
            pages in prop::collection::vec(prop::collection::vec(any::<i32>(), 0..5), 1..8),
        ) {
            let transport = Arc::new(PagedTransport { pages: pages.clone() });
            let client = BackendClient::new(ClientKey::new("svc", "r", "a"), transport);
            let query = FieldPath::parse("Items").unwrap();

            let call = client.call("ListItems", Some(&query), json!({}));
            let items = tokio_test::block_on(call).unwrap();

            let expected: Vec<i32> = pages.into_iter().flatten().collect();
            prop_assert_eq!(items, json!(expected));
        }
    }
}
