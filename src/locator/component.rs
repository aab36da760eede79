//! The component cascade
//!
//! Each of the six components knows its candidate choices given the values
//! already resolved to its left. Resolution walks the components depth-first:
//! match the component's pattern against its choices, push each match onto
//! the context, recurse, pop. What comes out at the bottom is one [`Leaf`]
//! per (service, region, account, type) combination.

use super::Locator;
use crate::matcher::{self, Matcher};
use crate::resource::{Leaf, Registry};
use std::fmt;
use std::sync::Arc;

/// One locator segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Scheme,
    Provider,
    Service,
    Region,
    Account,
    Resource,
}

impl Component {
    /// Resolution order
    pub const ALL: [Component; 6] = [
        Component::Scheme,
        Component::Provider,
        Component::Service,
        Component::Region,
        Component::Account,
        Component::Resource,
    ];

    pub fn index(self) -> usize {
        match self {
            Component::Scheme => 0,
            Component::Provider => 1,
            Component::Service => 2,
            Component::Region => 3,
            Component::Account => 4,
            Component::Resource => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Component::Scheme => "scheme",
            Component::Provider => "provider",
            Component::Service => "service",
            Component::Region => "region",
            Component::Account => "account",
            Component::Resource => "resource",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the choice sets are drawn from
#[derive(Debug, Clone)]
pub struct Catalog {
    pub registry: Arc<Registry>,
    pub scheme: String,
    pub provider: String,
    pub accounts: Vec<String>,
}

impl Catalog {
    /// Candidate values for `component`, given the resolved values to its left
    pub fn choices(&self, component: Component, context: &[String]) -> Vec<String> {
        let at = |c: Component| context.get(c.index()).map(|s| s.as_str()).unwrap_or_default();

        match component {
            Component::Scheme => vec![self.scheme.clone()],
            Component::Provider => vec![self.provider.clone()],
            Component::Service => self.registry.all_services(at(Component::Provider)),
            Component::Region => self
                .registry
                .regions_for(at(Component::Provider), at(Component::Service)),
            Component::Account => self.accounts.clone(),
            Component::Resource => self
                .registry
                .all_types(at(Component::Provider), at(Component::Service)),
        }
    }

    /// Values of `component` matching `pattern`
    fn matches(&self, component: Component, pattern: &str, context: &[String]) -> Vec<String> {
        if component == Component::Account && self.accounts.is_empty() {
            // Single-account mode: the pattern itself is the account
            return vec![pattern.to_string()];
        }
        Matcher::new(pattern).matches(self.choices(component, context))
    }

    /// Choices of `component` starting with `prefix`
    pub fn complete(&self, component: Component, context: &[String], prefix: &str) -> Vec<String> {
        matcher::complete(self.choices(component, context), prefix)
    }

    /// Expand a locator into its leaves, in cascade order
    pub fn resolve(&self, locator: &Locator) -> Vec<Leaf> {
        let mut context = Vec::with_capacity(Component::ALL.len());
        let mut leaves = Vec::new();
        self.expand(locator, &mut context, &mut leaves);
        tracing::debug!("{} resolved to {} leaves", locator, leaves.len());
        leaves
    }

    fn expand(&self, locator: &Locator, context: &mut Vec<String>, leaves: &mut Vec<Leaf>) {
        let component = Component::ALL[context.len()];
        let pattern = locator.pattern(component);
        let matches = self.matches(component, pattern, context);
        tracing::trace!("{} '{}' in {:?}: {:?}", component, pattern, context, matches);

        for value in matches {
            if component == Component::Resource {
                leaves.push(Leaf {
                    scheme: context[0].clone(),
                    provider: context[1].clone(),
                    service: context[2].clone(),
                    region: context[3].clone(),
                    account: context[4].clone(),
                    resource_type: value,
                    resource_id: locator.resource_id().map(|s| s.to_string()),
                });
                continue;
            }

            context.push(value);
            self.expand(locator, context, leaves);
            context.pop();
        }
    }
}
