//! Route definition and cache projection types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::Args;

/// A named predicate with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateDefinition {
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

/// A named filter with its arguments and an admin-controlled switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterDefinition {
    pub name: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Full route as authored by an operator and kept in the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,
    #[serde(default)]
    pub filters: Vec<FilterDefinition>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub predicate_description: Option<String>,
    #[serde(default)]
    pub filter_description: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub updater: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RouteDefinition {
    /// Minimal enabled route; used by tests and the CLI.
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            order: 0,
            predicates: Vec::new(),
            filters: Vec::new(),
            enabled: true,
            predicate_description: None,
            filter_description: None,
            creator: None,
            updater: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_predicate(mut self, name: &str, args: &[(&str, &str)]) -> Self {
        self.predicates.push(PredicateDefinition {
            name: name.to_string(),
            args: to_args(args),
        });
        self
    }

    pub fn with_filter(mut self, name: &str, args: &[(&str, &str)]) -> Self {
        self.filters.push(FilterDefinition {
            name: name.to_string(),
            args: to_args(args),
            enabled: true,
        });
        self
    }

    /// Upper-cases the first letter of every predicate and filter name.
    pub fn normalize_names(&mut self) {
        for p in &mut self.predicates {
            p.name = capitalize(&p.name);
        }
        for f in &mut self.filters {
            f.name = capitalize(&f.name);
        }
    }

    /// Enabled and carrying no diagnostic.
    pub fn is_eligible(&self) -> bool {
        self.enabled && self.predicate_description.is_none() && self.filter_description.is_none()
    }

    pub fn projection(&self) -> RouteProjection {
        RouteProjection {
            id: self.id.clone(),
            uri: self.uri.clone(),
            order: self.order,
            predicates: self.predicates.clone(),
            filters: self
                .filters
                .iter()
                .filter(|f| f.enabled)
                .map(|f| ProjectedFilter {
                    name: f.name.clone(),
                    args: f.args.clone(),
                })
                .collect(),
        }
    }
}

fn to_args(pairs: &[(&str, &str)]) -> Args {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub(crate) fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Filter as it appears in the cache: enabled implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedFilter {
    pub name: String,
    #[serde(default)]
    pub args: Args,
}

/// Runtime-relevant subset of an eligible route, stored in the route cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteProjection {
    pub id: String,
    pub uri: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,
    #[serde(default)]
    pub filters: Vec<ProjectedFilter>,
}
