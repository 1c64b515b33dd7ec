//! Route validation against the capability registry.
//!
//! Only names are checked. A route naming an unknown predicate or filter is
//! disabled and carries a diagnostic; it is still saved so the operator can
//! fix it later. The validator never turns a route on.

use crate::capability::CapabilityRegistry;
use crate::routes::types::RouteDefinition;

pub const PREDICATE_NOT_FOUND: &str = "predicate(s) not found";
pub const FILTER_NOT_FOUND: &str = "filter(s) not found";

/// Normalise names, then run both checks. Both checks always run.
pub fn validate(def: &mut RouteDefinition, registry: &CapabilityRegistry) {
    def.normalize_names();
    check_predicates(def, registry);
    check_filters(def, registry);
}

pub fn check_predicates(def: &mut RouteDefinition, registry: &CapabilityRegistry) {
    let unknown: Vec<&str> = def
        .predicates
        .iter()
        .map(|p| p.name.as_str())
        .filter(|name| !registry.has_predicate(name))
        .collect();

    if unknown.is_empty() {
        def.predicate_description = None;
    } else {
        tracing::warn!(route_id = %def.id, unknown = ?unknown, "Route references unknown predicates");
        def.predicate_description = Some(PREDICATE_NOT_FOUND.to_string());
        def.enabled = false;
    }
}

pub fn check_filters(def: &mut RouteDefinition, registry: &CapabilityRegistry) {
    let unknown: Vec<&str> = def
        .filters
        .iter()
        .map(|f| f.name.as_str())
        .filter(|name| !registry.has_filter(name))
        .collect();

    if unknown.is_empty() {
        def.filter_description = None;
    } else {
        tracing::warn!(route_id = %def.id, unknown = ?unknown, "Route references unknown filters");
        def.filter_description = Some(FILTER_NOT_FOUND.to_string());
        def.enabled = false;
    }
}
