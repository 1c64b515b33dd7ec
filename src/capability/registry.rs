//! The capability catalogue.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::capability::{
    filters, predicates, ArgInfo, Args, BuildError, CapabilityInfo, FilterFactory,
    PredicateFactory, RouteFilter, RoutePredicate,
};

struct Entry<F: ?Sized> {
    implementation: &'static str,
    factory: Arc<F>,
}

/// Immutable catalogue of every predicate and filter kind.
pub struct CapabilityRegistry {
    predicates: BTreeMap<&'static str, Entry<dyn PredicateFactory>>,
    filters: BTreeMap<&'static str, Entry<dyn FilterFactory>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry holding every kind compiled into this binary.
    pub fn builtin() -> Self {
        let mut builder = Self::builder();
        predicates::register(&mut builder);
        filters::register(&mut builder);
        builder.build()
    }

    pub fn predicate_names(&self) -> Vec<&'static str> {
        self.predicates.keys().copied().collect()
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.keys().copied().collect()
    }

    pub fn has_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Predicate catalogue, sorted by name.
    pub fn predicates(&self) -> Vec<CapabilityInfo> {
        self.predicates
            .iter()
            .map(|(name, e)| describe(name, e.implementation, e.factory.args()))
            .collect()
    }

    /// Filter catalogue, sorted by name.
    pub fn filters(&self) -> Vec<CapabilityInfo> {
        self.filters
            .iter()
            .map(|(name, e)| describe(name, e.implementation, e.factory.args()))
            .collect()
    }

    pub fn build_predicate(&self, name: &str, args: &Args) -> Result<Box<dyn RoutePredicate>, BuildError> {
        let entry = self
            .predicates
            .get(name)
            .ok_or_else(|| BuildError::UnknownPredicate(name.to_string()))?;
        entry.factory.build(args)
    }

    pub fn build_filter(&self, name: &str, args: &Args) -> Result<Box<dyn RouteFilter>, BuildError> {
        let entry = self
            .filters
            .get(name)
            .ok_or_else(|| BuildError::UnknownFilter(name.to_string()))?;
        entry.factory.build(args)
    }
}

fn describe(name: &str, implementation: &str, args: &[crate::capability::ArgSpec]) -> CapabilityInfo {
    CapabilityInfo {
        name: name.to_string(),
        implementation: implementation.to_string(),
        args: args
            .iter()
            .map(|a| ArgInfo {
                name: a.name.to_string(),
                kind: a.kind.to_string(),
            })
            .collect(),
    }
}

/// Collects factories before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    predicates: BTreeMap<&'static str, Entry<dyn PredicateFactory>>,
    filters: BTreeMap<&'static str, Entry<dyn FilterFactory>>,
}

impl RegistryBuilder {
    pub fn predicate<F: PredicateFactory>(&mut self, factory: F) -> &mut Self {
        let name = factory.name();
        if self.predicates.contains_key(name) {
            tracing::warn!(name, "Predicate registered twice, keeping the latest");
        }
        self.predicates.insert(
            name,
            Entry {
                implementation: std::any::type_name::<F>(),
                factory: Arc::new(factory),
            },
        );
        self
    }

    pub fn filter<F: FilterFactory>(&mut self, factory: F) -> &mut Self {
        let name = factory.name();
        if self.filters.contains_key(name) {
            tracing::warn!(name, "Filter registered twice, keeping the latest");
        }
        self.filters.insert(
            name,
            Entry {
                implementation: std::any::type_name::<F>(),
                factory: Arc::new(factory),
            },
        );
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        tracing::debug!(
            predicates = self.predicates.len(),
            filters = self.filters.len(),
            "Capability registry built"
        );
        CapabilityRegistry {
            predicates: self.predicates,
            filters: self.filters,
        }
    }
}
