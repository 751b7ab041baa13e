//! Filter registry
//!
//! Filters are registered by name at startup and looked up when a slave
//! connects. The empty name always resolves to the identity filter.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::builtin::{IdentityFilter, ParityDeltaFilter, SpaceFilter};
use super::decision::{FilterDecision, FilterRow};
use super::errors::{validate_filter_name, FilterError, FilterResult};

/// A per-row replication filter.
///
/// Filters run synchronously inside a connection task and may be invoked
/// from many connections at once. A filter must not keep state across
/// rows: the same row must always produce the same decision.
pub trait RowFilter: Send + Sync {
    fn filter(&self, row: &FilterRow<'_>) -> FilterResult<FilterDecision>;

    /// Validates the handshake argument before any row is filtered.
    fn check_arg(&self, _arg: &[u8]) -> FilterResult<()> {
        Ok(())
    }
}

impl<F> RowFilter for F
where
    F: Fn(&FilterRow<'_>) -> FilterResult<FilterDecision> + Send + Sync,
{
    fn filter(&self, row: &FilterRow<'_>) -> FilterResult<FilterDecision> {
        self(row)
    }
}

/// Filter declaration as found in the master configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    Identity,
    ParityDelta(ParityDeltaFilter),
}

impl FilterSpec {
    pub fn build(&self) -> Arc<dyn RowFilter> {
        match self {
            FilterSpec::Identity => Arc::new(IdentityFilter),
            FilterSpec::ParityDelta(filter) => Arc::new(*filter),
        }
    }
}

/// Name to filter table
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn RowFilter>>,
}

impl FilterRegistry {
    /// Registry holding only the builtins: `identity`, `parity_delta` and
    /// `space`.
    pub fn new() -> Self {
        let mut filters: HashMap<String, Arc<dyn RowFilter>> = HashMap::new();
        filters.insert("identity".to_string(), Arc::new(IdentityFilter));
        filters.insert(
            "parity_delta".to_string(),
            Arc::new(ParityDeltaFilter::default()),
        );
        filters.insert("space".to_string(), Arc::new(SpaceFilter));
        Self { filters }
    }

    /// Builtins plus every declared filter.
    pub fn from_specs<'a, I>(specs: I) -> FilterResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a FilterSpec)>,
    {
        let mut registry = Self::new();
        for (name, spec) in specs {
            registry.register(name, spec.build())?;
        }
        Ok(registry)
    }

    /// Registers a filter. Names are unique and must fit the handshake.
    pub fn register(&mut self, name: &str, filter: Arc<dyn RowFilter>) -> FilterResult<()> {
        validate_filter_name(name)?;
        if name.is_empty() {
            return Err(FilterError::InvalidConfig(
                "the empty filter name is reserved".to_string(),
            ));
        }
        if self.filters.contains_key(name) {
            return Err(FilterError::Duplicate(name.to_string()));
        }
        self.filters.insert(name.to_string(), filter);
        Ok(())
    }

    /// Looks up a filter. The empty name is the identity filter.
    pub fn resolve(&self, name: &str) -> FilterResult<Arc<dyn RowFilter>> {
        if name.is_empty() {
            return Ok(Arc::new(IdentityFilter));
        }
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        name.is_empty() || self.filters.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("filters", &self.names())
            .finish()
    }
}
