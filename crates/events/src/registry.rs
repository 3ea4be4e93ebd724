//! Immutable aggregate-type -> handler map, built once at bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::handler::{ErasedHandler, PayloadHandler};
use crate::record::AggregateType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no payload handler registered for {0}")]
    NotFound(AggregateType),

    #[error("payload handler for {0} registered twice")]
    Duplicate(AggregateType),

    #[error("payload handlers missing for: {0:?}")]
    Incomplete(Vec<AggregateType>),
}

/// Collects handlers during bootstrap.
///
/// Each domain module calls [`PayloadRegistryBuilder::register`] for its own
/// handler; [`PayloadRegistryBuilder::build`] freezes the result.
#[derive(Default)]
pub struct PayloadRegistryBuilder {
    handlers: HashMap<AggregateType, Arc<dyn ErasedHandler>>,
}

impl PayloadRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H) -> Result<&mut Self, RegistryError>
    where
        H: PayloadHandler,
    {
        let tag = handler.aggregate_type();
        if self.handlers.contains_key(&tag) {
            return Err(RegistryError::Duplicate(tag));
        }
        tracing::debug!(aggregate_type = %tag, "payload handler registered");
        self.handlers.insert(tag, Arc::new(handler));
        Ok(self)
    }

    pub fn build(self) -> PayloadRegistry {
        PayloadRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

/// Read-only handler lookup.
///
/// Cloning is cheap; all clones share the same frozen map.
#[derive(Clone)]
pub struct PayloadRegistry {
    handlers: Arc<HashMap<AggregateType, Arc<dyn ErasedHandler>>>,
}

impl PayloadRegistry {
    pub fn builder() -> PayloadRegistryBuilder {
        PayloadRegistryBuilder::new()
    }

    pub fn resolve(&self, aggregate_type: AggregateType) -> Result<Arc<dyn ErasedHandler>, RegistryError> {
        self.handlers
            .get(&aggregate_type)
            .cloned()
            .ok_or(RegistryError::NotFound(aggregate_type))
    }

    pub fn contains(&self, aggregate_type: AggregateType) -> bool {
        self.handlers.contains_key(&aggregate_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Fail if any of `expected` has no handler.
    ///
    /// Run at startup so a missing handler is a boot failure instead of a
    /// record stuck at dispatch time.
    pub fn ensure_complete(&self, expected: &[AggregateType]) -> Result<(), RegistryError> {
        let mut missing: Vec<AggregateType> = expected
            .iter()
            .copied()
            .filter(|t| !self.handlers.contains_key(t))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(RegistryError::Incomplete(missing))
    }
}

impl core::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut tags: Vec<_> = self.handlers.keys().collect();
        tags.sort();
        f.debug_struct("PayloadRegistry").field("handlers", &tags).finish()
    }
}
