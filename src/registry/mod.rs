//! Capability registry.
//!
//! An in-memory, insertion-ordered table from operation name to its
//! implementation and descriptor. The registry is filled once at startup and
//! then shared read-only behind an `Arc`, so lookups take no locks.

pub mod args;
pub mod descriptor;

pub use args::BoundArgs;
pub use descriptor::{OperationDescriptor, ParamType, ParameterSpec};

use crate::error::{AppError, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A named, independently invocable operation.
#[async_trait]
pub trait Capability: Send + Sync {
    fn descriptor(&self) -> &OperationDescriptor;

    /// Run the operation. Errors are normalized by the dispatcher.
    async fn invoke(&self, args: BoundArgs) -> Result<Value>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    operations: IndexMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the capability registered under its descriptor's name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        if self.operations.insert(name.clone(), capability).is_some() {
            tracing::debug!(operation = %name, "Replaced previously registered operation");
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.operations
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownOperation(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Option<&OperationDescriptor> {
        self.operations.get(name).map(|op| op.descriptor())
    }

    /// Descriptors in registration order. Callers must not rely on the order.
    pub fn enumerate(&self) -> impl Iterator<Item = &OperationDescriptor> {
        self.operations.values().map(|op| op.descriptor())
    }

    pub fn descriptors(&self) -> Vec<OperationDescriptor> {
        self.enumerate().cloned().collect()
    }

    pub fn categories(&self) -> BTreeSet<String> {
        self.enumerate().map(|d| d.category.clone()).collect()
    }

    /// Descriptors whose category matches `category`, ignoring case.
    pub fn by_category(&self, category: &str) -> Vec<&OperationDescriptor> {
        self.enumerate()
            .filter(|d| d.category.eq_ignore_ascii_case(category))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
