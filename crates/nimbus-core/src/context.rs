//! Dispatch context types.
//!
//! The [`DispatchContext`] is created by the bus for every call and handed by
//! reference to every aspect block of the call's pipeline.

use crate::input::TypeKey;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// A unique identifier for each dispatch, using UUID v7.
///
/// UUID v7 is time-ordered, which keeps log correlation sortable.
///
/// # Example
///
/// ```
/// use nimbus_core::DispatchId;
///
/// let id = DispatchId::new();
/// assert_ne!(id, DispatchId::new());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchId(Uuid);

impl DispatchId {
    /// Creates a new unique dispatch ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `DispatchId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DispatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DispatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DispatchId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-dispatch metadata.
///
/// Blocks can use it for correlation (the dispatch ID), for diagnostics (the
/// handler and method names) and for timing.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    dispatch_id: DispatchId,
    handler: TypeKey,
    method: &'static str,
    input: TypeKey,
    started_at: Instant,
}

impl DispatchContext {
    /// Creates a context with a fresh dispatch ID, starting now.
    #[must_use]
    pub fn new(handler: TypeKey, method: &'static str, input: TypeKey) -> Self {
        Self {
            dispatch_id: DispatchId::new(),
            handler,
            method,
            input,
            started_at: Instant::now(),
        }
    }

    /// Replaces the dispatch ID, e.g. with one received from an upstream caller.
    #[must_use]
    pub const fn with_dispatch_id(mut self, dispatch_id: DispatchId) -> Self {
        self.dispatch_id = dispatch_id;
        self
    }

    /// Returns the dispatch ID.
    #[must_use]
    pub const fn dispatch_id(&self) -> DispatchId {
        self.dispatch_id
    }

    /// Returns the handler type.
    #[must_use]
    pub const fn handler(&self) -> TypeKey {
        self.handler
    }

    /// Returns the method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        self.method
    }

    /// Returns `Handler::method`, using the handler's short name.
    #[must_use]
    pub fn qualified_method(&self) -> String {
        format!("{}::{}", self.handler.short_name(), self.method)
    }

    /// Returns the input type.
    #[must_use]
    pub const fn input(&self) -> TypeKey {
        self.input
    }

    /// Returns when the dispatch started.
    #[must_use]
    pub const fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns the time elapsed since the dispatch started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Orders;
    struct CreateOrder;

    fn context() -> DispatchContext {
        DispatchContext::new(
            TypeKey::of::<Orders>(),
            "create",
            TypeKey::of::<CreateOrder>(),
        )
    }

    #[test]
    fn test_dispatch_id_uniqueness() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| DispatchId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_dispatch_id_is_v7() {
        let id = DispatchId::new();
        assert_eq!(id.as_uuid().get_version_num(), 7);
    }

    #[test]
    fn test_dispatch_id_serialization() {
        let id = DispatchId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn test_context_accessors() {
        let ctx = context();
        assert_eq!(ctx.handler(), TypeKey::of::<Orders>());
        assert_eq!(ctx.method(), "create");
        assert_eq!(ctx.input(), TypeKey::of::<CreateOrder>());
        assert_eq!(ctx.qualified_method(), "Orders::create");
        assert!(ctx.elapsed() >= Duration::ZERO);
    }

    #[test]
    fn test_with_dispatch_id() {
        let id = DispatchId::from_uuid(Uuid::nil());
        let ctx = context().with_dispatch_id(id);
        assert_eq!(ctx.dispatch_id(), id);
    }
}
