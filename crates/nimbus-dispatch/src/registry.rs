//! The discovered handlers and the input-type index.

use crate::descriptor::{HandlerDescriptor, HandlerMethodDescriptor};
use indexmap::map::Entry;
use indexmap::IndexMap;
use nimbus_core::{ConfigError, TypeKey};
use std::sync::Arc;

/// Maps each input type to the single method that accepts it.
#[derive(Debug, Default)]
pub struct InputTypeIndex {
    methods: IndexMap<TypeKey, Arc<HandlerMethodDescriptor>>,
}

impl InputTypeIndex {
    /// Indexes every method of the given handlers.
    ///
    /// Fails with [`ConfigError::DuplicateInput`] when two methods accept the
    /// same input type.
    pub fn build(handlers: &[Arc<HandlerDescriptor>]) -> Result<Self, ConfigError> {
        let mut methods = IndexMap::new();
        for method in handlers.iter().flat_map(|h| h.methods()) {
            match methods.entry(method.input()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(method));
                }
                Entry::Occupied(existing) => {
                    return Err(ConfigError::DuplicateInput {
                        input: method.input(),
                        first: existing.get().qualified_name().to_string(),
                        second: method.qualified_name().to_string(),
                    });
                }
            }
        }
        Ok(Self { methods })
    }

    /// Returns the method accepting `input`.
    #[must_use]
    pub fn get(&self, input: TypeKey) -> Option<&Arc<HandlerMethodDescriptor>> {
        self.methods.get(&input)
    }

    /// Returns the indexed input types in discovery order.
    pub fn inputs(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.methods.keys().copied()
    }

    /// Returns the number of indexed methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns whether no method is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// The immutable output of discovery, shared by every bus.
#[derive(Debug, Default)]
pub struct Registry {
    handlers: Vec<Arc<HandlerDescriptor>>,
    index: InputTypeIndex,
}

impl Registry {
    /// Creates a registry, indexing the handlers' methods.
    pub fn new(handlers: Vec<Arc<HandlerDescriptor>>) -> Result<Self, ConfigError> {
        let index = InputTypeIndex::build(&handlers)?;
        Ok(Self { handlers, index })
    }

    /// Returns the handlers in discovery order.
    #[must_use]
    pub fn handlers(&self) -> &[Arc<HandlerDescriptor>] {
        &self.handlers
    }

    /// Returns the descriptor of a handler type.
    #[must_use]
    pub fn handler(&self, handler: TypeKey) -> Option<&Arc<HandlerDescriptor>> {
        self.handlers.iter().find(|h| h.handler() == handler)
    }

    /// Returns the input-type index.
    #[must_use]
    pub const fn index(&self) -> &InputTypeIndex {
        &self.index
    }

    /// Returns the method accepting `input`.
    #[must_use]
    pub fn method_for(&self, input: TypeKey) -> Option<&Arc<HandlerMethodDescriptor>> {
        self.index.get(input)
    }
}
