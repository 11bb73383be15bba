//! # Nimbus Core
//!
//! Core types for the Nimbus dispatch runtime.
//!
//! This crate provides the foundational types used throughout Nimbus:
//!
//! - [`Lifetime`] / [`CompatibilityMode`] - How long handler and block instances live
//! - [`TypeKey`] / [`Value`] / [`Input`] - Runtime type identity and erased payloads
//! - [`DispatchContext`] - Per-dispatch metadata handed to every aspect block
//! - [`ConfigError`] / [`DispatchError`] / [`ResolveError`] - Error taxonomy
//! - [`di`] - The instance-lifetime collaborator and the bundled container

#![doc(html_root_url = "https://docs.rs/nimbus-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
pub mod di;
mod error;
mod input;
pub mod lifetime;

use std::future::Future;
use std::pin::Pin;

pub use context::{DispatchContext, DispatchId};
pub use di::{
    Container, Injectable, Instance, InstanceProvider, InstanceProviderExt, Scope,
    ServiceCollection,
};
pub use error::{ConfigError, DispatchError, ErrorCategory, Fault, ResolveError};
pub use input::{AnyInput, Input, TypeKey, Value};
pub use lifetime::{CompatibilityMode, Lifetime, LifetimeDeclaration, LifetimeInheritance};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
