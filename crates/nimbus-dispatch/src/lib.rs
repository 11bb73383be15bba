//! Handler discovery, compiled launchers and the dispatch bus.
//!
//! Startup and dispatch are strictly separated:
//!
//! 1. A [`Catalog`] lists handler types and global aspects.
//! 2. [`discover`] materialises every handler's declarations, resolves lifetimes
//!    and aspect matrices, and compiles one [`Launcher`] per method into a
//!    [`Registry`].
//! 3. [`scan_and_register`] runs discovery and registers handlers, blocks, the
//!    registry and the [`Bus`] with a [`ServiceCollection`](nimbus_core::ServiceCollection).
//! 4. At runtime a [`Bus`] looks up the method for an input type and runs its
//!    launcher; nothing is reflected or recompiled per call.
//!
//! # Example
//!
//! ```rust,ignore
//! use nimbus_dispatch::{scan_and_register, Bus, Catalog, DiscoveryOptions};
//!
//! let mut services = ServiceCollection::new();
//! scan_and_register(&Catalog::collected(), &mut services, &DiscoveryOptions::default())?;
//! let container = services.build();
//!
//! let scope = container.create_scope();
//! let bus = scope.get_required::<Bus>()?;
//! let id = bus.dispatch(CreateOrder { sku: "A-1".into() }).await?;
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-dispatch/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod bus;
mod catalog;
mod descriptor;
pub mod discovery;
mod handler;
mod launcher;
mod register;
mod registry;

pub use bus::Bus;
pub use catalog::{Catalog, HandlerRegistration, HandlerType};
pub use descriptor::{HandlerDescriptor, HandlerMethodDescriptor};
pub use discovery::{discover, BlockRegistration, Discovery, DiscoveryOptions};
pub use handler::{method_invoker, Handler, HandlerBlueprint, HandlerSpec, MethodInvoker, MethodSpec};
pub use launcher::{Launcher, LifetimeAbort};
pub use register::scan_and_register;
pub use registry::{InputTypeIndex, Registry};

// Used by `submit_handler!`.
#[doc(hidden)]
pub use inventory;
