//! # Nimbus
//!
//! **In-process request dispatch with aspects and lifetime-aware handlers**
//!
//! Nimbus routes typed input values to the one handler method that accepts them:
//!
//! - **Typed routing** – every input type maps to exactly one method, checked at startup
//! - **Aspects** – pre/post blocks, input/output filters and error substitution,
//!   declared globally, per handler or per method
//! - **Lifetimes** – singleton, scoped and transient handlers and blocks, with
//!   mismatches caught before the first dispatch
//! - **Compiled launchers** – discovery does all the work once; dispatch is a
//!   table lookup plus the pipeline
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nimbus::prelude::*;
//!
//! struct PlaceOrder { sku: String }
//! impl Input for PlaceOrder { type Output = u64; }
//!
//! #[derive(Default)]
//! struct Orders;
//! inject_default!(Orders);
//!
//! impl Handler for Orders {
//!     fn describe(spec: &mut HandlerSpec<Self>) {
//!         spec.lifetime(LifetimeDeclaration::scoped());
//!         spec.handle("place", |orders, input: PlaceOrder| async move {
//!             orders.place(&input.sku).await
//!         })
//!         .aspect(AspectDeclaration::neutral::<Audit>(Position::Pre));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let nimbus = Nimbus::builder()
//!         .config(ConfigLoader::new().with_env_prefix("NIMBUS").load()?)
//!         .handler::<Orders>()
//!         .init_telemetry(true)
//!         .build()?;
//!
//!     let scope = nimbus.scope();
//!     let id = nimbus.bus(&scope)?.dispatch(PlaceOrder { sku: "A-1".into() }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Pipeline
//!
//! ```text
//! input ─► InputFilter* ─► Pre* ─► handler ─► Post* ─► OutputFilter* ─► result
//!                 └───────────┴───────┴─ fault ─► OnError* ─► substitute
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod runtime;

pub use error::BuildError;
pub use runtime::{discovery_options, Nimbus, NimbusBuilder};

// Re-export core types
pub use nimbus_core as core;

// Re-export aspect types
pub use nimbus_aspects as aspects;

// Re-export dispatch types
pub use nimbus_dispatch as dispatch;

// Re-export telemetry
pub use nimbus_telemetry as telemetry;

// Re-export configuration
pub use nimbus_config as config;

// Re-export registration macros
pub use nimbus_core::inject_default;
pub use nimbus_dispatch::submit_handler;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use nimbus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{BuildError, Nimbus, NimbusBuilder};

    pub use nimbus_core::{
        BoxFuture, CompatibilityMode, DispatchContext, DispatchError, Fault, Injectable, Input,
        InstanceProviderExt, Lifetime, LifetimeDeclaration, LifetimeInheritance, Scope,
        ServiceCollection,
    };

    // Re-export aspect blocks
    pub use nimbus_aspects::{
        AspectDeclaration, ErrorBlock, NeutralBlock, Position, Recovery, TransparentBlock,
    };

    // Re-export handler definition and dispatch
    pub use nimbus_dispatch::{Bus, Catalog, Handler, HandlerSpec, MethodSpec};

    // Re-export configuration
    pub use nimbus_config::{ConfigLoader, NimbusConfig};

    // Re-export registration macros
    pub use nimbus_core::inject_default;
    pub use nimbus_dispatch::submit_handler;
}
