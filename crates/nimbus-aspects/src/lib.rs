//! # Nimbus Aspects
//!
//! Cross-cutting behaviour around handler methods.
//!
//! An aspect is a *block* (a type implementing one of the block traits) attached
//! to handler methods through an [`AspectDeclaration`]. Declarations live at three
//! scopes:
//!
//! | Scope | Where it is declared | Applies to |
//! |-------|---------------------|------------|
//! | Global | the handler catalog | every method (transforms: type-matching methods only) |
//! | Handler | the handler's `describe` | every method of the handler |
//! | Method | a single method | that method |
//!
//! For each method the [`matrix`] module merges the three scopes into an
//! [`AspectMatrix`]: five ordered lists of blocks run around the handler call.
//!
//! ```text
//! input ─► InputFilter* ─► Pre* ─► handler ─► Post* ─► OutputFilter* ─► result
//!                 └───────────┴───────┴─ fault ─► OnError* ─► substitute
//! ```
//!
//! ## Block kinds
//!
//! | Trait | Role | Lists |
//! |-------|------|-------|
//! | [`NeutralBlock`] | side effect | Pre, Post |
//! | [`TransparentBlock<T>`] | transforms a `T` | InputFilter, OutputFilter |
//! | [`ErrorBlock`] | substitutes a result for a fault | OnError |

#![doc(html_root_url = "https://docs.rs/nimbus-aspects/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod block;
mod declaration;
pub mod matrix;

pub use block::{ErrorBlock, NeutralBlock, Recovery, TransparentBlock};
pub use declaration::{
    AspectDeclaration, AspectScope, BlockBinding, BlockRole, ErrorRunner, NeutralRunner, Position,
    TransformRunner,
};
pub use matrix::{AspectMatrix, BaseMatrix, MethodSignature, Phase};
