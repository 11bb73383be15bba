//! Aspect matrix resolution.
//!
//! Declarations are first classified into the five phases of an
//! [`AspectMatrix`]:
//!
//! | Position | Neutral | Transparent | ErrorSubstitute |
//! |----------|---------|-------------|-----------------|
//! | `Pre` | Pre | InputFilter | OnError |
//! | `Post` | Post | OutputFilter | OnError |
//! | `Wrap` | Pre + Post | InputFilter + OutputFilter | OnError |
//! | `Unspecified` | - | - | OnError |
//!
//! [`resolve`] then merges the method's own matrix with the handler's
//! [`BaseMatrix`], closest scope first:
//!
//! - InputFilter: method, then global filters on the method's input type.
//!   Handler-scope input filters are not merged.
//! - Pre and Post: method, then handler, then global.
//! - OnError: method, then handler. Global error blocks are not merged.
//! - OutputFilter: method, then handler and global filters on the method's
//!   return type.
//!
//! Resolution is a pure function of its inputs.

use crate::declaration::{AspectDeclaration, BlockRole};
use nimbus_core::TypeKey;

/// One of the five ordered lists of an [`AspectMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Transforms of the input, before the handler.
    InputFilter,
    /// Side effects before the handler.
    Pre,
    /// Substitutes for faults.
    OnError,
    /// Side effects after the handler.
    Post,
    /// Transforms of the result, after the handler.
    OutputFilter,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 5] = [
        Phase::InputFilter,
        Phase::Pre,
        Phase::OnError,
        Phase::Post,
        Phase::OutputFilter,
    ];

    /// Returns the snake_case name of this phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputFilter => "input_filter",
            Self::Pre => "pre",
            Self::OnError => "on_error",
            Self::Post => "post",
            Self::OutputFilter => "output_filter",
        }
    }

    /// Returns the phases a declaration attaches to, in execution order.
    ///
    /// Empty for neutral and transparent declarations without a position.
    #[must_use]
    pub fn of(declaration: &AspectDeclaration) -> Vec<Phase> {
        let position = declaration.position();
        match declaration.role() {
            BlockRole::ErrorSubstitute => vec![Phase::OnError],
            BlockRole::Neutral => [
                (position.is_before(), Phase::Pre),
                (position.is_after(), Phase::Post),
            ]
            .into_iter()
            .filter_map(|(applies, phase)| applies.then_some(phase))
            .collect(),
            BlockRole::Transparent { .. } => [
                (position.is_before(), Phase::InputFilter),
                (position.is_after(), Phase::OutputFilter),
            ]
            .into_iter()
            .filter_map(|(applies, phase)| applies.then_some(phase))
            .collect(),
        }
    }
}

/// The input and return type of a handler method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// The accepted input type.
    pub input: TypeKey,
    /// The declared return type.
    pub output: TypeKey,
}

impl MethodSignature {
    /// Creates a signature.
    #[must_use]
    pub const fn new(input: TypeKey, output: TypeKey) -> Self {
        Self { input, output }
    }
}

/// The ordered blocks run around one handler method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AspectMatrix {
    /// Transforms of the input, in order.
    pub input_filter: Vec<AspectDeclaration>,
    /// Side effects before the handler, in order.
    pub pre: Vec<AspectDeclaration>,
    /// Fault substitutes, in order.
    pub on_error: Vec<AspectDeclaration>,
    /// Side effects after the handler, in order.
    pub post: Vec<AspectDeclaration>,
    /// Transforms of the result, in order.
    pub output_filter: Vec<AspectDeclaration>,
}

impl AspectMatrix {
    /// Classifies declarations of a single scope, keeping their order.
    ///
    /// Declarations without a phase are dropped; see [`AspectMatrix::unattached`].
    #[must_use]
    pub fn from_declarations(declarations: &[AspectDeclaration]) -> Self {
        let mut matrix = Self::default();
        for declaration in declarations {
            for phase in Phase::of(declaration) {
                matrix.phase_mut(phase).push(declaration.clone());
            }
        }
        matrix
    }

    /// Returns the declarations that attach to no phase.
    pub fn unattached(
        declarations: &[AspectDeclaration],
    ) -> impl Iterator<Item = &AspectDeclaration> {
        declarations
            .iter()
            .filter(|declaration| Phase::of(declaration).is_empty())
    }

    /// Returns the list of one phase.
    #[must_use]
    pub fn phase(&self, phase: Phase) -> &[AspectDeclaration] {
        match phase {
            Phase::InputFilter => &self.input_filter,
            Phase::Pre => &self.pre,
            Phase::OnError => &self.on_error,
            Phase::Post => &self.post,
            Phase::OutputFilter => &self.output_filter,
        }
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut Vec<AspectDeclaration> {
        match phase {
            Phase::InputFilter => &mut self.input_filter,
            Phase::Pre => &mut self.pre,
            Phase::OnError => &mut self.on_error,
            Phase::Post => &mut self.post,
            Phase::OutputFilter => &mut self.output_filter,
        }
    }

    /// Iterates over every attached declaration, phase by phase.
    pub fn iter(&self) -> impl Iterator<Item = (Phase, &AspectDeclaration)> {
        Phase::ALL
            .into_iter()
            .flat_map(move |phase| self.phase(phase).iter().map(move |d| (phase, d)))
    }

    /// Returns the total number of attached declarations.
    #[must_use]
    pub fn len(&self) -> usize {
        Phase::ALL.iter().map(|phase| self.phase(*phase).len()).sum()
    }

    /// Returns `true` if no block is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the first transform whose subject does not match the signature,
    /// together with the type it should have transformed.
    #[must_use]
    pub fn incompatible_transform(
        &self,
        signature: MethodSignature,
    ) -> Option<(&AspectDeclaration, TypeKey)> {
        let inputs = self
            .input_filter
            .iter()
            .filter(|d| d.subject() != Some(signature.input))
            .map(|d| (d, signature.input));
        let outputs = self
            .output_filter
            .iter()
            .filter(|d| d.subject() != Some(signature.output))
            .map(|d| (d, signature.output));
        inputs.chain(outputs).next()
    }
}

/// The global and handler-scope matrices shared by every method of a handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseMatrix {
    /// Global-scope declarations, classified.
    pub global: AspectMatrix,
    /// Handler-scope declarations, classified.
    pub handler: AspectMatrix,
}

impl BaseMatrix {
    /// Classifies the global and handler-scope declarations.
    #[must_use]
    pub fn new(global: &[AspectDeclaration], handler: &[AspectDeclaration]) -> Self {
        Self {
            global: AspectMatrix::from_declarations(global),
            handler: AspectMatrix::from_declarations(handler),
        }
    }
}

fn matching(
    declarations: &[AspectDeclaration],
    subject: TypeKey,
) -> impl Iterator<Item = &AspectDeclaration> {
    declarations
        .iter()
        .filter(move |d| d.subject() == Some(subject))
}

/// Merges a method's own declarations with its handler's base matrix.
///
/// # Example
///
/// ```
/// use nimbus_aspects::matrix::{resolve, BaseMatrix, MethodSignature};
/// use nimbus_core::TypeKey;
///
/// let signature = MethodSignature::new(TypeKey::of::<u32>(), TypeKey::of::<String>());
/// let matrix = resolve(&[], &BaseMatrix::default(), signature);
/// assert!(matrix.is_empty());
/// ```
#[must_use]
pub fn resolve(
    method: &[AspectDeclaration],
    base: &BaseMatrix,
    signature: MethodSignature,
) -> AspectMatrix {
    let own = AspectMatrix::from_declarations(method);
    let (global, handler) = (&base.global, &base.handler);

    AspectMatrix {
        input_filter: own
            .input_filter
            .iter()
            .chain(matching(&global.input_filter, signature.input))
            .cloned()
            .collect(),
        pre: own
            .pre
            .iter()
            .chain(&handler.pre)
            .chain(&global.pre)
            .cloned()
            .collect(),
        on_error: own.on_error.iter().chain(&handler.on_error).cloned().collect(),
        post: own
            .post
            .iter()
            .chain(&handler.post)
            .chain(&global.post)
            .cloned()
            .collect(),
        output_filter: own
            .output_filter
            .iter()
            .chain(matching(&handler.output_filter, signature.output))
            .chain(matching(&global.output_filter, signature.output))
            .cloned()
            .collect(),
    }
}
