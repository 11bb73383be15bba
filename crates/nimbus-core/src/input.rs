//! Runtime type identity and type-erased payloads.
//!
//! Dispatch is keyed by the runtime type of the input value. [`TypeKey`]
//! captures that identity together with a readable name for diagnostics, and
//! [`Value`] carries payloads through compiled launchers without knowing their
//! concrete type.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime identity of a Rust type.
///
/// Equality and hashing only consider the [`TypeId`]; the name is kept for
/// error messages and logs.
///
/// # Example
///
/// ```
/// use nimbus_core::TypeKey;
///
/// let key = TypeKey::of::<String>();
/// assert_eq!(key, TypeKey::of::<String>());
/// assert_ne!(key, TypeKey::of::<i32>());
/// assert_eq!(key.short_name(), "String");
/// ```
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Returns the key of `T`.
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the underlying [`TypeId`].
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Returns the fully qualified type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the type name without its module path.
    ///
    /// Generic arguments are kept as written.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        let head = self.name.split('<').next().unwrap_or(self.name);
        match head.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }

    /// Returns `true` if this is the key of `()`.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.id == TypeId::of::<()>()
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A payload that selects a handler method.
///
/// `Output` is the result type callers receive from
/// [`Bus::dispatch`](https://docs.rs/nimbus-dispatch). Use `()` for inputs whose
/// handler result is not interesting to the caller.
///
/// # Example
///
/// ```
/// use nimbus_core::Input;
///
/// struct GetBalance {
///     account: u64,
/// }
///
/// impl Input for GetBalance {
///     type Output = i64;
/// }
/// ```
pub trait Input: Send + 'static {
    /// The result type paired with this input.
    type Output: Send + 'static;
}

/// An input whose concrete type is only known at runtime.
pub trait AnyInput: Send + 'static {
    /// Returns the key of the concrete input type.
    fn input_key(&self) -> TypeKey;

    /// Converts the input into an erased [`Value`].
    fn into_value(self: Box<Self>) -> Value;
}

impl<I: Input> AnyInput for I {
    fn input_key(&self) -> TypeKey {
        TypeKey::of::<I>()
    }

    fn into_value(self: Box<Self>) -> Value {
        Value::new(*self)
    }
}

/// A type-erased, owned payload tagged with its [`TypeKey`].
pub struct Value {
    key: TypeKey,
    inner: Box<dyn Any + Send>,
}

impl Value {
    /// Wraps a value.
    #[must_use]
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self {
            key: TypeKey::of::<T>(),
            inner: Box::new(value),
        }
    }

    /// Returns the key of the wrapped value's type.
    #[must_use]
    pub const fn key(&self) -> TypeKey {
        self.key
    }

    /// Returns `true` if the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Borrows the wrapped value as a `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Unwraps the value as a `T`, handing it back untouched on a type mismatch.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        let key = self.key;
        match self.inner.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(inner) => Err(Self { key, inner }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value").field("type", &self.key).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Ping;

    impl Input for Ping {
        type Output = ();
    }

    mod nested {
        pub struct Deep;
    }

    #[test]
    fn test_type_key_equality_uses_type_id() {
        let mut set = HashSet::new();
        set.insert(TypeKey::of::<Ping>());
        set.insert(TypeKey::of::<Ping>());
        set.insert(TypeKey::of::<i32>());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_short_name() {
        assert_eq!(TypeKey::of::<nested::Deep>().short_name(), "Deep");
        assert_eq!(TypeKey::of::<i32>().short_name(), "i32");
        assert!(TypeKey::of::<Vec<String>>().short_name().starts_with("Vec<"));
    }

    #[test]
    fn test_is_unit() {
        assert!(TypeKey::of::<()>().is_unit());
        assert!(!TypeKey::of::<Ping>().is_unit());
    }

    #[test]
    fn test_value_downcast() {
        let value = Value::new(41_i32);
        assert_eq!(value.key(), TypeKey::of::<i32>());
        assert!(value.is::<i32>());
        assert_eq!(value.downcast_ref::<i32>(), Some(&41));
        assert_eq!(value.downcast::<i32>().ok(), Some(41));
    }

    #[test]
    fn test_value_downcast_mismatch_returns_value() {
        let value = Value::new("text".to_string());
        let back = value.downcast::<i32>().unwrap_err();
        assert_eq!(back.key(), TypeKey::of::<String>());
        assert_eq!(back.downcast::<String>().ok().as_deref(), Some("text"));
    }

    #[test]
    fn test_any_input_erasure() {
        let boxed: Box<dyn AnyInput> = Box::new(Ping);
        assert_eq!(boxed.input_key(), TypeKey::of::<Ping>());
        let value = boxed.into_value();
        assert!(value.is::<Ping>());
    }
}
