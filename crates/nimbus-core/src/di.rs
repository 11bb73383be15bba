//! Instance resolution and the bundled dependency injection container.
//!
//! The dispatch runtime never constructs handlers or aspect blocks itself: it
//! asks an [`InstanceProvider`] for them by [`TypeKey`]. This module defines that
//! contract and ships one in-process implementation of it.
//!
//! Services are registered on a [`ServiceCollection`] at startup, each with a
//! [`Lifetime`] and a factory. Building the collection produces a [`Container`],
//! from which [`Scope`]s are created:
//!
//! - `Singleton` services are built once and cached by the container.
//! - `Scoped` services are built once per scope. The root scope refuses them.
//! - `Transient` services are built on every resolution.
//!
//! # Example
//!
//! ```rust
//! use nimbus_core::di::{Injectable, Scope, ServiceCollection};
//! use nimbus_core::{InstanceProviderExt, Lifetime, ResolveError};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct Repository {
//!     db: Arc<Database>,
//! }
//!
//! impl Injectable for Repository {
//!     fn inject(scope: &Scope) -> Result<Self, ResolveError> {
//!         Ok(Self { db: scope.get_required()? })
//!     }
//! }
//!
//! let mut services = ServiceCollection::new();
//! services.add_instance(Arc::new(Database { url: "postgres://localhost/db".into() }));
//! services.add_injectable::<Repository>(Lifetime::Scoped);
//!
//! let container = services.build();
//! let scope = container.create_scope();
//! let repo: Arc<Repository> = scope.get_required().unwrap();
//! assert_eq!(repo.db.url, "postgres://localhost/db");
//! ```

use crate::error::ResolveError;
use crate::input::TypeKey;
use crate::lifetime::Lifetime;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// A shared, type-erased service instance.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Resolves service instances by type.
///
/// Implementations decide how long instances live; the dispatch runtime only
/// declares the lifetime it expects at registration time.
pub trait InstanceProvider: Send + Sync {
    /// Resolves an instance of `service`.
    ///
    /// Returns `Ok(None)` if the service is not registered.
    fn try_resolve(&self, service: TypeKey) -> Result<Option<Instance>, ResolveError>;

    /// Resolves an instance of `service`, failing if it is not registered.
    fn resolve_required(&self, service: TypeKey) -> Result<Instance, ResolveError> {
        self.try_resolve(service)?
            .ok_or(ResolveError::NotRegistered { service })
    }
}

/// Typed helpers over [`InstanceProvider`].
pub trait InstanceProviderExt: InstanceProvider {
    /// Resolves a `T`, returning `Ok(None)` if it is not registered.
    fn get<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, ResolveError> {
        self.try_resolve(TypeKey::of::<T>())?
            .map(downcast_instance::<T>)
            .transpose()
    }

    /// Resolves a `T`, failing if it is not registered.
    fn get_required<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveError> {
        downcast_instance(self.resolve_required(TypeKey::of::<T>())?)
    }
}

impl<P: InstanceProvider + ?Sized> InstanceProviderExt for P {}

/// Downcasts a resolved instance to `T`.
pub fn downcast_instance<T: Send + Sync + 'static>(
    instance: Instance,
) -> Result<Arc<T>, ResolveError> {
    instance
        .downcast::<T>()
        .map_err(|_| ResolveError::TypeMismatch {
            service: TypeKey::of::<T>(),
        })
}

/// A type that can construct itself from a [`Scope`].
///
/// Handlers implement this so the container can build them with their
/// dependencies.
pub trait Injectable: Send + Sync + Sized + 'static {
    /// Builds an instance, resolving dependencies from `scope`.
    fn inject(scope: &Scope) -> Result<Self, ResolveError>;
}

/// Implements [`Injectable`] through [`Default`] for types without dependencies.
///
/// ```rust
/// #[derive(Default)]
/// struct AuditLog;
///
/// nimbus_core::inject_default!(AuditLog);
/// ```
#[macro_export]
macro_rules! inject_default {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::di::Injectable for $ty {
                fn inject(
                    _: &$crate::di::Scope,
                ) -> ::std::result::Result<Self, $crate::ResolveError> {
                    ::std::result::Result::Ok(<$ty as ::std::default::Default>::default())
                }
            }
        )+
    };
}

type Factory = Arc<dyn Fn(&Scope) -> Result<Instance, ResolveError> + Send + Sync>;

/// One registration in a [`ServiceCollection`].
#[derive(Clone)]
pub struct ServiceDescriptor {
    service: TypeKey,
    lifetime: Lifetime,
    factory: Factory,
}

impl ServiceDescriptor {
    /// Creates a descriptor for `T` built by `factory`.
    pub fn new<T, F>(lifetime: Lifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        Self {
            service: TypeKey::of::<T>(),
            lifetime,
            factory: Arc::new(move |scope| factory(scope).map(|value| Arc::new(value) as Instance)),
        }
    }

    /// Creates a descriptor for `T` whose factory returns an already shared instance.
    pub fn shared<T, F>(lifetime: Lifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<Arc<T>, ResolveError> + Send + Sync + 'static,
    {
        Self {
            service: TypeKey::of::<T>(),
            lifetime,
            factory: Arc::new(move |scope| factory(scope).map(|value| value as Instance)),
        }
    }

    /// Returns the registered service type.
    #[must_use]
    pub const fn service(&self) -> TypeKey {
        self.service
    }

    /// Returns the registered lifetime.
    #[must_use]
    pub const fn lifetime(&self) -> Lifetime {
        self.lifetime
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("service", &self.service)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

/// An ordered, appendable list of service registrations.
///
/// When a service is registered more than once, the last registration wins.
#[derive(Clone, Default)]
pub struct ServiceCollection {
    descriptors: Vec<ServiceDescriptor>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a descriptor.
    pub fn add(&mut self, descriptor: ServiceDescriptor) -> &mut Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Registers a singleton built by `factory` on first use.
    pub fn add_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Singleton, factory))
    }

    /// Registers a service built once per scope.
    pub fn add_scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Scoped, factory))
    }

    /// Registers a service built on every resolution.
    pub fn add_transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.add(ServiceDescriptor::new(Lifetime::Transient, factory))
    }

    /// Registers an existing instance as a singleton.
    pub fn add_instance<T: Send + Sync + 'static>(&mut self, instance: Arc<T>) -> &mut Self {
        self.add(ServiceDescriptor::shared(Lifetime::Singleton, move |_| {
            Ok(Arc::clone(&instance))
        }))
    }

    /// Registers an [`Injectable`] type with the given lifetime.
    pub fn add_injectable<T: Injectable>(&mut self, lifetime: Lifetime) -> &mut Self {
        self.add(ServiceDescriptor::new(lifetime, T::inject))
    }

    /// Returns `true` if `service` is registered.
    #[must_use]
    pub fn contains(&self, service: TypeKey) -> bool {
        self.descriptors.iter().any(|d| d.service == service)
    }

    /// Returns `true` if `T` is registered.
    #[must_use]
    pub fn contains_type<T: ?Sized + 'static>(&self) -> bool {
        self.contains(TypeKey::of::<T>())
    }

    /// Returns the effective lifetime of `service`, if registered.
    #[must_use]
    pub fn lifetime_of(&self, service: TypeKey) -> Option<Lifetime> {
        self.descriptors
            .iter()
            .rev()
            .find(|d| d.service == service)
            .map(ServiceDescriptor::lifetime)
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Iterates over the registrations in order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.descriptors.iter()
    }

    /// Builds a container from the registrations.
    #[must_use]
    pub fn build(self) -> Container {
        let mut services = HashMap::with_capacity(self.descriptors.len());
        for descriptor in self.descriptors {
            services.insert(descriptor.service, descriptor);
        }
        Container {
            inner: Arc::new(ContainerInner {
                services,
                singletons: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl fmt::Debug for ServiceCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCollection")
            .field("service_count", &self.descriptors.len())
            .finish()
    }
}

struct ContainerInner {
    services: HashMap<TypeKey, ServiceDescriptor>,
    singletons: Mutex<HashMap<TypeKey, Instance>>,
}

type ScopeCache = Mutex<HashMap<TypeKey, Instance>>;

/// A built service registry with its singleton cache.
///
/// The container is cheap to clone and can be shared across threads.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Returns the root scope, which cannot resolve scoped services.
    #[must_use]
    pub fn root_scope(&self) -> Scope {
        Scope {
            container: Arc::clone(&self.inner),
            cache: None,
        }
    }

    /// Creates a new scope with its own cache of scoped instances.
    #[must_use]
    pub fn create_scope(&self) -> Scope {
        Scope {
            container: Arc::clone(&self.inner),
            cache: Some(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// Returns `true` if `service` is registered.
    #[must_use]
    pub fn contains(&self, service: TypeKey) -> bool {
        self.inner.services.contains_key(&service)
    }

    /// Returns the registered lifetime of `service`.
    #[must_use]
    pub fn lifetime_of(&self, service: TypeKey) -> Option<Lifetime> {
        self.inner.services.get(&service).map(ServiceDescriptor::lifetime)
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.services.len()
    }

    /// Returns `true` if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.services.is_empty()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("service_count", &self.inner.services.len())
            .field("singleton_count", &self.inner.singletons.lock().len())
            .finish()
    }
}

/// A resolution boundary, typically one logical request.
///
/// Cloning a scope shares its cache. Locks are never held while a factory runs,
/// so factories may resolve further services from the scope they are given.
#[derive(Clone)]
pub struct Scope {
    container: Arc<ContainerInner>,
    cache: Option<Arc<ScopeCache>>,
}

impl Scope {
    /// Returns `true` for the root scope.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.cache.is_none()
    }

    /// Returns a handle that resolves through this scope without keeping it alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakScope {
        WeakScope {
            container: Arc::clone(&self.container),
            cache: self.cache.as_ref().map(Arc::downgrade),
        }
    }

    fn root(&self) -> Self {
        Self {
            container: Arc::clone(&self.container),
            cache: None,
        }
    }

    fn resolve_singleton(
        &self,
        service: TypeKey,
        factory: &Factory,
    ) -> Result<Instance, ResolveError> {
        if let Some(instance) = self.container.singletons.lock().get(&service) {
            return Ok(Arc::clone(instance));
        }
        // Singletons only see the root scope, so they can never capture a scoped instance.
        let instance = factory(&self.root())?;
        let mut singletons = self.container.singletons.lock();
        Ok(Arc::clone(singletons.entry(service).or_insert(instance)))
    }

    fn resolve_scoped(&self, service: TypeKey, factory: &Factory) -> Result<Instance, ResolveError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(ResolveError::ScopeRequired { service })?;
        if let Some(instance) = cache.lock().get(&service) {
            return Ok(Arc::clone(instance));
        }
        let instance = factory(self)?;
        let mut cached = cache.lock();
        Ok(Arc::clone(cached.entry(service).or_insert(instance)))
    }
}

impl InstanceProvider for Scope {
    fn try_resolve(&self, service: TypeKey) -> Result<Option<Instance>, ResolveError> {
        let Some(descriptor) = self.container.services.get(&service) else {
            return Ok(None);
        };
        let instance = match descriptor.lifetime {
            Lifetime::Singleton => self.resolve_singleton(service, &descriptor.factory)?,
            Lifetime::Scoped => self.resolve_scoped(service, &descriptor.factory)?,
            Lifetime::Transient => (descriptor.factory)(self)?,
        };
        Ok(Some(instance))
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("root", &self.is_root())
            .field(
                "scoped_count",
                &self.cache.as_ref().map_or(0, |cache| cache.lock().len()),
            )
            .finish()
    }
}

/// A non-owning handle to a [`Scope`].
///
/// Services cached inside a scope use it to refer back to that scope without
/// keeping it alive.
#[derive(Clone)]
pub struct WeakScope {
    container: Arc<ContainerInner>,
    cache: Option<Weak<ScopeCache>>,
}

impl WeakScope {
    /// Returns the scope if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Scope> {
        let cache = match &self.cache {
            Some(weak) => Some(weak.upgrade()?),
            None => None,
        };
        Some(Scope {
            container: Arc::clone(&self.container),
            cache,
        })
    }
}

impl InstanceProvider for WeakScope {
    fn try_resolve(&self, service: TypeKey) -> Result<Option<Instance>, ResolveError> {
        self.upgrade()
            .ok_or(ResolveError::ScopeDisposed { service })?
            .try_resolve(service)
    }
}

impl fmt::Debug for WeakScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakScope")
            .field("root", &self.cache.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestService {
        value: String,
    }

    impl TestService {
        fn new(value: &str) -> Self {
            Self {
                value: value.to_string(),
            }
        }
    }

    struct Counter(AtomicUsize);

    #[derive(Debug)]
    struct Greeter {
        service: Arc<TestService>,
    }

    impl Injectable for Greeter {
        fn inject(scope: &Scope) -> Result<Self, ResolveError> {
            Ok(Self {
                service: scope.get_required()?,
            })
        }
    }

    fn counting(lifetime: Lifetime) -> (ServiceCollection, Arc<Counter>) {
        let built = Arc::new(Counter(AtomicUsize::new(0)));
        let counter = Arc::clone(&built);
        let mut services = ServiceCollection::new();
        services.add(ServiceDescriptor::new(lifetime, move |_| {
            let n = counter.0.fetch_add(1, Ordering::SeqCst);
            Ok(TestService::new(&n.to_string()))
        }));
        (services, built)
    }

    #[test]
    fn test_collection_new() {
        let services = ServiceCollection::new();
        assert!(services.is_empty());
        assert_eq!(services.len(), 0);
        assert!(services.build().is_empty());
    }

    #[test]
    fn test_register_and_resolve_instance() {
        let mut services = ServiceCollection::new();
        services.add_instance(Arc::new(TestService::new("hello")));
        let scope = services.build().root_scope();

        let service: Option<Arc<TestService>> = scope.get().unwrap();
        assert_eq!(service.unwrap().value, "hello");
    }

    #[test]
    fn test_resolve_missing() {
        let scope = ServiceCollection::new().build().create_scope();
        let service: Option<Arc<TestService>> = scope.get().unwrap();
        assert!(service.is_none());
    }

    #[test]
    fn test_resolve_required_missing() {
        let scope = ServiceCollection::new().build().create_scope();
        let err = scope.get_required::<TestService>().unwrap_err();
        assert!(err.to_string().contains("TestService"));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_contains_and_lifetime_of() {
        let mut services = ServiceCollection::new();
        assert!(!services.contains_type::<TestService>());

        services.add_transient(|_| Ok(TestService::new("a")));
        services.add_scoped(|_| Ok(TestService::new("b")));
        assert!(services.contains_type::<TestService>());
        assert_eq!(
            services.lifetime_of(TypeKey::of::<TestService>()),
            Some(Lifetime::Scoped)
        );

        let container = services.build();
        assert_eq!(container.len(), 1);
        assert_eq!(
            container.lifetime_of(TypeKey::of::<TestService>()),
            Some(Lifetime::Scoped)
        );
    }

    #[test]
    fn test_later_registration_wins() {
        let mut services = ServiceCollection::new();
        services.add_instance(Arc::new(TestService::new("first")));
        services.add_instance(Arc::new(TestService::new("second")));
        let scope = services.build().root_scope();
        assert_eq!(scope.get_required::<TestService>().unwrap().value, "second");
    }

    #[test]
    fn test_singleton_shared_across_scopes() {
        let (services, built) = counting(Lifetime::Singleton);
        let container = services.build();

        let a = container.create_scope().get_required::<TestService>().unwrap();
        let b = container.create_scope().get_required::<TestService>().unwrap();
        let c = container.root_scope().get_required::<TestService>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(built.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scoped_cached_per_scope() {
        let (services, built) = counting(Lifetime::Scoped);
        let container = services.build();

        let scope = container.create_scope();
        let a = scope.get_required::<TestService>().unwrap();
        let b = scope.clone().get_required::<TestService>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = container.create_scope().get_required::<TestService>().unwrap();
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(built.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_root_scope_refuses_scoped() {
        let (services, _) = counting(Lifetime::Scoped);
        let root = services.build().root_scope();
        assert!(root.is_root());

        let err = root.get_required::<TestService>().unwrap_err();
        assert!(matches!(err, ResolveError::ScopeRequired { .. }));
    }

    #[test]
    fn test_transient_built_every_time() {
        let (services, built) = counting(Lifetime::Transient);
        let scope = services.build().create_scope();

        let a = scope.get_required::<TestService>().unwrap();
        let b = scope.get_required::<TestService>().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(built.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_injectable_resolves_dependencies() {
        let mut services = ServiceCollection::new();
        services.add_instance(Arc::new(TestService::new("dep")));
        services.add_injectable::<Greeter>(Lifetime::Transient);
        let scope = services.build().create_scope();

        let greeter = scope.get_required::<Greeter>().unwrap();
        assert_eq!(greeter.service.value, "dep");
    }

    #[test]
    fn test_singleton_cannot_capture_scoped_dependency() {
        let mut services = ServiceCollection::new();
        services.add_scoped(|_| Ok(TestService::new("scoped")));
        services.add_injectable::<Greeter>(Lifetime::Singleton);
        let scope = services.build().create_scope();

        let err = scope.get_required::<Greeter>().unwrap_err();
        assert!(matches!(err, ResolveError::ScopeRequired { .. }));
    }

    #[test]
    fn test_factory_errors_propagate() {
        let mut services = ServiceCollection::new();
        services.add_transient::<TestService, _>(|_| {
            Err(ResolveError::construction::<TestService>(anyhow::anyhow!(
                "unavailable"
            )))
        });
        let scope = services.build().create_scope();

        let err = scope.get_required::<TestService>().unwrap_err();
        assert!(matches!(err, ResolveError::Construction { .. }));
    }

    #[test]
    fn test_weak_scope_resolves_while_alive() {
        let (services, _) = counting(Lifetime::Scoped);
        let scope = services.build().create_scope();
        let weak = scope.downgrade();

        let strong = scope.get_required::<TestService>().unwrap();
        let via_weak = weak.get_required::<TestService>().unwrap();
        assert!(Arc::ptr_eq(&strong, &via_weak));

        drop(scope);
        let err = weak.get_required::<TestService>().unwrap_err();
        assert!(matches!(err, ResolveError::ScopeDisposed { .. }));
    }

    #[test]
    fn test_concurrent_singleton_resolution() {
        let (services, _) = counting(Lifetime::Singleton);
        let container = services.build();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scope = container.create_scope();
                std::thread::spawn(move || scope.get_required::<TestService>().unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_debug() {
        let mut services = ServiceCollection::new();
        services.add_instance(Arc::new(TestService::new("debug")));
        let container = services.build();

        let debug = format!("{:?}", container);
        assert!(debug.contains("Container"));
        assert!(debug.contains("service_count"));
        assert!(format!("{:?}", container.create_scope()).contains("Scope"));
    }
}
