//! Service container.
//!
//! The application context lives for the whole process. Services are bound
//! by name to factories, shared instances are cached after first resolution,
//! and hooks run synchronously on the resolution path:
//!
//! ```text
//! make(name)
//!     → cached instance? return it
//!     → factory(app)
//!     → extenders, in registration order
//!     → cache if shared
//!     → after-resolving callbacks
//!
//! instance(name, value)
//!     → replace value
//!     → rebinding callbacks (only if the name was bound before)
//! ```
//!
//! Binding a name again drops its cached instance, which is what makes
//! re-registering a provider discard the state it accumulated.

use std::any::{type_name, Any};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub mod provider;

pub use provider::ServiceProvider;

/// A resolved service.
pub type Instance = Arc<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn(&Application) -> Result<Instance, ContainerError> + Send + Sync>;
type Extender = Arc<dyn Fn(Instance, &Application) -> Result<Instance, ContainerError> + Send + Sync>;
type Callback = Arc<dyn Fn(&Instance, &Application) -> Result<(), ContainerError> + Send + Sync>;
type TerminatingCallback = Arc<dyn Fn(&Application) -> Result<(), ContainerError> + Send + Sync>;

/// Container error.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("service `{0}` is not bound")]
    Unbound(String),

    #[error("service `{name}` is not a `{expected}`")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("service `{name}` could not be built: {message}")]
    Build { name: String, message: String },
}

impl ContainerError {
    /// Wrap a failure raised while building `name`.
    pub fn build(name: &str, err: impl std::fmt::Display) -> Self {
        ContainerError::Build {
            name: name.to_string(),
            message: err.to_string(),
        }
    }
}

/// Lock a mutex, recovering the data if a panicking request poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Binding {
    factory: Factory,
    shared: bool,
}

#[derive(Default)]
struct Registry {
    bindings: HashMap<String, Binding>,
    instances: HashMap<String, Instance>,
    extenders: HashMap<String, Vec<Extender>>,
    after_resolving: HashMap<String, Vec<Callback>>,
    rebinding: HashMap<String, Vec<Callback>>,
    resolved: HashSet<String>,
    terminating: Vec<TerminatingCallback>,
}

/// The long-lived application context.
pub struct Application {
    registry: Mutex<Registry>,
    providers: Mutex<Vec<Arc<dyn ServiceProvider>>>,
    booted: AtomicBool,
    this: Weak<Application>,
}

impl Application {
    /// Create an empty application context.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry: Mutex::new(Registry::default()),
            providers: Mutex::new(Vec::new()),
            booted: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Weak handle to this application, for services that must not keep it alive.
    pub fn downgrade(&self) -> Weak<Application> {
        self.this.clone()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        lock(&self.registry)
    }

    fn bind_factory(&self, name: &str, factory: Factory, shared: bool) {
        let mut registry = self.registry();
        registry.instances.remove(name);
        registry.resolved.remove(name);
        registry
            .bindings
            .insert(name.to_string(), Binding { factory, shared });
    }

    /// Bind a factory that builds a new value on every resolution.
    pub fn bind<T, F>(&self, name: &str, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Application) -> Result<Arc<T>, ContainerError> + Send + Sync + 'static,
    {
        self.bind_factory(name, Arc::new(move |app| factory(app).map(|v| v as Instance)), false);
    }

    /// Bind a factory whose value is built once and then cached.
    pub fn singleton<T, F>(&self, name: &str, factory: F)
    where
        T: Any + Send + Sync,
        F: Fn(&Application) -> Result<Arc<T>, ContainerError> + Send + Sync + 'static,
    {
        self.bind_factory(name, Arc::new(move |app| factory(app).map(|v| v as Instance)), true);
    }

    /// Store a ready-made value, firing rebinding callbacks if the name was
    /// already bound.
    pub fn instance<T>(&self, name: &str, value: Arc<T>) -> Result<(), ContainerError>
    where
        T: Any + Send + Sync,
    {
        let value: Instance = value;
        let callbacks = {
            let mut registry = self.registry();
            let rebound = registry.instances.contains_key(name) || registry.bindings.contains_key(name);
            registry.instances.insert(name.to_string(), Arc::clone(&value));
            registry.resolved.insert(name.to_string());
            if rebound {
                registry.rebinding.get(name).cloned().unwrap_or_default()
            } else {
                Vec::new()
            }
        };

        for callback in &callbacks {
            callback(&value, self)?;
        }
        Ok(())
    }

    /// Drop a cached instance so the next resolution builds a fresh one.
    pub fn forget_instance(&self, name: &str) {
        self.registry().instances.remove(name);
    }

    /// Whether anything is bound under `name`.
    pub fn bound(&self, name: &str) -> bool {
        let registry = self.registry();
        registry.bindings.contains_key(name) || registry.instances.contains_key(name)
    }

    /// Whether `name` has been resolved since it was last bound.
    pub fn resolved(&self, name: &str) -> bool {
        self.registry().resolved.contains(name)
    }

    /// Resolve a service by name.
    pub fn make(&self, name: &str) -> Result<Instance, ContainerError> {
        let (factory, shared, extenders) = {
            let registry = self.registry();
            if let Some(instance) = registry.instances.get(name) {
                return Ok(Arc::clone(instance));
            }
            let binding = registry
                .bindings
                .get(name)
                .ok_or_else(|| ContainerError::Unbound(name.to_string()))?;
            (
                Arc::clone(&binding.factory),
                binding.shared,
                registry.extenders.get(name).cloned().unwrap_or_default(),
            )
        };

        // The registry lock is released here: factories resolve their own
        // dependencies through `make`.
        let mut instance = factory(self)?;
        for extender in &extenders {
            instance = extender(instance, self)?;
        }

        let callbacks = {
            let mut registry = self.registry();
            if shared {
                registry.instances.insert(name.to_string(), Arc::clone(&instance));
            }
            registry.resolved.insert(name.to_string());
            registry.after_resolving.get(name).cloned().unwrap_or_default()
        };
        for callback in &callbacks {
            callback(&instance, self)?;
        }

        tracing::trace!(service = name, shared, "Service resolved");
        Ok(instance)
    }

    /// Resolve a service and downcast it to its concrete type.
    pub fn make_as<T>(&self, name: &str) -> Result<Arc<T>, ContainerError>
    where
        T: Any + Send + Sync,
    {
        self.make(name)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Wrap every resolution of `name`. Applies immediately to a cached
    /// instance as well.
    pub fn extend<F>(&self, name: &str, extender: F) -> Result<(), ContainerError>
    where
        F: Fn(Instance, &Application) -> Result<Instance, ContainerError> + Send + Sync + 'static,
    {
        let extender: Extender = Arc::new(extender);
        let cached = {
            let mut registry = self.registry();
            registry
                .extenders
                .entry(name.to_string())
                .or_default()
                .push(Arc::clone(&extender));
            registry.instances.remove(name)
        };

        if let Some(instance) = cached {
            let extended = extender(instance, self)?;
            self.registry().instances.insert(name.to_string(), extended);
        }
        Ok(())
    }

    /// Run `callback` every time `name` is built.
    pub fn after_resolving<F>(&self, name: &str, callback: F)
    where
        F: Fn(&Instance, &Application) -> Result<(), ContainerError> + Send + Sync + 'static,
    {
        self.registry()
            .after_resolving
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Run `callback` every time a new value is stored under `name`.
    pub fn rebinding<F>(&self, name: &str, callback: F)
    where
        F: Fn(&Instance, &Application) -> Result<(), ContainerError> + Send + Sync + 'static,
    {
        self.registry()
            .rebinding
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Lazy handle that resolves `name` on each read.
    pub fn accessor<T>(&self, name: &str) -> Accessor<T>
    where
        T: Any + Send + Sync,
    {
        Accessor {
            app: self.downgrade(),
            name: name.to_string(),
            _marker: PhantomData,
        }
    }

    /// Register a provider. An already registered provider is left alone
    /// unless `force` is set, in which case it registers its bindings again.
    pub fn register(
        &self,
        provider: Arc<dyn ServiceProvider>,
        force: bool,
    ) -> Result<Arc<dyn ServiceProvider>, ContainerError> {
        if !force {
            if let Some(existing) = self.get_provider(provider.name()) {
                return Ok(existing);
            }
        }

        provider.register(self)?;
        {
            let mut providers = lock(&self.providers);
            providers.retain(|p| p.name() != provider.name());
            providers.push(Arc::clone(&provider));
        }
        if self.is_booted() {
            provider.boot(self)?;
        }

        tracing::trace!(provider = provider.name(), force, "Provider registered");
        Ok(provider)
    }

    /// Look up a registered provider by name.
    pub fn get_provider(&self, name: &str) -> Option<Arc<dyn ServiceProvider>> {
        lock(&self.providers)
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Names of registered providers, in registration order.
    pub fn provider_names(&self) -> Vec<&'static str> {
        lock(&self.providers).iter().map(|p| p.name()).collect()
    }

    /// Boot every registered provider. Providers registered later boot on
    /// registration.
    pub fn boot(&self) -> Result<(), ContainerError> {
        if self.booted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let providers = lock(&self.providers).clone();
        for provider in providers {
            provider.boot(self)?;
        }
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    /// Run `callback` whenever the kernel finishes a request.
    pub fn terminating<F>(&self, callback: F)
    where
        F: Fn(&Application) -> Result<(), ContainerError> + Send + Sync + 'static,
    {
        self.registry().terminating.push(Arc::new(callback));
    }

    /// Run the terminating callbacks.
    pub fn terminate(&self) -> Result<(), ContainerError> {
        let callbacks = self.registry().terminating.clone();
        for callback in &callbacks {
            callback(self)?;
        }
        Ok(())
    }
}

/// Reads a service through a weak application handle.
///
/// Holding an accessor never pins the resolved value: every `get` resolves
/// the name again, so the caller always sees the current binding.
pub struct Accessor<T> {
    app: Weak<Application>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            app: self.app.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor").field("name", &self.name).finish()
    }
}

impl<T: Any + Send + Sync> Accessor<T> {
    /// Current value, if the application is alive and the name resolves.
    pub fn get(&self) -> Option<Arc<T>> {
        self.app.upgrade()?.make_as::<T>(&self.name).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(AtomicUsize);

    #[test]
    fn singletons_are_cached_and_bindings_are_not() {
        let app = Application::new();
        app.singleton("shared", |_| Ok(Arc::new(Counter(AtomicUsize::new(0)))));
        app.bind("fresh", |_| Ok(Arc::new(Counter(AtomicUsize::new(0)))));

        let a = app.make_as::<Counter>("shared").unwrap();
        let b = app.make_as::<Counter>("shared").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = app.make_as::<Counter>("fresh").unwrap();
        let d = app.make_as::<Counter>("fresh").unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
    }

    #[test]
    fn rebinding_drops_the_cached_instance() {
        let app = Application::new();
        app.singleton("svc", |_| Ok(Arc::new(Counter(AtomicUsize::new(0)))));
        let first = app.make_as::<Counter>("svc").unwrap();
        first.0.store(5, Ordering::SeqCst);

        app.singleton("svc", |_| Ok(Arc::new(Counter(AtomicUsize::new(0)))));
        let second = app.make_as::<Counter>("svc").unwrap();
        assert_eq!(second.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unbound_and_mistyped_lookups_fail() {
        let app = Application::new();
        assert!(matches!(app.make("missing"), Err(ContainerError::Unbound(_))));

        app.instance("number", Arc::new(7u32)).unwrap();
        assert!(matches!(
            app.make_as::<String>("number"),
            Err(ContainerError::TypeMismatch { .. })
        ));
        assert_eq!(*app.make_as::<u32>("number").unwrap(), 7);
    }

    #[test]
    fn factories_can_resolve_dependencies() {
        let app = Application::new();
        app.instance("base", Arc::new(20u32)).unwrap();
        app.singleton("derived", |app| {
            let base = app.make_as::<u32>("base")?;
            Ok(Arc::new(*base + 1))
        });
        assert_eq!(*app.make_as::<u32>("derived").unwrap(), 21);
    }

    #[test]
    fn extenders_wrap_future_and_cached_instances() {
        let app = Application::new();
        app.singleton("value", |_| Ok(Arc::new(1u32)));
        assert_eq!(*app.make_as::<u32>("value").unwrap(), 1);

        app.extend("value", |instance, _| {
            let value = instance
                .downcast::<u32>()
                .map_err(|_| ContainerError::build("value", "not a u32"))?;
            Ok(Arc::new(*value * 10) as Instance)
        })
        .unwrap();
        assert_eq!(*app.make_as::<u32>("value").unwrap(), 10);

        app.singleton("value", |_| Ok(Arc::new(2u32)));
        assert_eq!(*app.make_as::<u32>("value").unwrap(), 20);
    }

    #[test]
    fn after_resolving_runs_once_per_build() {
        let app = Application::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        app.after_resolving("svc", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        app.singleton("svc", |_| Ok(Arc::new(0u8)));

        app.make("svc").unwrap();
        app.make("svc").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        app.singleton("svc", |_| Ok(Arc::new(0u8)));
        app.make("svc").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rebinding_fires_only_on_replacement() {
        let app = Application::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        app.rebinding("request", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        app.instance("request", Arc::new(1u8)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        app.instance("request", Arc::new(2u8)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn accessor_reads_current_binding_without_pinning_it() {
        let app = Application::new();
        let accessor = app.accessor::<u8>("request");
        assert!(accessor.get().is_none());

        app.instance("request", Arc::new(1u8)).unwrap();
        assert_eq!(*accessor.get().unwrap(), 1);
        app.instance("request", Arc::new(2u8)).unwrap();
        assert_eq!(*accessor.get().unwrap(), 2);

        drop(app);
        assert!(accessor.get().is_none());
    }

    #[test]
    fn terminating_callbacks_run_in_order() {
        let app = Application::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            app.terminating(move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        app.terminate().unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
