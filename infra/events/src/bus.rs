use crate::binding::Binding;
use crate::error::{EventBusError, Result};
use crate::registry::EventRegistry;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Marker trait for types that can be raised on an [`EventBus`].
///
/// Any type that is `Send + Sync + 'static` automatically implements this trait.
pub trait Event: Any + Send + Sync + 'static {}
impl<T: Any + Send + Sync + 'static> Event for T {}

type Reset = Arc<dyn Fn() + Send + Sync>;
type Preload = fn(&EventBus) -> Result<()>;

struct RegistryEntry {
    event_type: &'static str,
    registry: Box<dyn Any + Send + Sync>,
    reset: Reset,
}

impl RegistryEntry {
    fn new<T: Event>(registry: EventRegistry<T>) -> Self {
        let handle = registry.clone();
        Self {
            event_type: type_name::<T>(),
            registry: Box::new(registry),
            reset: Arc::new(move || handle.clear()),
        }
    }

    fn downcast<T: Event>(&self) -> Result<EventRegistry<T>> {
        self.registry.downcast_ref::<EventRegistry<T>>().cloned().ok_or_else(|| {
            EventBusError::TypeMismatch {
                message: type_name::<T>().into(),
                context: Some(format!("Registry is typed for {}", self.event_type).into()),
            }
        })
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct BusInner {
    name: Option<Cow<'static, str>>,
    registries: RwLock<FxHashMap<TypeId, RegistryEntry>>,
}

/// A directory of per-type [`EventRegistry`] instances.
///
/// Registries are created on first use and live as long as the bus. The bus is a
/// cheap, cloneable handle meant to be built once by the host and passed to
/// producers and consumers; raising one event type never blocks another.
///
/// # Examples
/// ```rust
/// use tbus_event_bus::EventBus;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// struct UserCreated {
///     id: u64,
/// }
///
/// # fn main() -> Result<(), tbus_event_bus::EventBusError> {
/// let bus = EventBus::builder().name("app").event::<UserCreated>().build()?;
/// let created = Arc::new(AtomicUsize::new(0));
///
/// let counter = Arc::clone(&created);
/// let binding = bus.on(move |_: &UserCreated| {
///     counter.fetch_add(1, Ordering::SeqCst);
/// })?;
///
/// bus.raise(UserCreated { id: 42 })?;
/// assert_eq!(created.load(Ordering::SeqCst), 1);
///
/// let last = bus.registry::<UserCreated>()?.try_get_last_event();
/// assert_eq!(last.map(|event| event.id), Some(42));
///
/// bus.deregister(&binding)?;
/// assert_eq!(bus.event_types().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a new, unnamed, empty `EventBus`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Name given through [`EventBusBuilder::name`], recorded on log events.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Returns the registry for `T`, creating it on first use.
    ///
    /// # Errors
    /// Returns [`EventBusError::TypeMismatch`] if the directory holds a registry of
    /// the wrong type under `T`'s id, which indicates a broken invariant.
    pub fn registry<T: Event>(&self) -> Result<EventRegistry<T>> {
        let id = TypeId::of::<T>();

        if let Some(existing) = self.inner.registries.read().get(&id) {
            return existing.downcast::<T>();
        }

        let mut registries = self.inner.registries.write();
        let entry = registries.entry(id).or_insert_with(|| {
            trace!(
                bus = self.name(),
                event = type_name::<T>(),
                "Initializing new event registry"
            );
            RegistryEntry::new(EventRegistry::<T>::new())
        });
        entry.downcast::<T>()
    }

    /// Makes sure a registry for `T` exists before anyone uses it.
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn preload<T: Event>(&self) -> Result<()> {
        self.registry::<T>().map(drop)
    }

    #[must_use]
    pub fn contains<T: Event>(&self) -> bool {
        self.inner.registries.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of event types with a registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.registries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.registries.read().is_empty()
    }

    /// Names of the event types with a registry, sorted. Meant for diagnostics.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> =
            self.inner.registries.read().values().map(|entry| entry.event_type).collect();
        names.sort_unstable();
        names
    }

    /// Registers `binding` on the registry for `T`.
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn register<T: Event>(&self, binding: &Binding<T>) -> Result<bool> {
        Ok(self.registry::<T>()?.register(binding))
    }

    /// Deregisters `binding` from the registry for `T`.
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn deregister<T: Event>(&self, binding: &Binding<T>) -> Result<bool> {
        Ok(self.registry::<T>()?.deregister(binding))
    }

    /// See [`EventRegistry::on`].
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn on<T, F>(&self, f: F) -> Result<Binding<T>>
    where
        T: Event,
        F: Fn(&T) + Send + Sync + 'static,
    {
        Ok(self.registry::<T>()?.on(f))
    }

    /// See [`EventRegistry::on_signal`].
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn on_signal<T, F>(&self, f: F) -> Result<Binding<T>>
    where
        T: Event,
        F: Fn() + Send + Sync + 'static,
    {
        Ok(self.registry::<T>()?.on_signal(f))
    }

    /// Raises `event` on the registry for `T`.
    ///
    /// # Errors
    /// See [`EventRegistry::raise`] and [`EventBus::registry`].
    pub fn raise<T: Event>(&self, event: T) -> Result<usize> {
        self.registry::<T>()?.raise(event)
    }

    /// Clears bindings and cached events of every registry.
    ///
    /// Intended for host teardown points (end of a test or play scope), not for
    /// normal operation. Registries stay in the directory, empty. A registry whose
    /// teardown panics is logged and skipped; the others are still cleared.
    ///
    /// Returns the number of registries cleared successfully.
    pub fn reset_all(&self) -> usize {
        // Teardown runs foreign `Drop` code, which must not see the directory locked.
        let resets: Vec<(&'static str, Reset)> = self
            .inner
            .registries
            .read()
            .values()
            .map(|entry| (entry.event_type, Arc::clone(&entry.reset)))
            .collect();

        let mut cleared = 0;
        for (event_type, reset) in &resets {
            match panic::catch_unwind(AssertUnwindSafe(|| reset())) {
                Ok(()) => cleared += 1,
                Err(payload) => error!(
                    bus = self.name(),
                    event = event_type,
                    panic = panic_message(&*payload),
                    "Failed to clear event registry"
                ),
            }
        }

        debug!(bus = self.name(), cleared, total = resets.len(), "Reset all event registries");
        cleared
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Configures an [`EventBus`] before handing it to the rest of the application.
#[derive(Debug, Default)]
pub struct EventBusBuilder {
    name: Option<Cow<'static, str>>,
    preload: Vec<Preload>,
}

impl EventBusBuilder {
    /// Names the bus in its log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creates the registry for `T` up front, so it shows up in
    /// [`EventBus::event_types`] before first use.
    #[must_use]
    pub fn event<T: Event>(mut self) -> Self {
        self.preload.push(EventBus::preload::<T>);
        self
    }

    /// Builds the bus and creates the declared registries.
    ///
    /// # Errors
    /// See [`EventBus::registry`].
    pub fn build(self) -> Result<EventBus> {
        let bus = EventBus {
            inner: Arc::new(BusInner { name: self.name, registries: RwLock::default() }),
        };
        for preload in self.preload {
            preload(&bus)?;
        }
        debug!(bus = bus.name(), event_types = bus.len(), "Event bus initialized");
        Ok(bus)
    }
}
