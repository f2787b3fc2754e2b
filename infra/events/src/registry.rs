use crate::binding::{Binding, BindingId, Callback};
use crate::bus::Event;
use crate::error::{EventBusError, Result};
use fxhash::FxHashSet;
use parking_lot::RwLock;
use std::any::type_name;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

pub(crate) struct RegistryState<T> {
    // Copy-on-write: `raise` hands out clones of this `Arc` as its delivery snapshot.
    bindings: Arc<Vec<Binding<T>>>,
    members: FxHashSet<BindingId>,
    last_event: Option<Arc<T>>,
}

impl<T: Event> RegistryState<T> {
    /// Takes out the bindings of waits that were cancelled or ran past their deadline.
    fn prune_expired(&mut self) -> Vec<Binding<T>> {
        if !self.bindings.iter().any(Binding::is_expired) {
            return Vec::new();
        }
        let (expired, live): (Vec<_>, Vec<_>) =
            self.bindings.iter().cloned().partition(Binding::is_expired);
        for binding in &expired {
            self.members.remove(&binding.id());
        }
        self.bindings = Arc::new(live);
        trace!(event = type_name::<T>(), pruned = expired.len(), "Dropped expired bindings");
        expired
    }
}

impl<T> Default for RegistryState<T> {
    fn default() -> Self {
        Self { bindings: Arc::default(), members: FxHashSet::default(), last_event: None }
    }
}

/// The subscribers and last-event cache for a single event type.
///
/// `EventRegistry` is a cheap, cloneable handle; every clone operates on the same
/// state. All operations are safe to call from any thread, including from inside a
/// callback that is being run by [`EventRegistry::raise`].
///
/// # Examples
/// ```rust
/// use tbus_event_bus::{Binding, EventRegistry};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Ping {
///     n: u32,
/// }
///
/// # fn main() -> Result<(), tbus_event_bus::EventBusError> {
/// let registry = EventRegistry::<Ping>::new();
/// let seen = Arc::new(AtomicU32::new(0));
///
/// let sink = Arc::clone(&seen);
/// let binding = Binding::with_value(move |ping: &Ping| sink.store(ping.n, Ordering::SeqCst));
/// registry.register(&binding);
///
/// registry.raise(Ping { n: 1 })?;
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
///
/// registry.deregister(&binding);
/// registry.raise(Ping { n: 3 })?;
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// assert_eq!(*registry.get_last_event(), Ping { n: 3 });
/// # Ok(())
/// # }
/// ```
pub struct EventRegistry<T> {
    state: Arc<RwLock<RegistryState<T>>>,
}

impl<T: Event> EventRegistry<T> {
    /// Creates an empty, standalone registry.
    ///
    /// Most callers obtain registries from an [`EventBus`](crate::EventBus) instead, so
    /// that producers and consumers of the same type meet on the same instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `binding` to the delivery set.
    ///
    /// Returns `false` if the binding was already registered; it is never delivered to
    /// twice for the same raise.
    pub fn register(&self, binding: &Binding<T>) -> bool {
        let (inserted, bindings) = {
            let mut state = self.state.write();
            let inserted = state.members.insert(binding.id());
            if inserted {
                Arc::make_mut(&mut state.bindings).push(binding.clone());
            }
            (inserted, state.bindings.len())
        };
        trace!(
            event = type_name::<T>(),
            binding = %binding.id(),
            inserted,
            bindings,
            "Binding registered"
        );
        inserted
    }

    /// Removes `binding` from the delivery set. Removing an absent binding is a no-op.
    ///
    /// A raise that is already delivering keeps its snapshot, so the binding may still
    /// observe that one event.
    pub fn deregister(&self, binding: &Binding<T>) -> bool {
        self.deregister_id(binding.id())
    }

    pub(crate) fn deregister_id(&self, id: BindingId) -> bool {
        let (removed, bindings) = {
            let mut state = self.state.write();
            let removed = state.members.remove(&id);
            if removed {
                Arc::make_mut(&mut state.bindings).retain(|binding| binding.id() != id);
            }
            (removed, state.bindings.len())
        };
        trace!(event = type_name::<T>(), binding = %id, removed, bindings, "Binding deregistered");
        removed
    }

    /// Builds a binding around `f`, registers it and hands it back for later removal.
    pub fn on<F>(&self, f: F) -> Binding<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let binding = Binding::with_value(f);
        self.register(&binding);
        binding
    }

    /// Same as [`EventRegistry::on`] for a callback that ignores the payload.
    pub fn on_signal<F>(&self, f: F) -> Binding<T>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let binding = Binding::new_no_value(Callback::no_value(f));
        self.register(&binding);
        binding
    }

    /// Caches `event` and delivers it synchronously to every registered binding.
    ///
    /// Bindings are visited in registration order against a snapshot taken when the
    /// raise starts; registrations and removals made meanwhile (including from inside
    /// a callback) apply from the next raise on. Pending waits that were cancelled or
    /// ran past their deadline are dropped instead of delivered to. Returns the number
    /// of bindings in the snapshot.
    ///
    /// # Errors
    /// Returns [`EventBusError::Handler`] with the first callback error. Bindings
    /// after the failing one do not receive this event. The cache is updated either way.
    pub fn raise(&self, event: T) -> Result<usize> {
        self.raise_arc(Arc::new(event))
    }

    /// Raises an already shared event without re-wrapping it.
    ///
    /// # Errors
    /// See [`EventRegistry::raise`].
    pub fn raise_arc(&self, event: Arc<T>) -> Result<usize> {
        let (snapshot, expired) = {
            let mut state = self.state.write();
            state.last_event = Some(Arc::clone(&event));
            let expired = state.prune_expired();
            (Arc::clone(&state.bindings), expired)
        };
        // Dropping a one-shot binding wakes its waiter; keep that outside the lock.
        drop(expired);
        trace!(event = type_name::<T>(), bindings = snapshot.len(), "Raising event");

        for (index, binding) in snapshot.iter().enumerate() {
            if let Err(source) = binding.dispatch(&event) {
                warn!(
                    event = type_name::<T>(),
                    binding = %binding.id(),
                    skipped = snapshot.len() - index - 1,
                    error = %source,
                    "Event handler failed; aborting delivery"
                );
                return Err(EventBusError::Handler {
                    source,
                    context: Some(type_name::<T>().into()),
                });
            }
        }

        Ok(snapshot.len())
    }

    /// Returns the most recently raised event, if any.
    #[must_use]
    pub fn try_get_last_event(&self) -> Option<Arc<T>> {
        self.state.read().last_event.clone()
    }

    /// Returns the most recently raised event, or `T::default()` if none is cached.
    #[must_use]
    pub fn get_last_event(&self) -> Arc<T>
    where
        T: Default,
    {
        self.try_get_last_event().unwrap_or_default()
    }

    #[must_use]
    pub fn has_last_event(&self) -> bool {
        self.state.read().last_event.is_some()
    }

    /// Forgets the cached event. Bindings are left untouched.
    pub fn clear_last_event(&self) {
        let previous = self.state.write().last_event.take();
        debug!(event = type_name::<T>(), had_event = previous.is_some(), "Cleared last event");
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.state.read().bindings.len()
    }

    #[must_use]
    pub fn contains(&self, binding: &Binding<T>) -> bool {
        self.state.read().members.contains(&binding.id())
    }

    /// Drops every binding and the cached event.
    ///
    /// Reserved for host teardown through [`EventBus::reset_all`](crate::EventBus::reset_all).
    pub(crate) fn clear(&self) {
        let (bindings, last_event) = {
            let mut state = self.state.write();
            state.members.clear();
            (std::mem::take(&mut state.bindings), state.last_event.take())
        };
        debug!(event = type_name::<T>(), bindings = bindings.len(), "Clearing event registry");
        // Captured values may run arbitrary `Drop` code; keep it outside the lock.
        drop(last_event);
        drop(bindings);
    }

    pub(crate) fn downgrade(&self) -> Weak<RwLock<RegistryState<T>>> {
        Arc::downgrade(&self.state)
    }

    pub(crate) fn upgrade(weak: &Weak<RwLock<RegistryState<T>>>) -> Option<Self> {
        weak.upgrade().map(|state| Self { state })
    }
}

impl<T> Default for EventRegistry<T> {
    fn default() -> Self {
        Self { state: Arc::default() }
    }
}

impl<T> Clone for EventRegistry<T> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<T> fmt::Debug for EventRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("EventRegistry")
            .field("event", &type_name::<T>())
            .field("bindings", &state.bindings.len())
            .field("has_last_event", &state.last_event.is_some())
            .finish()
    }
}
