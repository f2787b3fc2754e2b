use crate::bus::Event;
use crate::error::BoxError;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

type Handler<T> = dyn Fn(&Arc<T>) -> Result<(), BoxError> + Send + Sync;
type Expiry = Arc<dyn Fn() -> bool + Send + Sync>;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// A single subscriber callback.
///
/// Callbacks are compared by identity: a clone refers to the same callback, two
/// callbacks built from identical closures do not. Keep a clone around to remove it
/// from a [`Binding`] later.
pub struct Callback<T> {
    handler: Arc<Handler<T>>,
}

impl<T: Event> Callback<T> {
    /// Wraps a callback that receives the raised event.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::shared(move |event: &Arc<T>| f(event))
    }

    /// Wraps a fallible callback. An error aborts the rest of the delivery pass and
    /// is returned to whoever raised the event.
    pub fn try_new<F, E>(f: F) -> Self
    where
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self {
            handler: Arc::new(move |event: &Arc<T>| -> Result<(), BoxError> {
                f(event).map_err(Into::into)
            }),
        }
    }

    /// Wraps a callback that only cares that the event happened.
    pub fn no_value<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(move |_: &T| f())
    }

    /// Fallible variant of [`Callback::no_value`].
    pub fn try_no_value<F, E>(f: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        Self::try_new(move |_: &T| f())
    }

    /// Wraps a callback that receives the shared event handle without cloning it.
    pub fn shared<F>(f: F) -> Self
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(move |event: &Arc<T>| -> Result<(), BoxError> {
                f(event);
                Ok(())
            }),
        }
    }

    /// Returns `true` if both handles refer to the same callback.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler)
    }

    fn call(&self, event: &Arc<T>) -> Result<(), BoxError> {
        (self.handler)(event)
    }
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Self { handler: Arc::clone(&self.handler) }
    }
}

impl<T> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("event", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

/// Process-unique identity of a [`Binding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u64);

impl BindingId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

struct CallbackLists<T> {
    with_value: Vec<Callback<T>>,
    no_value: Vec<Callback<T>>,
}

impl<T> Clone for CallbackLists<T> {
    fn clone(&self) -> Self {
        Self { with_value: self.with_value.clone(), no_value: self.no_value.clone() }
    }
}

struct BindingInner<T> {
    id: BindingId,
    // Copy-on-write so a delivery pass can run against a snapshot while the
    // callback being invoked edits its own binding.
    callbacks: RwLock<Arc<CallbackLists<T>>>,
    // Set on one-shot bindings; once it reports `true` the registry drops the binding
    // instead of delivering to it.
    expiry: Option<Expiry>,
}

/// A subscription for events of type `T`.
///
/// A binding aggregates callbacks of two shapes: ones that receive the event and
/// ones that take no arguments. During delivery the former run first, then the
/// latter, each in the order they were added. The lists stay editable after the
/// binding has been registered.
///
/// `Binding` is a cheap handle; clones share identity and callback lists, which is
/// what registries use to tell bindings apart.
///
/// # Examples
/// ```rust
/// use tbus_event_bus::{Binding, Callback};
///
/// struct Ping(u32);
///
/// let binding = Binding::with_value(|ping: &Ping| assert!(ping.0 > 0));
/// let on_any = Callback::no_value(|| {});
/// binding.add_no_value(on_any.clone());
/// assert_eq!(binding.callback_count(), 2);
///
/// assert!(binding.remove_no_value(&on_any));
/// assert!(!binding.remove_no_value(&on_any));
/// ```
pub struct Binding<T> {
    inner: Arc<BindingInner<T>>,
}

impl<T: Event> Binding<T> {
    /// Creates a binding whose first callback receives the event.
    #[must_use]
    pub fn new(callback: Callback<T>) -> Self {
        let lists = CallbackLists { with_value: vec![callback], no_value: Vec::new() };
        Self::from_lists(BindingId::next(), lists, None)
    }

    /// Creates a binding whose first callback takes no arguments.
    #[must_use]
    pub fn new_no_value(callback: Callback<T>) -> Self {
        let lists = CallbackLists { with_value: Vec::new(), no_value: vec![callback] };
        Self::from_lists(BindingId::next(), lists, None)
    }

    /// Shorthand for `Binding::new(Callback::new(f))`.
    #[must_use]
    pub fn with_value<F>(f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self::new(Callback::new(f))
    }

    /// Shorthand for `Binding::new_no_value(Callback::no_value(f))`.
    #[must_use]
    pub fn no_value<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new_no_value(Callback::no_value(f))
    }

    /// A binding with a fixed id that stops receiving events once `expired` says so.
    pub(crate) fn one_shot<E>(id: BindingId, callback: Callback<T>, expired: E) -> Self
    where
        E: Fn() -> bool + Send + Sync + 'static,
    {
        let lists = CallbackLists { with_value: vec![callback], no_value: Vec::new() };
        Self::from_lists(id, lists, Some(Arc::new(expired)))
    }

    fn from_lists(id: BindingId, lists: CallbackLists<T>, expiry: Option<Expiry>) -> Self {
        let callbacks = RwLock::new(Arc::new(lists));
        Self { inner: Arc::new(BindingInner { id, callbacks, expiry }) }
    }

    #[must_use]
    pub fn id(&self) -> BindingId {
        self.inner.id
    }

    /// Appends a callback that receives the event.
    pub fn add_with_value(&self, callback: Callback<T>) {
        self.edit(|lists| lists.with_value.push(callback));
    }

    /// Removes the most recently added occurrence of `callback`.
    ///
    /// Returns `false` when the callback was not part of this binding.
    pub fn remove_with_value(&self, callback: &Callback<T>) -> bool {
        self.edit(|lists| remove_last(&mut lists.with_value, callback))
    }

    /// Appends a callback that takes no arguments.
    pub fn add_no_value(&self, callback: Callback<T>) {
        self.edit(|lists| lists.no_value.push(callback));
    }

    /// Removes the most recently added occurrence of `callback`.
    ///
    /// Returns `false` when the callback was not part of this binding.
    pub fn remove_no_value(&self, callback: &Callback<T>) -> bool {
        self.edit(|lists| remove_last(&mut lists.no_value, callback))
    }

    /// Total number of callbacks, both shapes included.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        let lists = self.inner.callbacks.read();
        lists.with_value.len() + lists.no_value.len()
    }

    /// Returns `true` if both handles refer to the same binding.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.inner.expiry.as_ref().is_some_and(|expired| expired())
    }

    /// Runs every callback against `event`, stopping at the first failure.
    pub(crate) fn dispatch(&self, event: &Arc<T>) -> Result<(), BoxError> {
        let lists = Arc::clone(&*self.inner.callbacks.read());
        lists.with_value.iter().chain(&lists.no_value).try_for_each(|callback| callback.call(event))
    }

    fn edit<R>(&self, f: impl FnOnce(&mut CallbackLists<T>) -> R) -> R {
        let mut lists = self.inner.callbacks.write();
        f(Arc::make_mut(&mut *lists))
    }
}

fn remove_last<T: Event>(list: &mut Vec<Callback<T>>, callback: &Callback<T>) -> bool {
    list.iter()
        .rposition(|existing| existing.ptr_eq(callback))
        .map(|index| list.remove(index))
        .is_some()
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.inner.callbacks.read();
        f.debug_struct("Binding")
            .field("id", &self.inner.id)
            .field("event", &std::any::type_name::<T>())
            .field("with_value", &lists.with_value.len())
            .field("no_value", &lists.no_value.len())
            .finish()
    }
}
