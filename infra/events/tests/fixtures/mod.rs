#![allow(dead_code, unreachable_pub)]

use parking_lot::Mutex;
use std::sync::Arc;
use tbus_event_bus::{Binding, Event};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ping {
    pub n: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pong(pub u32);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shutdown;

/// Collects everything a set of callbacks observed, in call order.
#[derive(Debug)]
pub struct Journal<V> {
    entries: Arc<Mutex<Vec<V>>>,
}

impl<V> Clone for Journal<V> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl<V: Clone + Send + 'static> Journal<V> {
    pub fn new() -> Self {
        Self { entries: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn push(&self, value: V) {
        self.entries.lock().push(value);
    }

    pub fn entries(&self) -> Vec<V> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// A binding that writes `project(event)` into `journal` on every delivery.
pub fn recording<T, V, F>(journal: &Journal<V>, project: F) -> Binding<T>
where
    T: Event,
    V: Clone + Send + 'static,
    F: Fn(&T) -> V + Send + Sync + 'static,
{
    let journal = journal.clone();
    Binding::with_value(move |event: &T| journal.push(project(event)))
}

/// A binding that writes `label` into `journal` on every delivery.
pub fn labelled<T: Event>(journal: &Journal<&'static str>, label: &'static str) -> Binding<T> {
    let journal = journal.clone();
    Binding::no_value(move || journal.push(label))
}
