use crate::binding::{Binding, BindingId, Callback};
use crate::bus::Event;
use crate::error::{EventBusError, Result};
use crate::registry::EventRegistry;
use parking_lot::Mutex;
use std::any::type_name;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Keeps a one-shot binding registered for as long as somebody is waiting on it.
struct PendingWait<T: Event> {
    registry: EventRegistry<T>,
    id: BindingId,
}

impl<T: Event> Drop for PendingWait<T> {
    fn drop(&mut self) {
        self.registry.deregister_id(self.id);
    }
}

/// The conditions under which a pending wait stops accepting events.
#[derive(Debug, Clone)]
struct Expiry {
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
}

impl Expiry {
    fn is_expired(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline_passed().is_some()
    }

    fn deadline_passed(&self) -> Option<Duration> {
        self.deadline.filter(|(deadline, _)| Instant::now() >= *deadline).map(|(_, timeout)| timeout)
    }

    /// Cancellation takes precedence over the deadline.
    fn reason<T>(&self) -> Option<EventBusError> {
        if self.cancel.is_cancelled() {
            return Some(cancelled::<T>());
        }
        self.deadline_passed().map(timed_out::<T>)
    }
}

fn cancelled<T>() -> EventBusError {
    debug!(event = type_name::<T>(), "Wait for event cancelled");
    EventBusError::Cancelled { message: type_name::<T>().into(), context: None }
}

fn timed_out<T>(timeout: Duration) -> EventBusError {
    debug!(event = type_name::<T>(), ?timeout, "Wait for event timed out");
    EventBusError::Timeout {
        message: format!("no {} within {timeout:?}", type_name::<T>()).into(),
        context: None,
    }
}

impl<T: Event> EventRegistry<T> {
    /// Waits for the next event raised on this registry.
    ///
    /// The listener is registered when this method is called, not when the returned
    /// future is first polled, so a raise issued right after the call is observed.
    /// Events raised earlier are not. Once `cancel` fires the listener no longer
    /// accepts events, even if the future has not been polled yet; the next raise
    /// drops it. The listener is removed on every exit path, including when the
    /// future is dropped.
    ///
    /// # Errors
    /// * [`EventBusError::Cancelled`] if `cancel` fires before an event arrives.
    /// * [`EventBusError::Closed`] if the registry is reset while waiting.
    ///
    /// # Examples
    /// ```rust
    /// use tbus_event_bus::EventRegistry;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// #[derive(Debug, PartialEq)]
    /// struct Ready(u8);
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), tbus_event_bus::EventBusError> {
    /// let registry = EventRegistry::<Ready>::new();
    /// let next = registry.wait_for_event(CancellationToken::new());
    ///
    /// registry.raise(Ready(7))?;
    /// assert_eq!(*next.await?, Ready(7));
    /// assert_eq!(registry.binding_count(), 0);
    /// # Ok(())
    /// # }
    /// ```
    pub fn wait_for_event(
        &self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Arc<T>>> + Send + use<T> {
        self.wait(Expiry { cancel, deadline: None })
    }

    /// Like [`EventRegistry::wait_for_event`], bounded by `timeout`.
    ///
    /// The deadline is fixed when this method is called. An event raised after it
    /// is not delivered, even if the future is awaited later. An event delivered
    /// before the deadline wins over a timer that fires before the next poll.
    ///
    /// Must be awaited inside a Tokio runtime with the time driver enabled.
    ///
    /// # Errors
    /// * [`EventBusError::Timeout`] if no event arrives within `timeout`.
    /// * Any error of [`EventRegistry::wait_for_event`].
    pub fn wait_for_event_timeout(
        &self,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Arc<T>>> + Send + use<T> {
        let deadline = Instant::now() + timeout;
        let wait = self.wait(Expiry { cancel, deadline: Some((deadline, timeout)) });

        async move {
            tokio::time::timeout_at(deadline, wait)
                .await
                .unwrap_or_else(|_| Err(timed_out::<T>(timeout)))
        }
    }

    fn wait(&self, expiry: Expiry) -> impl Future<Output = Result<Arc<T>>> + Send + use<T> {
        let (pending, received) = self.arm(expiry.clone());

        async move {
            let _pending = pending;
            tokio::select! {
                biased;

                event = received => event.map_err(|_| {
                    // The listener was dropped without sending: either it expired
                    // or the registry was reset.
                    expiry.reason::<T>().unwrap_or_else(|| EventBusError::Closed {
                        message: type_name::<T>().into(),
                        context: Some("Registry was reset while waiting".into()),
                    })
                }),
                () = expiry.cancel.cancelled() => Err(cancelled::<T>()),
            }
        }
    }

    /// Registers a binding that removes itself and forwards the first event it sees,
    /// unless `expiry` has already fired by then.
    fn arm(&self, expiry: Expiry) -> (PendingWait<T>, oneshot::Receiver<Arc<T>>) {
        let (sender, receiver) = oneshot::channel();
        let sender = Mutex::new(Some(sender));
        let id = BindingId::next();
        let registry = self.downgrade();
        let guard = expiry.clone();

        let binding = Binding::one_shot(
            id,
            Callback::shared(move |event: &Arc<T>| {
                if let Some(registry) = Self::upgrade(&registry) {
                    registry.deregister_id(id);
                }
                // Only the first delivery wins; the waiter may already be gone.
                let Some(sender) = sender.lock().take() else {
                    return;
                };
                if expiry.is_expired() {
                    trace!(
                        event = type_name::<T>(),
                        binding = %id,
                        "Ignoring event for an expired wait"
                    );
                } else if sender.send(Arc::clone(event)).is_err() {
                    trace!(
                        event = type_name::<T>(),
                        binding = %id,
                        "Waiter dropped before the event arrived"
                    );
                }
            }),
            move || guard.is_expired(),
        );
        self.register(&binding);

        (PendingWait { registry: self.clone(), id }, receiver)
    }
}
