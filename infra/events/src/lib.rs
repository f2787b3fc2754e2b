//! # Event Bus
//!
//! A type-indexed, in-process publish/subscribe bus with synchronous delivery.
//!
//! ## Overview
//!
//! Each event type gets its own [`EventRegistry`]: a set of [`Binding`]s, a cache of the
//! last raised value, and an async "wait for the next one" adapter. An [`EventBus`]
//! tracks the registries of an application so they can be looked up by type and reset
//! together at teardown.
//!
//! ## Features
//!
//! * **Type-Safe**: Events are identified by their Rust type.
//! * **Synchronous**: [`EventRegistry::raise`] runs callbacks on the caller's thread
//!   against a snapshot of the bindings, without holding any lock.
//! * **Last-value cache**: [`EventRegistry::try_get_last_event`] and friends.
//! * **Async Ready**: [`EventRegistry::wait_for_event`] with cancellation and timeout,
//!   built on `tokio` and `tokio-util`.
//! * **Independent locks**: `parking_lot` locks per registry; raising one type never
//!   blocks another.
//!
//! ## Delivery contract
//!
//! A failing callback aborts the rest of that raise's delivery and the error is
//! returned from `raise`. Later bindings do not see that event; there is no retry.
//!
//! # Example
//!
//! ```rust
//! use tbus_event_bus::{EventBus, EventBusError};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Clone, Debug, Default, PartialEq)]
//! struct UserCreated { id: u64 }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::new();
//!     let users = bus.registry::<UserCreated>()?;
//!
//!     let next = users.wait_for_event(CancellationToken::new());
//!     users.raise(UserCreated { id: 42 })?;
//!
//!     assert_eq!(next.await?.id, 42);
//!     assert_eq!(*users.get_last_event(), UserCreated { id: 42 });
//!
//!     bus.reset_all();
//!     assert!(!users.has_last_event());
//!     Ok(())
//! }
//! ```

mod binding;
mod bus;
mod error;
mod registry;
mod wait;

pub use binding::{Binding, BindingId, Callback};
pub use bus::{Event, EventBus, EventBusBuilder};
pub use error::{BoxError, EventBusError, EventBusErrorExt, Result};
pub use registry::EventRegistry;
