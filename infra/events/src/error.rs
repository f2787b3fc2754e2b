use std::borrow::Cow;

/// Boxed error returned by fallible event callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for event bus operations.
pub type Result<T, E = EventBusError> = std::result::Result<T, E>;

/// Errors that can occur during event bus operations.
#[tbus_derive::bus_error]
pub enum EventBusError {
    /// A subscriber callback failed while an event was being delivered.
    /// Delivery to the remaining bindings of that raise was aborted.
    #[error("Event handler failed{}: {source}", format_context(.context))]
    Handler { source: BoxError, context: Option<Cow<'static, str>> },

    /// No event arrived before the wait deadline.
    #[error("Timed out waiting for event{}: {message}", format_context(.context))]
    Timeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The caller's cancellation signal fired before an event arrived.
    #[error("Wait cancelled{}: {message}", format_context(.context))]
    Cancelled { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The registry was reset while a wait was still pending.
    #[error("Registry closed{}: {message}", format_context(.context))]
    Closed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Occurs when an internal dynamic cast fails.
    /// This usually indicates an invariant violation in the type directory.
    #[error("Type mismatch{}: {message}", format_context(.context))]
    TypeMismatch { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}
