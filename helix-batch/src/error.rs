//! Reducer error types.
//!
//! Handler failures are data, not control flow: a failed batch produces one
//! `ReduceError` that is cloned out to every submitter of that batch.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for reducer operations.
pub type ReduceResult<T> = Result<T, ReduceError>;

/// Boxed error accepted by [`HandlerError::new`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur while batching.
#[derive(Debug, Clone, Error)]
pub enum ReduceError {
    /// The builder was finished without a batch handler.
    #[error("no batch handler configured")]
    MissingHandler,

    /// A configuration value is out of bounds.
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The reducer was built outside a tokio runtime.
    #[error("no tokio runtime available to run the flush daemon")]
    NoRuntime,

    /// The handler reported a failure for the batch.
    #[error("batch handler failed: {0}")]
    Handler(HandlerError),

    /// The handler panicked while processing the batch.
    #[error("batch handler panicked: {message}")]
    HandlerPanicked {
        /// Panic payload rendered as text.
        message: String,
    },

    /// The handler returned a different number of outputs than it was given inputs.
    #[error("handler returned {outputs} outputs for {inputs} inputs")]
    OutputLengthMismatch {
        /// Number of inputs in the batch.
        inputs: usize,
        /// Number of outputs the handler returned.
        outputs: usize,
    },

    /// The batch succeeded but left no output for this item.
    #[error("batch completed without an output for this item")]
    MissingOutput,

    /// A latch was signaled twice.
    #[error("latch already signaled")]
    AlreadySignaled,

    /// The reducer no longer accepts submissions.
    #[error("reducer is closed")]
    Closed,

    /// A wait gave up before the batch completed. The item is still processed.
    #[error("timed out after {waited_ms}ms waiting for batch completion")]
    Timeout {
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The reducer was dropped without `destroy` while the item was still buffered.
    #[error("reducer dropped before the batch was flushed")]
    Abandoned,
}

impl ReduceError {
    /// Returns true if this error describes the outcome of a whole batch
    /// and was delivered to every submitter of that batch.
    #[must_use]
    pub const fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            Self::Handler(_)
                | Self::HandlerPanicked { .. }
                | Self::OutputLengthMismatch { .. }
                | Self::Abandoned
        )
    }

    /// Returns true if resubmitting the same input may succeed.
    ///
    /// Batch failures are not retried by the reducer; the caller decides.
    /// A `Timeout` is not retryable: the item is still in its batch and
    /// resubmitting it would process it twice.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// Returns the handler's own error, if this is a handler failure.
    #[must_use]
    pub const fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HandlerError> for ReduceError {
    fn from(err: HandlerError) -> Self {
        Self::Handler(err)
    }
}

/// Error reported by a batch handler.
///
/// Cheap to clone: the underlying error is shared, so every submitter of a
/// failed batch observes the very same error value.
#[derive(Clone)]
pub struct HandlerError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl HandlerError {
    /// Wraps an arbitrary error.
    pub fn new(err: impl Into<BoxError>) -> Self {
        let boxed: BoxError = err.into();
        Self {
            inner: Arc::from(boxed),
        }
    }

    /// Creates a handler error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(message)
    }

    /// Attempts to view the wrapped error as a concrete type.
    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Returns true if both values share the same underlying error.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerError").field(&self.inner).finish()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for HandlerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}
