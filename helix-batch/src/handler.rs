//! Batch handlers.
//!
//! A handler receives every buffered input of one epoch, in submission
//! order, and returns one output per input in the same order.
//!
//! Plain async closures are handlers:
//!
//! ```rust
//! use helix_batch::{BatchHandler, HandlerError};
//!
//! async fn double(inputs: Vec<u64>) -> Result<Vec<u64>, HandlerError> {
//!     Ok(inputs.into_iter().map(|x| x * 2).collect())
//! }
//!
//! fn assert_handler<H: BatchHandler<u64, u64>>(_: &H) {}
//! assert_handler(&double);
//! ```

use std::future::Future;

use async_trait::async_trait;

use crate::error::HandlerError;

/// Processes one batch of inputs.
#[async_trait]
pub trait BatchHandler<I, O>: Send + Sync + 'static
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Handles a batch.
    ///
    /// The returned vector must have exactly one output per input, in input
    /// order. A length mismatch fails the whole batch.
    ///
    /// # Errors
    /// Any error fails the whole batch and is delivered to every submitter.
    async fn handle(&self, inputs: Vec<I>) -> Result<Vec<O>, HandlerError>;
}

#[async_trait]
impl<I, O, F, Fut> BatchHandler<I, O> for F
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<O>, HandlerError>> + Send + 'static,
{
    async fn handle(&self, inputs: Vec<I>) -> Result<Vec<O>, HandlerError> {
        (self)(inputs).await
    }
}

/// Adapts an outcome-only batch function into a handler with `()` outputs.
///
/// Used for reducers where callers only care whether their batch
/// succeeded, not about a per-item result.
pub struct UnitHandler<F> {
    f: F,
}

impl<F> UnitHandler<F> {
    /// Wraps an outcome-only batch function.
    pub const fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<I, F, Fut> BatchHandler<I, ()> for UnitHandler<F>
where
    I: Send + 'static,
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, inputs: Vec<I>) -> Result<Vec<()>, HandlerError> {
        let count = inputs.len();
        (self.f)(inputs).await?;
        Ok(vec![(); count])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn add_one(inputs: Vec<i64>) -> Result<Vec<i64>, HandlerError> {
        Ok(inputs.into_iter().map(|x| x + 1).collect())
    }

    #[tokio::test]
    async fn test_fn_is_handler() {
        let handler: &dyn BatchHandler<i64, i64> = &add_one;
        let outputs = handler.handle(vec![1, 2, 3]).await.unwrap();
        assert_eq!(outputs, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_closure_is_handler() {
        let offset = 10;
        let handler = move |inputs: Vec<i64>| async move {
            Ok::<_, HandlerError>(inputs.into_iter().map(|x| x + offset).collect::<Vec<_>>())
        };
        let handler: &dyn BatchHandler<i64, i64> = &handler;
        let outputs = handler.handle(vec![0, 5]).await.unwrap();
        assert_eq!(outputs, vec![10, 15]);
    }

    #[tokio::test]
    async fn test_unit_handler_fans_out_unit() {
        let handler = UnitHandler::new(|inputs: Vec<u8>| async move {
            assert_eq!(inputs.len(), 4);
            Ok::<(), HandlerError>(())
        });
        let handler: &dyn BatchHandler<u8, ()> = &handler;
        let outputs = handler.handle(vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(outputs.len(), 4);
    }

    #[tokio::test]
    async fn test_unit_handler_propagates_error() {
        let handler = UnitHandler::new(|_inputs: Vec<u8>| async move {
            Err::<(), _>(HandlerError::msg("rejected"))
        });
        let handler: &dyn BatchHandler<u8, ()> = &handler;
        let err = handler.handle(vec![1]).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
    }
}
