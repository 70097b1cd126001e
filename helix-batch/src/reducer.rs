//! The reducer: coalesces individually submitted items into batches.
//!
//! # Design
//!
//! ```text
//! submit(a) ──┐                                    ┌──> a's output
//! submit(b) ──┼──> BatchBuffer ──flush──> handler ─┼──> b's output
//! submit(c) ──┘   (epoch N, latch N)      (1 call) └──> c's output
//!                        ▲                                ▲
//!           size >= max ─┤                                │
//!    timer (from last) ──┤                         latch N signaled
//!        flush_now() ────┤
//!          destroy() ────┘
//! ```
//!
//! A batch is flushed when it reaches `max_batch_size`, when the flush
//! interval elapses since the previous flush, on `flush_now`, or on
//! `destroy`. The handler is called once per batch; its outputs are written
//! back to the item slots in submission order and the epoch's latch is
//! signaled with the batch outcome, waking every submitter of that batch.
//!
//! # Locking
//!
//! Three locks, always taken in this order:
//!
//! 1. `append_lock` serializes submitters. It covers the append, the
//!    threshold check and, when the append fills the batch, the flush that
//!    follows. Only one submitter can ever observe a full batch.
//! 2. `flush_lock` admits one flush at a time, whatever triggered it. The
//!    guard moves into the spawned task that runs the handler, so it is
//!    released when the batch completes, not when the caller gives up.
//! 3. `buffer` guards the items together with the epoch latch. It is only
//!    held for bookkeeping, never across the handler call.
//!
//! Draining the items and swapping in a fresh latch happen under one
//! `buffer` critical section, so every item is paired with the latch of
//! the epoch that actually flushes it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::buffer::{BatchBuffer, BatchOutcome, DrainedBatch, OutputSlot};
use crate::config::ReducerConfig;
use crate::error::{HandlerError, ReduceError, ReduceResult};
use crate::handler::{BatchHandler, UnitHandler};
use crate::latch::Latch;
use crate::stats::{FlushReason, ReducerStats, ReducerStatsSnapshot};
use crate::timer::FlushTimer;

/// Recognizes inputs that skip batching and the output they get instead.
struct ShortCircuit<I, O> {
    is_empty: Box<dyn Fn(&I) -> bool + Send + Sync>,
    output: Box<dyn Fn() -> O + Send + Sync>,
}

/// Builder for a [`Reducer`].
///
/// ```rust
/// # #[tokio::main]
/// # async fn main() -> Result<(), helix_batch::ReduceError> {
/// use helix_batch::{HandlerError, Reducer};
///
/// let reducer = Reducer::<u64, u64>::builder()
///     .max_batch_size(100)
///     .flush_interval_ms(1000)
///     .handler(|inputs: Vec<u64>| async move {
///         Ok::<_, HandlerError>(inputs.into_iter().map(|x| x + 1).collect::<Vec<_>>())
///     })
///     .build()?;
///
/// reducer.flush_now().await?;
/// reducer.destroy().await?;
/// # Ok(())
/// # }
/// ```
pub struct ReducerBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    config: ReducerConfig,
    handler: Option<Box<dyn BatchHandler<I, O>>>,
    short_circuit: Option<ShortCircuit<I, O>>,
}

impl<I, O> ReducerBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn new() -> Self {
        Self {
            config: ReducerConfig::default(),
            handler: None,
            short_circuit: None,
        }
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub const fn config(mut self, config: ReducerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the size threshold. Default: 100.
    #[must_use]
    pub const fn max_batch_size(mut self, max: usize) -> Self {
        self.config.max_batch_size = max;
        self
    }

    /// Sets the flush interval. Default: 1s.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    /// Sets the flush interval in milliseconds.
    #[must_use]
    pub const fn flush_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.flush_interval = Duration::from_millis(interval_ms);
        self
    }

    /// Sets the batch handler. Required.
    #[must_use]
    pub fn handler<H: BatchHandler<I, O>>(mut self, handler: H) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Answers inputs matching `is_empty` with `output` directly, without
    /// entering a batch.
    #[must_use]
    pub fn empty_when<P>(mut self, is_empty: P, output: O) -> Self
    where
        P: Fn(&I) -> bool + Send + Sync + 'static,
        O: Clone + Sync,
    {
        self.short_circuit = Some(ShortCircuit {
            is_empty: Box::new(is_empty),
            output: Box::new(move || output.clone()),
        });
        self
    }

    /// Builds the reducer and starts its flush daemon.
    ///
    /// # Errors
    /// - `ReduceError::MissingHandler` if no handler was set.
    /// - `ReduceError::InvalidConfig` if the configuration is out of bounds.
    /// - `ReduceError::NoRuntime` if called outside a tokio runtime.
    pub fn build(self) -> ReduceResult<Reducer<I, O>> {
        let handler = self.handler.ok_or(ReduceError::MissingHandler)?;
        self.config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ReduceError::NoRuntime)?;

        let config = self.config;
        let inner = Arc::new(ReducerInner {
            config,
            handler,
            short_circuit: self.short_circuit,
            append_lock: Mutex::new(()),
            flush_lock: Arc::new(Mutex::new(())),
            buffer: StdMutex::new(BatchBuffer::new(
                config.max_batch_size,
                FlushTimer::new(config.flush_interval),
            )),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            stats: ReducerStats::default(),
        });

        let daemon = runtime.spawn(flush_daemon(Arc::clone(&inner)));

        info!(
            flush_interval_ms = u64::try_from(config.flush_interval.as_millis()).unwrap_or(u64::MAX),
            max_batch_size = config.max_batch_size,
            short_circuit = inner.short_circuit.is_some(),
            "Reducer started"
        );

        Ok(Reducer {
            inner,
            daemon: StdMutex::new(Some(daemon)),
        })
    }
}

impl<I> ReducerBuilder<I, ()>
where
    I: Send + 'static,
{
    /// Sets an outcome-only batch function. Submitters learn whether their
    /// batch succeeded but get no per-item output.
    #[must_use]
    pub fn unit_handler<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handler(UnitHandler::new(f))
    }
}

/// Handle to one submitted item.
///
/// Dropping a ticket does not withdraw the item; it is still processed with
/// its batch and the output is discarded.
pub struct Ticket<O> {
    state: TicketState<O>,
}

enum TicketState<O> {
    Ready(O),
    Pending {
        latch: Arc<Latch<BatchOutcome>>,
        slot: Arc<OutputSlot<O>>,
    },
}

impl<O> Ticket<O> {
    fn ready(output: O) -> Self {
        Self {
            state: TicketState::Ready(output),
        }
    }

    fn pending(latch: Arc<Latch<BatchOutcome>>, slot: Arc<OutputSlot<O>>) -> Self {
        Self {
            state: TicketState::Pending { latch, slot },
        }
    }

    /// Waits for the item's batch and returns its output.
    ///
    /// # Errors
    /// Returns the batch outcome if the batch failed.
    pub async fn wait(self) -> ReduceResult<O> {
        match self.state {
            TicketState::Ready(output) => Ok(output),
            TicketState::Pending { latch, slot } => {
                latch.wait().await?;
                slot.take().ok_or(ReduceError::MissingOutput)
            }
        }
    }

    /// Waits at most `timeout` for the item's batch.
    ///
    /// # Errors
    /// Returns `ReduceError::Timeout` if the batch has not completed in time;
    /// the item stays in its batch regardless.
    pub async fn wait_timeout(self, timeout: Duration) -> ReduceResult<O> {
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(ReduceError::Timeout {
                waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Returns true if `wait` would complete without suspending.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match &self.state {
            TicketState::Ready(_) => true,
            TicketState::Pending { latch, .. } => latch.is_signaled(),
        }
    }
}

impl<O> fmt::Debug for Ticket<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// State shared between the reducer handle and its flush daemon.
struct ReducerInner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    config: ReducerConfig,
    handler: Box<dyn BatchHandler<I, O>>,
    short_circuit: Option<ShortCircuit<I, O>>,
    append_lock: Mutex<()>,
    flush_lock: Arc<Mutex<()>>,
    buffer: StdMutex<BatchBuffer<I, O>>,
    closed: AtomicBool,
    shutdown: Notify,
    stats: ReducerStats,
}

impl<I, O> ReducerInner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Never held across an await, so poisoning can only come from a panic
    /// inside O(1) bookkeeping; the buffer is still consistent.
    fn lock_buffer(&self) -> MutexGuard<'_, BatchBuffer<I, O>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn short_circuit(&self, input: &I) -> Option<O> {
        let short_circuit = self.short_circuit.as_ref()?;
        if !(short_circuit.is_empty)(input) {
            return None;
        }
        self.stats.record_short_circuit();
        Some((short_circuit.output)())
    }

    /// Flushes the open batch.
    ///
    /// Once the flush lock is held, the batch is drained and handed to a
    /// spawned task in one step with no await in between. The caller only
    /// waits for that task, so cancelling the caller never loses the batch
    /// or leaves its latch unsignaled.
    async fn flush(self: &Arc<Self>, reason: FlushReason) -> ReduceResult<()> {
        let flushing = Arc::clone(&self.flush_lock).lock_owned().await;

        let Some((batch, latch)) = self.take_batch(reason) else {
            return Ok(());
        };

        let inner = Arc::clone(self);
        let completion = tokio::spawn(async move {
            let _flushing = flushing;
            inner.complete(batch, &latch, reason).await
        });

        match completion.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(reason = reason.as_str(), error = %e, "Flush task failed");
                Err(ReduceError::Abandoned)
            }
        }
    }

    /// Drains the open batch and closes its epoch.
    ///
    /// A timer flush only proceeds if the timer is still due: a flush that
    /// completed in the meantime has rearmed it.
    fn take_batch(
        &self,
        reason: FlushReason,
    ) -> Option<(DrainedBatch<I, O>, Arc<Latch<BatchOutcome>>)> {
        let mut buffer = self.lock_buffer();
        if reason == FlushReason::Timer {
            if !buffer.timer.is_due(Instant::now()) {
                return None;
            }
            if buffer.is_empty() {
                buffer.timer.rearm();
                return None;
            }
        }
        if buffer.is_empty() {
            return None;
        }
        let batch = buffer.drain();
        Some((batch, buffer.rotate_latch()))
    }

    /// Runs the handler for a drained batch and publishes the outcome.
    async fn complete(
        &self,
        batch: DrainedBatch<I, O>,
        latch: &Latch<BatchOutcome>,
        reason: FlushReason,
    ) -> BatchOutcome {
        let DrainedBatch {
            inputs,
            slots,
            epoch,
        } = batch;
        let batch_size = inputs.len();
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(self.handler.handle(inputs))
            .catch_unwind()
            .await
        {
            Ok(Ok(outputs)) if outputs.len() == slots.len() => {
                for (slot, output) in slots.iter().zip(outputs) {
                    slot.fill(output);
                }
                Ok(())
            }
            Ok(Ok(outputs)) => Err(ReduceError::OutputLengthMismatch {
                inputs: slots.len(),
                outputs: outputs.len(),
            }),
            Ok(Err(err)) => Err(ReduceError::Handler(err)),
            Err(payload) => Err(ReduceError::HandlerPanicked {
                message: panic_message(payload.as_ref()),
            }),
        };

        self.lock_buffer().timer.rearm();
        self.stats
            .record_flush(reason, batch_size as u64, outcome.is_err());

        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        match &outcome {
            Ok(()) => debug!(
                reason = reason.as_str(),
                epoch,
                batch_size,
                elapsed_us,
                "Batch flushed"
            ),
            Err(e) => warn!(
                reason = reason.as_str(),
                epoch,
                batch_size,
                elapsed_us,
                error = %e,
                "Batch failed"
            ),
        }

        if let Err(e) = latch.signal(outcome.clone()) {
            error!(epoch, error = %e, "Epoch latch signaled twice");
            debug_assert!(false, "epoch {epoch} latch signaled twice");
        }
        outcome
    }
}

/// Background task: timer-driven flushes until shutdown.
///
/// Exits on shutdown without flushing; `destroy` drains the final batch
/// itself once this task has stopped.
async fn flush_daemon<I, O>(inner: Arc<ReducerInner<I, O>>)
where
    I: Send + 'static,
    O: Send + 'static,
{
    loop {
        let deadline = inner.lock_buffer().timer.deadline();

        tokio::select! {
            () = inner.shutdown.notified() => break,
            () = sleep_until(deadline) => {
                // Submitters of the batch receive the outcome through its latch.
                let _ = inner.flush(FlushReason::Timer).await;
            }
        }
    }
    debug!("Flush daemon stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Coalesces submitted items into batches processed by one handler call.
///
/// Must be built inside a tokio runtime. Call [`Reducer::destroy`] to drain
/// the last batch; dropping the reducer instead fails whatever is still
/// buffered with `ReduceError::Abandoned`.
pub struct Reducer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    inner: Arc<ReducerInner<I, O>>,
    daemon: StdMutex<Option<JoinHandle<()>>>,
}

impl<I, O> Reducer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Starts building a reducer.
    #[must_use]
    pub fn builder() -> ReducerBuilder<I, O> {
        ReducerBuilder::new()
    }

    /// Builds a reducer from a handler and a configuration.
    ///
    /// # Errors
    /// See [`ReducerBuilder::build`].
    pub fn new<H: BatchHandler<I, O>>(handler: H, config: ReducerConfig) -> ReduceResult<Self> {
        Self::builder().config(config).handler(handler).build()
    }

    /// Submits an item and waits for its output.
    ///
    /// # Errors
    /// - `ReduceError::Closed` once `destroy` has begun.
    /// - The batch outcome if the item's batch failed.
    pub async fn submit(&self, input: I) -> ReduceResult<O> {
        self.enqueue(input).await?.wait().await
    }

    /// Appends an item and returns a ticket for its output without waiting
    /// for the batch.
    ///
    /// If this item fills the batch, the batch is flushed before returning.
    /// Dropping this future mid-flush does not cancel the flush.
    ///
    /// # Errors
    /// Returns `ReduceError::Closed` once `destroy` has begun.
    pub async fn enqueue(&self, input: I) -> ReduceResult<Ticket<O>> {
        if let Some(output) = self.inner.short_circuit(&input) {
            return Ok(Ticket::ready(output));
        }

        let _appending = self.inner.append_lock.lock().await;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ReduceError::Closed);
        }

        let appended = self.inner.lock_buffer().push(input);
        self.inner.stats.record_submit();

        if appended.len >= self.inner.config.max_batch_size {
            // Submitters of the batch, this one included, receive the
            // outcome through its latch.
            let _ = self.inner.flush(FlushReason::Size).await;
        }

        Ok(Ticket::pending(appended.latch, appended.slot))
    }

    /// Flushes whatever is buffered now.
    ///
    /// Returns immediately with `Ok(())` when the buffer is empty.
    ///
    /// # Errors
    /// Returns the outcome of the flushed batch if it failed.
    pub async fn flush_now(&self) -> ReduceResult<()> {
        self.inner.flush(FlushReason::Manual).await
    }

    /// Stops the reducer and drains the final batch.
    ///
    /// New submissions are rejected from the moment this is called. The
    /// timer and daemon are stopped before the final flush, so the final
    /// batch is handled exactly once. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the outcome of the final batch if it failed.
    pub async fn destroy(&self) -> ReduceResult<()> {
        {
            let _appending = self.inner.append_lock.lock().await;
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }

        self.inner.lock_buffer().timer.stop();
        self.inner.shutdown.notify_one();

        let daemon = self
            .daemon
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = daemon {
            if let Err(e) = handle.await {
                warn!(error = %e, "Flush daemon ended abnormally");
            }
        }

        let result = self.inner.flush(FlushReason::Shutdown).await;

        let stats = self.inner.stats.snapshot();
        info!(
            batches = stats.batches,
            items_flushed = stats.items_flushed,
            failed_batches = stats.failed_batches,
            "Reducer destroyed"
        );
        result
    }

    /// Number of items in the open batch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.lock_buffer().len()
    }

    /// Number of epochs closed so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.inner.lock_buffer().epoch()
    }

    /// Returns true once `destroy` has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReducerConfig {
        &self.inner.config
    }

    /// Returns a snapshot of the reducer's counters.
    #[must_use]
    pub fn stats(&self) -> ReducerStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<I, O> Drop for Reducer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn drop(&mut self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.notify_one();

        let abandoned = {
            let mut buffer = self.inner.lock_buffer();
            buffer.timer.stop();
            if buffer.is_empty() {
                None
            } else {
                let batch = buffer.drain();
                Some((batch.inputs.len(), buffer.rotate_latch()))
            }
        };

        if let Some((count, latch)) = abandoned {
            warn!(count, "Reducer dropped without destroy; failing buffered batch");
            let _ = latch.signal(Err(ReduceError::Abandoned));
        }
    }
}

impl<I, O> fmt::Debug for Reducer<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reducer")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
