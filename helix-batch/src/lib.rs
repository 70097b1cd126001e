//! Helix Batch - request coalescing with fan-out completion.
//!
//! Many independent callers submit one item each; the [`Reducer`] groups
//! them into batches, invokes a single batch handler per batch and hands
//! each caller the output at its position. A batch is closed when it
//! reaches `max_batch_size` or when `flush_interval` has elapsed since the
//! previous flush, whichever comes first.
//!
//! ```text
//!   producers               Reducer                       handler
//!  ───────────         ─────────────────────            ───────────
//!  submit(x1) ──┐      ┌─────────────────────┐
//!  submit(x2) ──┼────> │ epoch N: [x1 x2 x3] │ ──flush──> f([x1,x2,x3])
//!  submit(x3) ──┘      │ latch N             │               │
//!       ▲              └─────────────────────┘               │
//!       └──────────── latch N signaled, outputs by index <───┘
//! ```
//!
//! # Design Principles
//!
//! - **One outcome per batch**: a handler failure reaches every submitter
//!   of that batch and no other
//! - **Order preserved**: the handler sees inputs in append order
//! - **Bounded batches**: a batch never exceeds `max_batch_size`
//! - **No lost items**: `destroy` drains the final batch; dropping the
//!   reducer fails it with `Abandoned` instead of leaving waiters hanging
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod buffer;
mod config;
mod error;
mod handler;
mod latch;
mod reducer;
mod stats;
mod timer;

pub use config::{limits, ReducerConfig, ENV_FLUSH_INTERVAL_MS, ENV_MAX_BATCH_SIZE};
pub use error::{BoxError, HandlerError, ReduceError, ReduceResult};
pub use handler::{BatchHandler, UnitHandler};
pub use latch::Latch;
pub use reducer::{Reducer, ReducerBuilder, Ticket};
pub use stats::{FlushReason, ReducerStats, ReducerStatsSnapshot};
