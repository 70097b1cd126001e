//! The open batch: buffered items plus the latch for their epoch.
//!
//! Items and latch live in one structure behind one guard so a submitter
//! can never pair its item with the latch of a different epoch.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ReduceResult;
use crate::latch::Latch;
use crate::timer::FlushTimer;

/// Outcome shared by every item of one batch.
pub(crate) type BatchOutcome = ReduceResult<()>;

/// Per-item output cell, written once by the flush and taken once by the
/// submitter after the batch latch fires.
#[derive(Debug)]
pub(crate) struct OutputSlot<O> {
    value: Mutex<Option<O>>,
}

impl<O> OutputSlot<O> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub(crate) fn fill(&self, output: O) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        debug_assert!(value.is_none(), "output slot written twice");
        *value = Some(output);
    }

    pub(crate) fn take(&self) -> Option<O> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A buffered input and the slot its output will be written to.
struct PendingItem<I, O> {
    input: I,
    slot: Arc<OutputSlot<O>>,
}

/// Handle returned to the submitter for one appended item.
pub(crate) struct Appended<O> {
    pub(crate) slot: Arc<OutputSlot<O>>,
    pub(crate) latch: Arc<Latch<BatchOutcome>>,
    /// Buffer length including this item.
    pub(crate) len: usize,
}

/// A drained batch, ready for the handler.
pub(crate) struct DrainedBatch<I, O> {
    pub(crate) inputs: Vec<I>,
    pub(crate) slots: Vec<Arc<OutputSlot<O>>>,
    pub(crate) epoch: u64,
}

/// Buffer state for the current epoch.
pub(crate) struct BatchBuffer<I, O> {
    items: Vec<PendingItem<I, O>>,
    latch: Arc<Latch<BatchOutcome>>,
    capacity: usize,
    epoch: u64,
    pub(crate) timer: FlushTimer,
}

impl<I, O> BatchBuffer<I, O> {
    /// Creates an empty buffer pre-sized for `capacity` items.
    pub(crate) fn new(capacity: usize, timer: FlushTimer) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            latch: Arc::new(Latch::new()),
            capacity,
            epoch: 0,
            timer,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Appends an input to the open epoch.
    pub(crate) fn push(&mut self, input: I) -> Appended<O> {
        let slot = Arc::new(OutputSlot::new());
        self.items.push(PendingItem {
            input,
            slot: Arc::clone(&slot),
        });
        Appended {
            slot,
            latch: Arc::clone(&self.latch),
            len: self.items.len(),
        }
    }

    /// Takes every buffered item, leaving a fresh pre-sized buffer.
    ///
    /// Order is preserved: `inputs[i]` belongs to `slots[i]`.
    pub(crate) fn drain(&mut self) -> DrainedBatch<I, O> {
        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity));
        let (inputs, slots) = items
            .into_iter()
            .map(|item| (item.input, item.slot))
            .unzip();
        DrainedBatch {
            inputs,
            slots,
            epoch: self.epoch,
        }
    }

    /// Closes the current epoch: installs a fresh latch and returns the old
    /// one for signaling.
    pub(crate) fn rotate_latch(&mut self) -> Arc<Latch<BatchOutcome>> {
        self.epoch += 1;
        std::mem::replace(&mut self.latch, Arc::new(Latch::new()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn buffer() -> BatchBuffer<u32, u32> {
        BatchBuffer::new(4, FlushTimer::new(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_push_shares_epoch_latch() {
        let mut buf = buffer();
        let a = buf.push(1);
        let b = buf.push(2);
        assert_eq!(a.len, 1);
        assert_eq!(b.len, 2);
        assert!(Arc::ptr_eq(&a.latch, &b.latch));
    }

    #[tokio::test]
    async fn test_drain_preserves_order() {
        let mut buf = buffer();
        let slots: Vec<_> = [5, 3, 9].into_iter().map(|x| buf.push(x).slot).collect();

        let batch = buf.drain();
        assert_eq!(batch.inputs, vec![5, 3, 9]);
        assert!(buf.is_empty());

        for (slot, drained) in slots.iter().zip(&batch.slots) {
            assert!(Arc::ptr_eq(slot, drained));
        }
    }

    #[tokio::test]
    async fn test_rotate_latch_starts_new_epoch() {
        let mut buf = buffer();
        let first = buf.push(1).latch;
        let closed = buf.rotate_latch();
        assert!(Arc::ptr_eq(&first, &closed));
        assert_eq!(buf.epoch(), 1);

        let second = buf.push(2).latch;
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_output_slot_fill_take() {
        let slot = OutputSlot::new();
        slot.fill(42_u32);
        assert_eq!(slot.take(), Some(42));
        assert_eq!(slot.take(), None);
    }
}
