//! Bounded staging buffer with demand-driven delivery.
//!
//! Every stage parks its outgoing items here until the next stage demands
//! more. The buffer never blocks: `add` fails the context on overflow,
//! `try_flush` hands out the oldest `min(demand, len, batch_limit)` items,
//! and at most one delivery is in flight at a time (the owning actor calls
//! `delivery_done` once the downstream inbox accepted the batch, and learns
//! from the return value whether free capacity reappeared and production
//! should resume).
//!
//! Items flow through in strict FIFO order.

use std::collections::VecDeque;

use crate::error::{PipelineError, PipelineResult};

pub struct StagingBuffer<T> {
    stage: &'static str,
    capacity: usize,
    /// Most items handed out per delivery; `usize::MAX` batches everything
    /// demand allows (frame deliveries), `1` delivers packet by packet.
    batch_limit: usize,
    queue: VecDeque<T>,
    demand: usize,
    delivering: bool,
}

impl<T> StagingBuffer<T> {
    pub fn new(stage: &'static str, capacity: usize, batch_limit: usize) -> Self {
        Self {
            stage,
            capacity,
            batch_limit: batch_limit.max(1),
            queue: VecDeque::new(),
            demand: 0,
            delivering: false,
        }
    }

    /// Append items; never blocks.
    ///
    /// # Errors
    ///
    /// `BufferOverflow` if the queue would exceed its capacity. The caller
    /// fails the context; overflowing here means the demand protocol was
    /// violated.
    pub fn add(&mut self, items: impl IntoIterator<Item = T>) -> PipelineResult<()> {
        self.queue.extend(items);
        if self.queue.len() > self.capacity {
            return Err(PipelineError::buffer_overflow(self.stage));
        }
        Ok(())
    }

    /// Record downstream demand for `amount` more items.
    pub fn request(&mut self, amount: usize) {
        self.demand = self.demand.saturating_add(amount);
    }

    /// Pop the next delivery if demand exists, the buffer is non-empty and
    /// no delivery is in flight.
    pub fn try_flush(&mut self) -> Option<Vec<T>> {
        if self.delivering || self.demand == 0 || self.queue.is_empty() {
            return None;
        }
        let count = self.demand.min(self.queue.len()).min(self.batch_limit);
        self.demand -= count;
        self.delivering = true;
        Some(self.queue.drain(..count).collect())
    }

    /// Mark the in-flight delivery as accepted downstream.
    ///
    /// Returns `true` when the buffer has free capacity again, i.e. the
    /// owning stage should resume producing.
    pub fn delivery_done(&mut self) -> bool {
        self.delivering = false;
        self.free() > 0
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.queue.len())
    }

    pub fn pending_demand(&self) -> usize {
        self.demand
    }
}
