use std::collections::VecDeque;

use crate::errors::{Error, Result};
use crate::event::ParseEvent;

/// Storage reserved up front. Larger queues grow on demand.
const INITIAL_SLOTS: usize = 256;

/// Bounded FIFO of parse events.
///
/// The tokenizer callbacks write during one feed, the consumer drains between feeds and
/// [`EventQueue::reset`] empties the queue before the next feed. Storage grows with the
/// events actually queued and is kept across resets; `capacity` only bounds the count.
#[derive(Debug)]
pub(crate) struct EventQueue {
    events: VecDeque<ParseEvent>,
    capacity: usize,
}

impl EventQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self> {
        let mut events = VecDeque::new();
        events
            .try_reserve(capacity.min(INITIAL_SLOTS))
            .map_err(|e| Error::OutOfMemory(format!("Out of memory for the event queue: {}", e)))?;
        Ok(Self { events, capacity })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    /// Fails with [`Error::InternalOverflow`] when `capacity` events are queued.
    pub(crate) fn push(&mut self, event: ParseEvent) -> Result<()> {
        if self.is_full() {
            return Err(Error::InternalOverflow(format!(
                "XML queue overflow after {} events. This most likely indicates an internal bug.",
                self.events.len()
            )));
        }
        self.events
            .try_reserve(1)
            .map_err(|e| Error::OutOfMemory(format!("Out of memory for the event queue: {}", e)))?;
        self.events.push_back(event);
        Ok(())
    }

    pub(crate) fn pop(&mut self) -> Option<ParseEvent> {
        self.events.pop_front()
    }

    /// Events that were never read are dropped.
    pub(crate) fn reset(&mut self) {
        self.events.clear();
    }
}
