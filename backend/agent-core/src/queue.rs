//! Lock-guarded FIFO shared between the network, sender and consumer threads.
//!
//! One [`MessageQueue`] type backs both directions:
//!
//! - [`InboundQueue`] - decoded commands, pushed by the network thread and
//!   popped by the external consumer context
//! - [`OutboundQueue`] - events, pushed by the dispatcher and drained by the
//!   sender loop
//!
//! Every operation takes the queue's lock for the duration of that operation
//! only. Callers never get a guard back, so no lock can be held across I/O or a
//! handler call.

use crate::proto::{Command, Event};

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Commands waiting for the consumer context.
pub type InboundQueue = MessageQueue<Command>;

/// Events waiting for the sender loop.
pub type OutboundQueue = MessageQueue<Event>;

/// Unbounded FIFO guarded by a single mutex.
#[derive(Debug)]
pub struct MessageQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `item` at the back.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
    }

    /// Removes and returns the front item, if any.
    ///
    /// The emptiness check and the removal happen under one lock acquisition,
    /// so two consumers can never pop the same element.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Swaps the whole queue out for an empty one and returns the old contents
    /// in FIFO order.
    pub fn take_all(&self) -> VecDeque<T> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts `items` back at the front, ahead of anything pushed since they
    /// were taken, keeping their order.
    pub fn requeue_front(&self, mut items: VecDeque<T>) {
        if items.is_empty() {
            return;
        }
        let mut queue = self.lock();
        items.append(&mut queue);
        *queue = items;
    }

    // A panic while holding the guard cannot leave the VecDeque half-mutated,
    // so a poisoned lock still guards valid contents.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
