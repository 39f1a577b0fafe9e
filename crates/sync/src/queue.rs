//! Bounded FIFO message queue.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use coop_kernel::sync::{Arc, Mutex as Lock};
use coop_kernel::Condition;

struct QueueInner<T> {
    items: VecDeque<T>,
    capacity: usize,
}

/// Fixed-capacity FIFO shared between tasks.
///
/// A queue created with capacity 0 never accepts an item.
pub struct MessageQueue<T> {
    inner: Arc<Lock<QueueInner<T>>>,
}

impl<T: Send + 'static> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Lock::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                capacity,
            })),
        }
    }

    /// Blocking send: the condition holds once `item` has been enqueued.
    pub fn send(&self, item: T) -> QueueSend<T> {
        QueueSend {
            inner: Arc::clone(&self.inner),
            item: Some(item),
        }
    }

    /// Blocking receive: the condition holds once one item has been moved
    /// into `slot`.
    pub fn recv(&self, slot: &RecvSlot<T>) -> QueueRecv<T> {
        QueueRecv {
            inner: Arc::clone(&self.inner),
            slot: slot.clone(),
            done: false,
        }
    }

    /// Enqueues `item`, or hands it back when the queue is full.
    pub fn nb_send(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.items.len() < inner.capacity {
            inner.items.push_back(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    pub fn nb_recv(&self) -> Option<T> {
        self.inner.lock().items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.items.len() >= inner.capacity
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }
}

impl<T> Clone for MessageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageQueue")
            .field("len", &inner.items.len())
            .field("capacity", &inner.capacity)
            .finish()
    }
}

/// Condition returned by [`MessageQueue::send`]. An item still held when the
/// condition is dropped is discarded.
pub struct QueueSend<T> {
    inner: Arc<Lock<QueueInner<T>>>,
    item: Option<T>,
}

impl<T: Send> Condition for QueueSend<T> {
    fn poll(&mut self) -> bool {
        if self.item.is_none() {
            return true;
        }
        let mut inner = self.inner.lock();
        if inner.items.len() < inner.capacity {
            inner.items.extend(self.item.take());
        }
        self.item.is_none()
    }
}

/// Condition returned by [`MessageQueue::recv`].
pub struct QueueRecv<T> {
    inner: Arc<Lock<QueueInner<T>>>,
    slot: RecvSlot<T>,
    done: bool,
}

impl<T: Send> Condition for QueueRecv<T> {
    fn poll(&mut self) -> bool {
        if !self.done {
            if let Some(item) = self.inner.lock().items.pop_front() {
                self.slot.items.lock().push_back(item);
                self.done = true;
            }
        }
        self.done
    }
}

/// Output buffer filled by [`QueueRecv`]. Clones share the buffer, so a task
/// keeps one and hands it to every receive it blocks on.
pub struct RecvSlot<T> {
    items: Arc<Lock<VecDeque<T>>>,
}

impl<T> RecvSlot<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Lock::new(VecDeque::new())),
        }
    }

    /// Oldest received item.
    pub fn take(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for RecvSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for RecvSlot<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}
