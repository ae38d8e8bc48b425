use tokio::sync::oneshot;

use crate::events::TrackingEvent;

/// An event waiting for the next flush, with the channel used to acknowledge its delivery.
pub(crate) struct QueuedEvent {
    pub event: TrackingEvent,
    pub ack: oneshot::Sender<()>,
}

/// FIFO queue of events waiting for the next flush.
///
/// Not synchronized on its own: it lives inside the dispatcher state, behind the dispatcher lock.
pub(crate) struct BatchEventProcessor {
    max_batch_size: usize,
    queue: Vec<QueuedEvent>,
}

impl BatchEventProcessor {
    pub fn new(max_batch_size: usize) -> Self {
        BatchEventProcessor {
            max_batch_size: max_batch_size.max(1),
            queue: Vec::new(),
        }
    }

    /// Enqueue an event. Returns `true` once the queue has reached its maximum size and must be
    /// flushed.
    pub fn push(&mut self, event: QueuedEvent) -> bool {
        self.queue.push(event);
        self.queue.len() >= self.max_batch_size
    }

    /// Take all queued events, leaving the queue empty.
    pub fn take_batch(&mut self) -> Vec<QueuedEvent> {
        std::mem::take(&mut self.queue)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
