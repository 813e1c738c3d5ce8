//! Event buffering for one batch.

use keel_domain::{EventSink, TxEventData};

/// Buffers events generated while a batch executes.
///
/// Events are delivered to the sink only when the batch commits; resetting
/// the executor discards the buffer. Delivery order is firing order.
#[derive(Debug, Default)]
pub struct EventCache {
    events: Vec<(String, TxEventData)>,
}

impl EventCache {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one event.
    pub fn fire(&mut self, topic: String, data: TxEventData) {
        self.events.push((topic, data));
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drain every buffered event into the sink, in firing order.
    pub fn flush(&mut self, sink: &dyn EventSink) {
        for (topic, data) in self.events.drain(..) {
            sink.fire(&topic, data);
        }
    }
}
