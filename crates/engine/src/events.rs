//! Event delivery gated on commit
//!
//! Transactions must not announce changes that may still roll back, so
//! the buffer holds events until the store commit succeeds. Batches
//! commit each command independently and deliver as they go.

use std::sync::Arc;

use folio_core::event::Event;
use folio_core::traits::EventSink;
use tracing::{debug, warn};

/// When events reach the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Deliver as each event arrives (batch processing)
    Immediate,
    /// Hold events until [`EventBuffer::commit_events`] (transactions)
    Deferred,
}

/// Sink that drops every event
pub struct NullSink;

impl EventSink for NullSink {
    fn handle_events(&self, _events: Vec<Event>) -> folio_core::error::FolioResult<()> {
        Ok(())
    }
}

/// Collects events produced by commands and forwards them to the sink
pub struct EventBuffer {
    sink: Arc<dyn EventSink>,
    mode: DeliveryMode,
    pending: Vec<Event>,
}

impl EventBuffer {
    pub fn new(sink: Arc<dyn EventSink>, mode: DeliveryMode) -> Self {
        EventBuffer {
            sink,
            mode,
            pending: Vec::new(),
        }
    }

    /// Accept an event from a command
    ///
    /// Sink failures are logged and swallowed; event delivery never
    /// fails a request whose store changes already committed.
    pub fn handle(&mut self, event: Event) {
        match self.mode {
            DeliveryMode::Immediate => self.deliver(vec![event]),
            DeliveryMode::Deferred => {
                debug!(target: "folio::txn", ?event, "buffered event until commit");
                self.pending.push(event);
            }
        }
    }

    /// Flush buffered events after a successful commit
    pub fn commit_events(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.pending);
        debug!(target: "folio::txn", count = events.len(), "delivering events after commit");
        self.deliver(events);
    }

    /// Drop buffered events after a rollback
    pub fn discard(&mut self) {
        if !self.pending.is_empty() {
            debug!(target: "folio::txn", count = self.pending.len(), "discarding events after rollback");
            self.pending.clear();
        }
    }

    fn deliver(&self, events: Vec<Event>) {
        if let Err(err) = self.sink.handle_events(events) {
            warn!(target: "folio::txn", %err, "event sink failed");
        }
    }
}
