//! Priority-ordered fan-out of received events.
//!
//! The registry decouples "an event arrived" from "which subsystems
//! care": any number of sinks attach at a numeric priority and every
//! dispatched event visits all of them, lowest priority first, in
//! attachment order within a priority.

use std::collections::BTreeMap;

use tracing::error;

use x11rb::protocol::Event;

use super::core::Result;

/// Sink ordering key. Lower values run first; the default is 0.
pub type Priority = i32;

/// A registered consumer of dispatched events.
///
/// Implemented for any `FnMut(&Event) -> Result<()>` closure. A sink
/// returning `Err` is logged and isolated; it never prevents the
/// remaining sinks from seeing the event.
pub trait EventSink {
    fn handle(&mut self, event: &Event) -> Result<()>;
}

impl<F> EventSink for F
where
    F: FnMut(&Event) -> Result<()>,
{
    fn handle(&mut self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Identity token for an attached sink, handed out by
/// [`Registry::attach`] and required to detach it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkId(u64);

/// The ordered collection of sinks.
#[derive(Default)]
pub struct Registry {
    sinks: BTreeMap<Priority, Vec<(SinkId, Box<dyn EventSink>)>>,
    next_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a sink at the given priority and returns its identity.
    ///
    /// Sinks sharing a priority keep their attachment order.
    pub fn attach(&mut self, priority: Priority, sink: Box<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_id);
        self.next_id += 1;
        self.sinks.entry(priority).or_default().push((id, sink));
        id
    }

    /// Detaches the exact `(priority, id)` pair.
    ///
    /// A pair that was never attached (or was attached under a
    /// different priority) is a no-op, not an error.
    pub fn detach(&mut self, priority: Priority, id: SinkId) {
        if let Some(bucket) = self.sinks.get_mut(&priority) {
            bucket.retain(|(sid, _)| *sid != id);
            if bucket.is_empty() {
                self.sinks.remove(&priority);
            }
        }
    }

    /// Invokes every attached sink with the event, in ascending
    /// priority order and attachment order within a priority.
    ///
    /// A failing sink is logged and skipped over; dispatch always
    /// reaches every sink. Sinks cannot attach or detach while a
    /// dispatch is in flight; the facade detects the attempt at
    /// runtime.
    pub fn dispatch(&mut self, event: &Event) {
        for (priority, bucket) in self.sinks.iter_mut() {
            for (id, sink) in bucket.iter_mut() {
                if let Err(e) = sink.handle(event) {
                    error!("sink {:?} (priority {}) failed: {}", id, priority, e);
                }
            }
        }
    }

    /// Number of currently attached sinks.
    pub fn len(&self) -> usize {
        self.sinks.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
