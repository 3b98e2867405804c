use parking_lot::Mutex;

use forge_core::events::{ConnectionEvent, Phase};

/// Destination for outward connection events.
///
/// Emission is synchronous and never fails; a sink whose consumer has gone
/// away reports `is_closed` and the step loop stops acting on results.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ConnectionEvent);

    /// Phase changes drive heartbeat emission.
    fn enter_phase(&self, _phase: Phase) {}

    /// Model output arrived that may not produce an outward event.
    fn note_progress(&self) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Sink that keeps every event in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ConnectionEvent>>,
    phases: Mutex<Vec<Phase>>,
    progress_notes: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().clone()
    }

    pub fn into_events(self) -> Vec<ConnectionEvent> {
        self.events.into_inner()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ConnectionEvent::kind).collect()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.phases.lock().clone()
    }

    pub fn progress_notes(&self) -> usize {
        *self.progress_notes.lock()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ConnectionEvent) {
        self.events.lock().push(event);
    }

    fn enter_phase(&self, phase: Phase) {
        self.phases.lock().push(phase);
    }

    fn note_progress(&self) {
        *self.progress_notes.lock() += 1;
    }
}
