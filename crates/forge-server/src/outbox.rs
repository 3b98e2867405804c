use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use forge_core::events::{ConnectionEvent, Phase};
use forge_engine::EventSink;

struct Clock {
    last_progress: Instant,
    phase: Phase,
    phase_started: Instant,
}

/// Write side of one client connection's event stream.
///
/// Tracks when the last progress event went out (liveness pings excluded)
/// and which phase the step loop is in. Once closed, or once the client has
/// dropped the read side, every further event is discarded and the
/// connection's cancellation token fires.
pub struct Outbox {
    tx: Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>,
    clock: Mutex<Clock>,
    cancel: CancellationToken,
}

impl Outbox {
    pub fn new(cancel: CancellationToken) -> (Arc<Self>, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let outbox = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            clock: Mutex::new(Clock {
                last_progress: now,
                phase: Phase::Idle,
                phase_started: now,
            }),
            cancel,
        });
        (outbox, rx)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn last_progress(&self) -> Instant {
        self.clock.lock().last_progress
    }

    pub fn phase(&self) -> Phase {
        self.clock.lock().phase
    }

    /// Stop delivering events. Ends the client's stream once drained.
    pub fn close(&self) {
        if self.tx.lock().take().is_some() {
            debug!("outbox closed");
        }
    }

    /// A heartbeat describing the current phase, if one is active.
    pub fn heartbeat(&self) -> Option<ConnectionEvent> {
        let clock = self.clock.lock();
        if !clock.phase.is_active() {
            return None;
        }
        let now = Instant::now();
        Some(ConnectionEvent::Heartbeat {
            phase: clock.phase,
            phase_elapsed_ms: millis(now - clock.phase_started),
            since_last_event_ms: millis(now - clock.last_progress),
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    pub fn keepalive(&self) -> ConnectionEvent {
        ConnectionEvent::Keepalive {
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl EventSink for Outbox {
    fn emit(&self, event: ConnectionEvent) {
        let progress = !event.is_liveness();
        let mut slot = self.tx.lock();
        let Some(tx) = slot.as_ref() else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("client went away; discarding further events");
            slot.take();
            self.cancel.cancel();
            return;
        }
        drop(slot);
        if progress {
            self.clock.lock().last_progress = Instant::now();
        }
    }

    fn enter_phase(&self, phase: Phase) {
        let mut clock = self.clock.lock();
        if clock.phase != phase {
            clock.phase = phase;
            clock.phase_started = Instant::now();
        }
    }

    fn note_progress(&self) {
        self.clock.lock().last_progress = Instant::now();
    }

    fn is_closed(&self) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}
