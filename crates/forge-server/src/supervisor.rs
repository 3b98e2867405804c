use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forge_core::events::ConnectionEvent;
use forge_core::ids::SessionId;
use forge_engine::{EventSink, RunOutcome, StepLoop};

use crate::outbox::Outbox;

/// Connection timer settings.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Close the connection if no progress event is sent for this long.
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Heartbeat period while the step loop is streaming or running a tool.
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Owns one client connection per prompt: resolves the session, drives the
/// step loop, and runs the idle watchdog, keepalive and heartbeat timers.
pub struct ConnectionSupervisor {
    runner: Arc<StepLoop>,
    config: SupervisorConfig,
}

impl ConnectionSupervisor {
    pub fn new(runner: Arc<StepLoop>, config: SupervisorConfig) -> Self {
        Self { runner, config }
    }

    pub fn runner(&self) -> &Arc<StepLoop> {
        &self.runner
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start a connection for `prompt` and return the read side of its
    /// event stream. A newly created session announces its identifier first.
    pub fn open(
        self: &Arc<Self>,
        prompt: String,
        session: Option<SessionId>,
    ) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (outbox, rx) = Outbox::new(CancellationToken::new());

        let resolved = self.runner.sessions().resolve(session.as_ref());
        if resolved.created {
            outbox.emit(ConnectionEvent::SessionId {
                session_id: resolved.id.clone(),
            });
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive(resolved.id, prompt, outbox).await;
        });
        rx
    }

    async fn drive(&self, session: SessionId, prompt: String, outbox: Arc<Outbox>) {
        let _timers = ConnectionTimers::start(&outbox, &self.config);
        let cancel = outbox.cancel_token().clone();

        let outcome = tokio::select! {
            outcome = self.runner.run(&session, &prompt, outbox.as_ref(), &cancel) => Some(outcome),
            () = idle_watchdog(&outbox, self.config.idle_timeout) => None,
        };

        match outcome {
            Some(RunOutcome::Halted { steps }) => {
                info!(session_id = %session, steps, "halted; holding connection open");
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = idle_watchdog(&outbox, self.config.idle_timeout) => {}
                }
            }
            Some(outcome) => {
                info!(session_id = %session, outcome = ?outcome, "connection finished");
            }
            None => {}
        }
        outbox.close();
    }
}

/// Resolves once nothing but liveness pings has been sent for `idle`,
/// after emitting a terminal error and closing the outbox.
async fn idle_watchdog(outbox: &Outbox, idle: Duration) {
    loop {
        let deadline = outbox.last_progress() + idle;
        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep_until(deadline).await;
    }
    warn!(idle_secs = idle.as_secs(), "connection idle; closing");
    outbox.emit(ConnectionEvent::terminal_error(format!(
        "connection idle for {}s",
        idle.as_secs()
    )));
    outbox.close();
}

/// Keepalive and heartbeat tasks for one connection, aborted on drop.
struct ConnectionTimers {
    handles: Vec<JoinHandle<()>>,
}

impl ConnectionTimers {
    fn start(outbox: &Arc<Outbox>, config: &SupervisorConfig) -> Self {
        let keepalive = {
            let outbox = Arc::clone(outbox);
            let period = config.keepalive_interval;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if outbox.is_closed() {
                        break;
                    }
                    outbox.emit(outbox.keepalive());
                }
            })
        };

        let heartbeat = {
            let outbox = Arc::clone(outbox);
            let period = config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if outbox.is_closed() {
                        break;
                    }
                    if let Some(event) = outbox.heartbeat() {
                        outbox.emit(event);
                    }
                }
            })
        };

        Self {
            handles: vec![keepalive, heartbeat],
        }
    }
}

impl Drop for ConnectionTimers {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
