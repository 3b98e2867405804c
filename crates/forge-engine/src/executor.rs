use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use forge_core::events::ConnectionEvent;
use forge_core::messages::ToolCallRequest;
use forge_core::tools::{ToolContext, ToolDefinition};
use forge_store::{AuditLog, AuditRecord, LastFailedTool, SessionStore};

use crate::registry::ToolRegistry;
use crate::sink::EventSink;
use crate::transient;

/// Retry budget and backoff for tool execution.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4000),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Final failure of a tool call, after retries if any were allowed.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{name} failed after {attempts} attempt(s): {message}")]
pub struct ToolFailure {
    pub name: String,
    pub message: String,
    pub attempts: u32,
    pub transient: bool,
    pub suggestions: Vec<String>,
}

/// Runs one tool call with retry, emitting retry/error events and
/// recording every invocation in the session audit log.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    audit: AuditLog,
    policy: RetryPolicy,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        audit: AuditLog,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            sessions,
            audit,
            policy,
        }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[instrument(skip(self, call, ctx, sink), fields(session_id = %ctx.session_id, tool = %call.name))]
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        sink: &dyn EventSink,
    ) -> Result<String, ToolFailure> {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!("model requested unknown tool");
            let output = format!("unknown tool: {}", call.name);
            self.audit
                .append(
                    &ctx.session_id,
                    &AuditRecord::tool_invocation(&call.name, call.arguments.clone(), 1).with_output(&output),
                )
                .await;
            return Ok(output);
        };

        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 0;
        loop {
            let message = match tool.execute(&call.arguments, ctx).await {
                Ok(output) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "tool succeeded after retry");
                    }
                    self.audit
                        .append(
                            &ctx.session_id,
                            &AuditRecord::tool_invocation(&call.name, call.arguments.clone(), attempt + 1)
                                .with_output(&output),
                        )
                        .await;
                    return Ok(output);
                }
                Err(e) => e.to_string(),
            };

            let is_transient = transient::is_transient(&message);
            if is_transient && attempt < self.policy.max_retries {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "retrying tool after transient error"
                );
                sink.emit(ConnectionEvent::ToolRetry {
                    name: call.name.clone(),
                    attempt: attempt + 1,
                    max: max_attempts,
                    message: message.clone(),
                });
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let failure = ToolFailure {
                name: call.name.clone(),
                suggestions: transient::remediation_hints(&call.name, &message),
                message,
                attempts: attempt + 1,
                transient: is_transient,
            };
            self.report_failure(call, ctx, sink, &failure).await;
            return Err(failure);
        }
    }

    async fn report_failure(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        sink: &dyn EventSink,
        failure: &ToolFailure,
    ) {
        warn!(
            attempts = failure.attempts,
            transient = failure.transient,
            error = %failure.message,
            "tool failed"
        );
        sink.emit(ConnectionEvent::ToolError {
            name: failure.name.clone(),
            attempt: failure.attempts,
            max: self.policy.max_attempts(),
            transient: failure.transient,
            message: failure.message.clone(),
            suggestions: failure.suggestions.clone(),
        });

        if !failure.transient {
            debug!("recording failure for replay");
            self.sessions.set_last_failed(
                &ctx.session_id,
                LastFailedTool {
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    error_message: failure.message.clone(),
                },
            );
        }

        self.audit
            .append(
                &ctx.session_id,
                &AuditRecord::tool_invocation(&call.name, call.arguments.clone(), failure.attempts)
                    .with_error(&failure.message),
            )
            .await;
    }
}
