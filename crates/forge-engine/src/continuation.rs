use tracing::info;

use crate::turn_buffer::TurnResult;

pub const DEFAULT_INCOMPLETE_RETRY_LIMIT: u32 = 1;

/// Prompt injected to resume a turn that ended early.
pub const CONTINUE_PROMPT: &str = "CONTINUE";

/// Prompt injected when the opening turn produced nothing at all.
pub const TOOL_HINT_PROMPT: &str = "Your previous reply was empty. Use at least one of the \
available tools to make progress on the request before giving a final answer.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Continuation {
    /// Use the turn as-is: run its tool call or treat its text as final.
    Proceed,
    /// Append the synthetic prompt and stream another turn.
    Resume { prompt: String },
}

/// Bounded budget of automatic resumptions, scoped to one connection.
#[derive(Debug)]
pub struct ContinuationController {
    limit: u32,
    retries_used: u32,
}

impl ContinuationController {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            retries_used: 0,
        }
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn decide(&mut self, turn: &TurnResult, first_step: bool) -> Continuation {
        if turn.has_tool_calls() {
            return Continuation::Proceed;
        }
        if self.retries_used >= self.limit {
            return Continuation::Proceed;
        }

        if turn.truncated {
            self.retries_used += 1;
            info!(
                retries_used = self.retries_used,
                limit = self.limit,
                size_capped = turn.size_capped,
                "resuming truncated turn"
            );
            return Continuation::Resume {
                prompt: CONTINUE_PROMPT.to_string(),
            };
        }

        if first_step && turn.text.trim().is_empty() {
            self.retries_used += 1;
            info!(retries_used = self.retries_used, "nudging empty opening turn");
            return Continuation::Resume {
                prompt: TOOL_HINT_PROMPT.to_string(),
            };
        }

        Continuation::Proceed
    }
}

impl Default for ContinuationController {
    fn default() -> Self {
        Self::new(DEFAULT_INCOMPLETE_RETRY_LIMIT)
    }
}
