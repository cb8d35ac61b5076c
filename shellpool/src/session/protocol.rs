// Session protocol - shared types exchanged between the pool, executions and callers

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unique session identifier, assigned by the registry
pub type SessionId = u64;

/// Lifecycle phase of one command execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// Created but not yet sent to a terminal
    Created,
    /// Wrapped command sent, start marker not seen yet
    AwaitingStart,
    /// Between the start and end markers
    Capturing,
    /// End marker observed
    Completed,
    /// Gave up waiting for the end marker
    TimedOut,
    /// The terminal failed while sending or streaming
    Failed,
}

impl ExecutionPhase {
    /// Whether the execution has settled and its buffers are frozen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Completed | ExecutionPhase::TimedOut | ExecutionPhase::Failed
        )
    }
}

impl std::fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPhase::Created => write!(f, "created"),
            ExecutionPhase::AwaitingStart => write!(f, "awaiting_start"),
            ExecutionPhase::Capturing => write!(f, "capturing"),
            ExecutionPhase::Completed => write!(f, "completed"),
            ExecutionPhase::TimedOut => write!(f, "timed_out"),
            ExecutionPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Ways an execution can fail to settle successfully
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// No end marker within the pool's command timeout
    #[error("command timed out after {timeout_ms} ms: {command}")]
    TimedOut { command: String, timeout_ms: u64 },
    /// The terminal failed while sending or streaming
    #[error("session {session_id} failed: {message}")]
    Session {
        session_id: SessionId,
        message: String,
    },
    /// The session already runs a command
    #[error("session {session_id} is already running a command")]
    Busy { session_id: SessionId },
    /// `run` was called twice on the same execution
    #[error("execution for session {session_id} was already started")]
    AlreadyStarted { session_id: SessionId },
    /// The settling side went away without an outcome
    #[error("execution was dropped before it settled")]
    Abandoned,
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::TimedOut { .. })
    }
}

/// Events emitted by a command execution, in stream order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// One sanitized, non-empty output line
    Line(String),
    /// The end marker was observed
    Completed,
    /// Line delivery stopped (detach or completion)
    Continue,
    /// The execution settled with an error
    Error(ExecutionError),
}

/// Summary row returned by `SessionPool::list_sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub last_command: String,
}
