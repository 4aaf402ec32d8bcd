//! Conversation history and the types flowing between agent and synthesis.
//!
//! The history is append-only with at most one open turn at a time. The
//! orchestrator is the single writer; stages only ever see snapshots.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// One contiguous span of speech in the conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// True when the turn was cut off by a barge-in or explicit stop.
    pub interrupted: bool,
}

impl ConversationTurn {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Append-only conversation record.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a turn for `role`. Fails if any turn is still open — finalized
    /// user and agent turns never overlap.
    pub fn open(&mut self, role: Role, at: DateTime<Utc>) -> EngineResult<()> {
        if self.turns.last().is_some_and(ConversationTurn::is_open) {
            return Err(EngineError::Protocol(format!(
                "cannot open {role:?} turn: previous turn still open"
            )));
        }
        self.turns.push(ConversationTurn {
            role,
            content: String::new(),
            started_at: at,
            ended_at: None,
            interrupted: false,
        });
        Ok(())
    }

    /// Append text to the open turn.
    pub fn append_to_open(&mut self, text: &str) -> EngineResult<()> {
        match self.turns.last_mut() {
            Some(turn) if turn.is_open() => {
                turn.content.push_str(text);
                Ok(())
            }
            _ => Err(EngineError::Protocol("no open turn to append to".into())),
        }
    }

    /// Close the open turn. `content` replaces the accumulated text when
    /// given (interruption truncates to what was actually spoken).
    pub fn close_open(
        &mut self,
        content: Option<String>,
        interrupted: bool,
        at: DateTime<Utc>,
    ) -> EngineResult<()> {
        match self.turns.last_mut() {
            Some(turn) if turn.is_open() => {
                if let Some(content) = content {
                    turn.content = content;
                }
                turn.interrupted = interrupted;
                turn.ended_at = Some(at);
                Ok(())
            }
            _ => Err(EngineError::Protocol("no open turn to close".into())),
        }
    }

    /// Record a complete turn in one step.
    pub fn record(
        &mut self,
        role: Role,
        content: impl Into<String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> EngineResult<()> {
        self.open(role, started_at)?;
        self.append_to_open(&content.into())?;
        self.close_open(None, false, ended_at)
    }

    /// Append a late correction to the most recent closed user turn. Returns
    /// false when there is no such turn.
    pub fn amend_last_user(&mut self, text: &str) -> bool {
        for turn in self.turns.iter_mut().rev() {
            if turn.role == Role::User && !turn.is_open() {
                if !turn.content.is_empty() && !text.is_empty() {
                    turn.content.push(' ');
                }
                turn.content.push_str(text);
                return true;
            }
        }
        false
    }

    /// Role of the currently open turn, if any.
    pub fn open_role(&self) -> Option<Role> {
        self.turns
            .last()
            .filter(|t| t.is_open())
            .map(|t| t.role)
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Clone of the full record, handed to stages as read-only context.
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.clone()
    }
}

/// Ordered response text from the agent, clause/sentence granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFragment {
    pub seq: u64,
    pub text: String,
    pub is_last: bool,
}

impl ResponseFragment {
    pub fn new(seq: u64, text: impl Into<String>, is_last: bool) -> Self {
        Self {
            seq,
            text: text.into(),
            is_last,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionCause {
    /// Sustained user speech (or a confident partial) while the agent was
    /// thinking or speaking.
    BargeIn,
    /// Host-driven stop.
    ExplicitStop,
}

/// One-shot signal consumed by the orchestrator to drive cancellation.
#[derive(Debug, Clone)]
pub struct InterruptionSignal {
    /// Agent turn id active when the interruption fired.
    pub turn_id: u64,
    pub cause: InterruptionCause,
    pub at: DateTime<Utc>,
}

impl InterruptionSignal {
    pub fn new(turn_id: u64, cause: InterruptionCause) -> Self {
        Self {
            turn_id,
            cause,
            at: Utc::now(),
        }
    }
}
