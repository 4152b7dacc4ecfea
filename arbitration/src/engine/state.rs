//! Arbiter State Machine: explicit states and legal transition guards.
//!
//! Every transition the engine makes is checked against the transition
//! table and recorded in a bounded log, so a session's history can be
//! audited after the fact.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Transitions kept in memory; older records are dropped first.
const TRANSITION_LOG_CAPACITY: usize = 512;

/// Engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterState {
    /// No active session; the default cycle runs.
    Idle,
    /// A claim holds the corridor within its hold window.
    Granted,
}

impl fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Granted => write!(f, "Granted"),
        }
    }
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// A claim was waiting while idle.
    QueueNonEmpty,
    /// The hold window elapsed.
    HoldExpired,
    /// A strictly more urgent claim arrived.
    Preempted,
    /// Cooperative shutdown.
    Shutdown,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueNonEmpty => write!(f, "queue_non_empty"),
            Self::HoldExpired => write!(f, "hold_expired"),
            Self::Preempted => write!(f, "preempted"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Legal edges:
/// ```text
/// Idle    → Granted   (queue_non_empty)
/// Granted → Granted   (hold_expired: next holder | preempted)
/// Granted → Idle      (hold_expired | shutdown)
/// ```
fn is_legal_transition(from: ArbiterState, to: ArbiterState, reason: TransitionReason) -> bool {
    use ArbiterState::*;
    use TransitionReason::*;

    matches!(
        (from, to, reason),
        (Idle, Granted, QueueNonEmpty)
            | (Granted, Granted, HoldExpired)
            | (Granted, Granted, Preempted)
            | (Granted, Idle, HoldExpired)
            | (Granted, Idle, Shutdown)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ArbiterState,
    pub to: ArbiterState,
    pub reason: TransitionReason,
    /// Requester that holds the corridor after the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: ArbiterState,
    pub to: ArbiterState,
    pub reason: TransitionReason,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Illegal state transition: {} → {} ({})",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state and the transition log.
#[derive(Debug)]
pub struct StateMachine {
    current: ArbiterState,
    created_at: Instant,
    transitions: VecDeque<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Idle`.
    pub fn new() -> Self {
        Self {
            current: ArbiterState::Idle,
            created_at: Instant::now(),
            transitions: VecDeque::new(),
        }
    }

    pub fn current(&self) -> ArbiterState {
        self.current
    }

    /// Attempt to advance to `to`.
    pub fn advance(
        &mut self,
        to: ArbiterState,
        reason: TransitionReason,
        holder: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to, reason) {
            return Err(IllegalTransition {
                from: self.current,
                to,
                reason,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            %reason,
            holder,
            "State transition"
        );

        if self.transitions.len() == TRANSITION_LOG_CAPACITY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(TransitionRecord {
            from: self.current,
            to,
            reason,
            holder: holder.map(String::from),
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
        });
        self.current = to;
        Ok(())
    }

    /// Recorded transitions, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.transitions.iter()
    }

    /// One-line history, e.g. `Idle → Granted → Idle (2 transitions)`.
    pub fn summary(&self) -> String {
        let mut out = match self.transitions.front() {
            Some(first) => first.from.to_string(),
            None => self.current.to_string(),
        };
        for t in &self.transitions {
            out.push_str(" → ");
            out.push_str(&t.to.to_string());
        }
        format!("{} ({} transitions)", out, self.transitions.len())
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
