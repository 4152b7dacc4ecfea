//! Signal Actuator adapter surface
//!
//! The engine speaks four abstract commands. Translation to lamps, relays or
//! a remote controller belongs to the adapter. Delivery is fire-and-forget:
//! the engine pushes commands into an unbounded channel and a single
//! dispatcher task delivers them in order, each under a time budget.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::model::{Approach, Severity};

/// Who a grant is issued to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grantee {
    /// An emergency requester holding the corridor.
    Requester {
        requester_id: String,
        severity: Severity,
        approach: Approach,
    },
    /// A default-cycle phase opening one corridor.
    Cycle { corridor: Approach },
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requester {
                requester_id,
                severity,
                approach,
            } => write!(f, "{requester_id} (severity {severity}) via {approach}"),
            Self::Cycle { corridor } => write!(f, "cycle:{corridor}"),
        }
    }
}

/// Abstract signal-state command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SignalCommand {
    Grant { grantee: Grantee },
    Release,
    Deny { requester_id: String },
    Idle,
}

impl SignalCommand {
    pub fn grant_requester(
        requester_id: impl Into<String>,
        severity: Severity,
        approach: Approach,
    ) -> Self {
        Self::Grant {
            grantee: Grantee::Requester {
                requester_id: requester_id.into(),
                severity,
                approach,
            },
        }
    }

    pub fn grant_cycle(corridor: Approach) -> Self {
        Self::Grant {
            grantee: Grantee::Cycle { corridor },
        }
    }

    pub fn deny(requester_id: impl Into<String>) -> Self {
        Self::Deny {
            requester_id: requester_id.into(),
        }
    }

    /// Requester id for emergency grants and denials.
    pub fn requester_id(&self) -> Option<&str> {
        match self {
            Self::Grant {
                grantee: Grantee::Requester { requester_id, .. },
            }
            | Self::Deny { requester_id } => Some(requester_id),
            _ => None,
        }
    }
}

impl fmt::Display for SignalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grant { grantee } => write!(f, "grant({grantee})"),
            Self::Release => write!(f, "release()"),
            Self::Deny { requester_id } => write!(f, "deny({requester_id})"),
            Self::Idle => write!(f, "idle()"),
        }
    }
}

/// Actuator delivery failures. Logged, never fatal to the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("Command not delivered: {0}")]
    Delivery(String),

    #[error("Actuator did not respond within {0:?}")]
    Timeout(Duration),
}

/// External collaborator that turns commands into physical outputs.
#[async_trait]
pub trait SignalActuator: Send + Sync {
    /// Adapter name for logging.
    fn name(&self) -> &'static str;

    async fn apply(&self, command: &SignalCommand) -> Result<(), ActuatorError>;
}

/// Engine-side handle: queues commands without blocking.
#[derive(Debug, Clone)]
pub struct CommandSink {
    tx: mpsc::UnboundedSender<SignalCommand>,
}

impl CommandSink {
    /// Queue a command for delivery.
    pub fn emit(&self, command: SignalCommand) {
        debug!(%command, "Signal command queued");
        if self.tx.send(command).is_err() {
            warn!("Actuator dispatcher stopped; command dropped");
        }
    }

    /// Sink whose commands land in the returned receiver. Used by tests and
    /// embedders that deliver commands themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SignalCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Delivers queued commands to a [`SignalActuator`] in order.
pub struct ActuatorDispatcher;

impl ActuatorDispatcher {
    /// Spawn the dispatcher task. It exits once every [`CommandSink`] clone
    /// is dropped and the backlog is delivered.
    pub fn spawn(
        actuator: Arc<dyn SignalActuator>,
        budget: Duration,
    ) -> (CommandSink, JoinHandle<()>) {
        let (sink, mut rx) = CommandSink::channel();
        let handle = tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                deliver(actuator.as_ref(), &command, budget).await;
            }
            debug!(actuator = actuator.name(), "Actuator dispatcher drained");
        });
        (sink, handle)
    }
}

async fn deliver(actuator: &dyn SignalActuator, command: &SignalCommand, budget: Duration) {
    match tokio::time::timeout(budget, actuator.apply(command)).await {
        Ok(Ok(())) => debug!(actuator = actuator.name(), %command, "Signal command delivered"),
        Ok(Err(e)) => warn!(actuator = actuator.name(), %command, "Actuator failure: {}", e),
        Err(_) => warn!(
            actuator = actuator.name(),
            %command,
            "Actuator failure: {}",
            ActuatorError::Timeout(budget)
        ),
    }
}

/// A command as observed by [`RecordingActuator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub at: Instant,
    pub command: SignalCommand,
}

/// In-memory actuator that records every command with its arrival time.
#[derive(Debug, Default)]
pub struct RecordingActuator {
    log: Mutex<Vec<RecordedCommand>>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Everything recorded so far.
    pub fn recorded(&self) -> Vec<RecordedCommand> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Just the commands, in order.
    pub fn commands(&self) -> Vec<SignalCommand> {
        self.recorded().into_iter().map(|r| r.command).collect()
    }
}

#[async_trait]
impl SignalActuator for RecordingActuator {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn apply(&self, command: &SignalCommand) -> Result<(), ActuatorError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCommand {
                at: Instant::now(),
                command: command.clone(),
            });
        Ok(())
    }
}
