//! Event types for arbitration observability
//!
//! Every state change the engine or the intake surface makes is published as
//! one of these events. They are informational only; the engine's state is
//! the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Approach, ClaimSummary, PendingCaseSummary, Severity};

/// Why an active grant ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Hold window elapsed
    HoldExpired,
    /// A strictly more urgent claim took over
    Preempted,
    /// Arbiter shut down
    Shutdown,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HoldExpired => write!(f, "hold_expired"),
            Self::Preempted => write!(f, "preempted"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// All arbitration events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArbiterEvent {
    /// A claim entered the queue (direct submission or linked case)
    ClaimSubmitted {
        claim: ClaimSummary,
        timestamp: DateTime<Utc>,
    },

    /// Case Intake registered a pending case
    CaseRegistered {
        case: PendingCaseSummary,
        timestamp: DateTime<Utc>,
    },

    /// The Identity Scanner linked a requester to a pending case
    CaseLinked {
        case_id: String,
        requester_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending case aged out before being linked
    CaseEvicted {
        case: PendingCaseSummary,
        timestamp: DateTime<Utc>,
    },

    /// A claim was granted the corridor
    Granted {
        session_id: String,
        claim: ClaimSummary,
        approach: Approach,
        timestamp: DateTime<Utc>,
    },

    /// An active grant ended
    Released {
        session_id: String,
        requester_id: String,
        reason: ReleaseReason,
        held_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A more urgent claim displaced the holder, which went back to the queue
    Preempted {
        displaced: ClaimSummary,
        by_requester: String,
        by_severity: Severity,
        timestamp: DateTime<Utc>,
    },

    /// A queued claim was told to wait behind the holder
    Denied {
        claim: ClaimSummary,
        holder: String,
        timestamp: DateTime<Utc>,
    },

    /// A rescan by the holder reset the hold window
    HoldRenewed {
        session_id: String,
        requester_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The default cycle moved to another phase
    CycleAdvanced {
        phase: String,
        timestamp: DateTime<Utc>,
    },

    /// Queue drained; the default cycle takes over
    EnteredIdle { timestamp: DateTime<Utc> },

    /// The arbitration loop left the actuator in its safe state and stopped
    ShutdownCompleted { timestamp: DateTime<Utc> },
}

impl ArbiterEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ClaimSubmitted { .. } => "claim_submitted",
            Self::CaseRegistered { .. } => "case_registered",
            Self::CaseLinked { .. } => "case_linked",
            Self::CaseEvicted { .. } => "case_evicted",
            Self::Granted { .. } => "granted",
            Self::Released { .. } => "released",
            Self::Preempted { .. } => "preempted",
            Self::Denied { .. } => "denied",
            Self::HoldRenewed { .. } => "hold_renewed",
            Self::CycleAdvanced { .. } => "cycle_advanced",
            Self::EnteredIdle { .. } => "entered_idle",
            Self::ShutdownCompleted { .. } => "shutdown_completed",
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ClaimSubmitted { timestamp, .. }
            | Self::CaseRegistered { timestamp, .. }
            | Self::CaseLinked { timestamp, .. }
            | Self::CaseEvicted { timestamp, .. }
            | Self::Granted { timestamp, .. }
            | Self::Released { timestamp, .. }
            | Self::Preempted { timestamp, .. }
            | Self::Denied { timestamp, .. }
            | Self::HoldRenewed { timestamp, .. }
            | Self::CycleAdvanced { timestamp, .. }
            | Self::EnteredIdle { timestamp }
            | Self::ShutdownCompleted { timestamp } => *timestamp,
        }
    }

    /// Requester the event concerns, if any
    pub fn requester_id(&self) -> Option<&str> {
        match self {
            Self::ClaimSubmitted { claim, .. }
            | Self::Granted { claim, .. }
            | Self::Denied { claim, .. } => Some(&claim.requester_id),
            Self::CaseLinked { requester_id, .. }
            | Self::Released { requester_id, .. }
            | Self::HoldRenewed { requester_id, .. } => Some(requester_id),
            Self::Preempted { displaced, .. } => Some(&displaced.requester_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ArbiterEvent::Released {
            session_id: "s-1".into(),
            requester_id: "amb-1".into(),
            reason: ReleaseReason::HoldExpired,
            held_ms: 10_000,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "released");
        assert_eq!(json["reason"], "hold_expired");
        assert_eq!(event.event_type(), "released");
        assert_eq!(event.requester_id(), Some("amb-1"));
    }

    #[test]
    fn test_idle_event_has_no_requester() {
        let event = ArbiterEvent::EnteredIdle {
            timestamp: Utc::now(),
        };
        assert_eq!(event.requester_id(), None);
        assert_eq!(event.event_type(), "entered_idle");
    }
}
