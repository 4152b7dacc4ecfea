//! Request Model: claims, pending cases, and the clock that orders them
//!
//! A [`Claim`] is an immutable, prioritized request for exclusive corridor
//! access. Claims are totally ordered: more urgent severity first, then
//! earlier submission, then insertion sequence. Severity follows the
//! "higher number = more urgent" convention inside a configured
//! [`SeverityScale`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ArbiterError, ArbiterResult};

/// Clinical severity. Higher values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Severity(u8);

impl Severity {
    /// Raw ordinal value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether `self` is strictly more urgent than `other`.
    pub fn outranks(self, other: Severity) -> bool {
        self.0 > other.0
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inclusive ordinal range accepted at the intake boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityScale {
    /// Least urgent accepted value.
    pub min: u8,
    /// Most urgent accepted value.
    pub max: u8,
}

impl SeverityScale {
    pub fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    /// Validate a raw value, rejecting anything outside `min..=max`.
    pub fn parse(&self, value: i64) -> ArbiterResult<Severity> {
        if value < i64::from(self.min) || value > i64::from(self.max) {
            return Err(ArbiterError::InvalidSeverity {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(Severity(value as u8))
    }
}

impl Default for SeverityScale {
    fn default() -> Self {
        Self { min: 1, max: 5 }
    }
}

/// Road approach (or corridor) a signal command applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Approach(String);

impl Approach {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic stamp: timestamp plus a strictly increasing sequence number.
///
/// The sequence breaks ties between equal timestamps so no two stamps
/// compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub at: Instant,
    pub seq: u64,
}

/// Shared source of [`Stamp`]s for claims and pending cases.
#[derive(Debug, Clone, Default)]
pub struct ClaimClock {
    next_seq: Arc<AtomicU64>,
}

impl ClaimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next stamp. Sequence numbers start at 1.
    pub fn stamp(&self) -> Stamp {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        Stamp {
            at: Instant::now(),
            seq,
        }
    }
}

/// Case details carried by claims that originate from a linked pending case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDetails {
    pub case_id: String,
    pub patient_name: String,
    pub destination: String,
}

/// A prioritized request for exclusive corridor access.
#[derive(Debug, Clone)]
pub struct Claim {
    requester_id: String,
    severity: Severity,
    submitted: Stamp,
    received_at: DateTime<Utc>,
    approach: Option<Approach>,
    case: Option<CaseDetails>,
}

impl Claim {
    /// Build a claim submitted directly by a requester.
    pub fn new(requester_id: impl Into<String>, severity: Severity, submitted: Stamp) -> Self {
        Self {
            requester_id: requester_id.into(),
            severity,
            submitted,
            received_at: Utc::now(),
            approach: None,
            case: None,
        }
    }

    /// Attach the approach the requester was scanned on.
    pub fn with_approach(mut self, approach: Approach) -> Self {
        self.approach = Some(approach);
        self
    }

    pub fn requester_id(&self) -> &str {
        &self.requester_id
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Monotonic submission time.
    pub fn submitted_at(&self) -> Instant {
        self.submitted.at
    }

    /// Insertion sequence, unique per claim.
    pub fn seq(&self) -> u64 {
        self.submitted.seq
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn approach(&self) -> Option<&Approach> {
        self.approach.as_ref()
    }

    pub fn case(&self) -> Option<&CaseDetails> {
        self.case.as_ref()
    }

    /// Whether this claim must be served before `other`.
    pub fn is_before(&self, other: &Claim) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    /// Whether this claim is urgent enough to preempt `holder`.
    pub fn preempts(&self, holder: &Claim) -> bool {
        self.severity.outranks(holder.severity)
    }

    /// Read-only view for the query surface.
    pub fn summary(&self) -> ClaimSummary {
        ClaimSummary {
            requester_id: self.requester_id.clone(),
            severity: self.severity,
            seq: self.submitted.seq,
            received_at: self.received_at,
            approach: self.approach.clone(),
            case_id: self.case.as_ref().map(|c| c.case_id.clone()),
        }
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (severity {})", self.requester_id, self.severity)?;
        if let Some(case) = &self.case {
            write!(f, " - {} -> {}", case.patient_name, case.destination)?;
        }
        Ok(())
    }
}

// "Greater" means "served first" so claims can live in a max-heap.
impl Ord for Claim {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity
            .cmp(&other.severity)
            .then_with(|| other.submitted.at.cmp(&self.submitted.at))
            .then_with(|| other.submitted.seq.cmp(&self.submitted.seq))
    }
}

impl PartialOrd for Claim {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Claim {
    fn eq(&self, other: &Self) -> bool {
        self.submitted.seq == other.submitted.seq
    }
}

impl Eq for Claim {}

/// Serializable snapshot of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub requester_id: String,
    pub severity: Severity,
    pub seq: u64,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approach: Option<Approach>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
}

/// A case awaiting identity linkage.
#[derive(Debug, Clone)]
pub struct PendingCase {
    pub case_id: String,
    pub patient_name: String,
    pub destination: String,
    pub severity: Severity,
    /// Registration stamp; inherited by the claim built on link.
    pub created: Stamp,
    pub registered_at: DateTime<Utc>,
}

impl PendingCase {
    pub fn new(
        case_id: impl Into<String>,
        patient_name: impl Into<String>,
        destination: impl Into<String>,
        severity: Severity,
        created: Stamp,
    ) -> Self {
        Self {
            case_id: case_id.into(),
            patient_name: patient_name.into(),
            destination: destination.into(),
            severity,
            created,
            registered_at: Utc::now(),
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created.at
    }

    /// Convert into a claim for `requester_id`, keeping the registration
    /// stamp so queue order reflects case urgency rather than scan latency.
    pub fn into_claim(self, requester_id: impl Into<String>) -> Claim {
        Claim {
            requester_id: requester_id.into(),
            severity: self.severity,
            submitted: self.created,
            received_at: self.registered_at,
            approach: None,
            case: Some(CaseDetails {
                case_id: self.case_id,
                patient_name: self.patient_name,
                destination: self.destination,
            }),
        }
    }

    pub fn summary(&self) -> PendingCaseSummary {
        PendingCaseSummary {
            case_id: self.case_id.clone(),
            patient_name: self.patient_name.clone(),
            destination: self.destination.clone(),
            severity: self.severity,
            registered_at: self.registered_at,
        }
    }
}

/// Serializable snapshot of a pending case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCaseSummary {
    pub case_id: String,
    pub patient_name: String,
    pub destination: String,
    pub severity: Severity,
    pub registered_at: DateTime<Utc>,
}
