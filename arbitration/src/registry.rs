//! Pending Case Registry: cases waiting for an identity scan
//!
//! Case Intake registers a case before the requester's identity is known.
//! When the Identity Scanner links a requester to the case it is removed
//! atomically and returned as a [`Claim`] that inherits the case's
//! registration stamp. The caller inserts that claim into the queue; the
//! registry never touches the queue itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{require_non_empty, ArbiterError, ArbiterResult};
use crate::model::{Claim, PendingCase, PendingCaseSummary};

/// Shared reference to CaseRegistry
pub type SharedCaseRegistry = Arc<CaseRegistry>;

/// Map from case id to pending case, guarded by a single lock.
#[derive(Debug, Default)]
pub struct CaseRegistry {
    cases: Mutex<HashMap<String, PendingCase>>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this registry
    pub fn shared(self) -> SharedCaseRegistry {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCase>> {
        self.cases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a case. Fails if the case id is already present.
    pub fn register(&self, case: PendingCase) -> ArbiterResult<()> {
        require_non_empty("case_id", &case.case_id)?;

        let mut cases = self.lock();
        if cases.contains_key(&case.case_id) {
            return Err(ArbiterError::DuplicateCaseId {
                case_id: case.case_id,
            });
        }
        info!(
            case_id = %case.case_id,
            severity = %case.severity,
            destination = %case.destination,
            "Pending case registered"
        );
        cases.insert(case.case_id.clone(), case);
        Ok(())
    }

    /// Remove the case and build its claim for `requester_id`.
    pub fn link_identity(&self, case_id: &str, requester_id: &str) -> ArbiterResult<Claim> {
        require_non_empty("requester_id", requester_id)?;

        let case = self
            .lock()
            .remove(case_id)
            .ok_or_else(|| ArbiterError::CaseNotFound {
                case_id: case_id.to_string(),
            })?;

        info!(case_id, requester_id, "Identity linked to pending case");
        Ok(case.into_claim(requester_id))
    }

    /// Look up a single case without removing it.
    pub fn get(&self, case_id: &str) -> Option<PendingCaseSummary> {
        self.lock().get(case_id).map(PendingCase::summary)
    }

    /// Snapshot of pending cases in registration order.
    pub fn list_pending(&self) -> Vec<PendingCaseSummary> {
        let mut cases: Vec<PendingCase> = self.lock().values().cloned().collect();
        cases.sort_by_key(|c| c.created);
        cases.iter().map(PendingCase::summary).collect()
    }

    /// Remove and report cases registered more than `max_age` ago.
    pub fn evict_older_than(&self, max_age: Duration) -> Vec<PendingCaseSummary> {
        let now = Instant::now();
        let mut evicted: Vec<PendingCase> = Vec::new();

        self.lock().retain(|_, case| {
            let expired = now.saturating_duration_since(case.created_at()) > max_age;
            if expired {
                evicted.push(case.clone());
            }
            !expired
        });

        if !evicted.is_empty() {
            debug!(count = evicted.len(), "Evicted stale pending cases");
        }
        evicted.sort_by_key(|c| c.created);
        evicted.iter().map(PendingCase::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
