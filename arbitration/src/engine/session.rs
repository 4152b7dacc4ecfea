//! The active grant.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::model::{Approach, Claim};

/// Exists exactly while the engine is `Granted`.
#[derive(Debug, Clone)]
pub struct ArbitrationSession {
    id: String,
    holder: Claim,
    approach: Approach,
    granted_at: Instant,
    /// This session began by displacing an earlier holder.
    preempted: bool,
    renewals: u32,
    /// Claims already told to wait during this session (by seq).
    denied: HashSet<u64>,
    /// Holders displaced on the way to this session (by seq). They went back
    /// to the queue and are not denied again.
    displaced: HashSet<u64>,
}

impl ArbitrationSession {
    pub(crate) fn new(holder: Claim, approach: Approach, granted_at: Instant) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            holder,
            approach,
            granted_at,
            preempted: false,
            renewals: 0,
            denied: HashSet::new(),
            displaced: HashSet::new(),
        }
    }

    /// Session that took over from `previous` by preemption.
    pub(crate) fn preempting(
        holder: Claim,
        approach: Approach,
        granted_at: Instant,
        previous: ArbitrationSession,
    ) -> Self {
        let mut displaced = previous.displaced;
        displaced.insert(previous.holder.seq());
        Self {
            preempted: true,
            displaced,
            ..Self::new(holder, approach, granted_at)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn holder(&self) -> &Claim {
        &self.holder
    }

    pub fn approach(&self) -> &Approach {
        &self.approach
    }

    pub fn granted_at(&self) -> Instant {
        self.granted_at
    }

    pub fn preempted(&self) -> bool {
        self.preempted
    }

    pub fn renewals(&self) -> u32 {
        self.renewals
    }

    pub fn expires_at(&self, hold_window: Duration) -> Instant {
        self.granted_at + hold_window
    }

    pub fn held_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.granted_at)
    }

    /// Restart the hold window from `now`.
    pub(crate) fn renew(&mut self, now: Instant) {
        self.granted_at = now;
        self.renewals += 1;
    }

    /// Whether `claim` should get a deny this session. Records it if so.
    pub(crate) fn should_deny(&mut self, claim: &Claim) -> bool {
        !self.displaced.contains(&claim.seq()) && self.denied.insert(claim.seq())
    }
}
