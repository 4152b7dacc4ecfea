//! Arbiter service: intake/query handle plus the arbitration loop task
//!
//! ```text
//!  Case Intake ─┐                          ┌──────────────────────┐
//!  Scanner ─────┼─▶ Arbiter (handle) ─────▶│ queue ──Notify──┐    │
//!  Direct ──────┘     │ register/link      │ registry        ▼    │
//!                     │ submit/query       │   arbitration loop   │──▶ dispatcher ──▶ actuator
//!                     └─ subscribe ◀───────│   (engine + cycle)   │
//!                                          └──────────────────────┘
//! ```
//!
//! The loop wakes on claim arrival, on the next engine deadline, or after at
//! most one poll interval, whichever comes first.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorDispatcher, SignalActuator};
use crate::config::ArbiterConfig;
use crate::engine::{ArbiterState, ArbitrationEngine, EngineStatus};
use crate::error::{require_non_empty, ArbiterResult};
use crate::events::{ArbiterEvent, EventBus, EventFilter, FilteredReceiver, SharedEventBus};
use crate::model::{Approach, Claim, ClaimClock, ClaimSummary, PendingCase, PendingCaseSummary};
use crate::queue::{ClaimQueue, SharedClaimQueue};
use crate::registry::{CaseRegistry, SharedCaseRegistry};

/// Cheaply cloneable handle to a running arbiter.
#[derive(Clone)]
pub struct Arbiter {
    config: Arc<ArbiterConfig>,
    queue: SharedClaimQueue,
    registry: SharedCaseRegistry,
    clock: ClaimClock,
    events: SharedEventBus,
    status: watch::Receiver<EngineStatus>,
    cancel: CancellationToken,
}

impl Arbiter {
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Register a pending case awaiting identity linkage.
    pub fn register_case(
        &self,
        case_id: &str,
        patient_name: &str,
        destination: &str,
        severity: i64,
    ) -> ArbiterResult<PendingCaseSummary> {
        require_non_empty("case_id", case_id)?;
        require_non_empty("patient_name", patient_name)?;
        require_non_empty("destination", destination)?;
        let severity = self.config.severity.parse(severity)?;

        let case = PendingCase::new(case_id, patient_name, destination, severity, self.clock.stamp());
        let summary = case.summary();
        self.registry.register(case)?;

        self.events.publish(ArbiterEvent::CaseRegistered {
            case: summary.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    /// Link a scanned identity to a pending case and queue the resulting
    /// claim. On failure the queue is untouched.
    pub fn link_identity(
        &self,
        case_id: &str,
        requester_id: &str,
        approach: Option<Approach>,
    ) -> ArbiterResult<ClaimSummary> {
        let mut claim = self.registry.link_identity(case_id, requester_id)?;
        if let Some(approach) = approach {
            claim = claim.with_approach(approach);
        }

        self.events.publish(ArbiterEvent::CaseLinked {
            case_id: case_id.to_string(),
            requester_id: requester_id.to_string(),
            timestamp: Utc::now(),
        });
        Ok(self.enqueue(claim))
    }

    /// Queue a claim directly, bypassing the pending case stage.
    pub fn submit_claim(
        &self,
        requester_id: &str,
        severity: i64,
        approach: Option<Approach>,
    ) -> ArbiterResult<ClaimSummary> {
        require_non_empty("requester_id", requester_id)?;
        let severity = self.config.severity.parse(severity)?;

        let mut claim = Claim::new(requester_id, severity, self.clock.stamp());
        if let Some(approach) = approach {
            claim = claim.with_approach(approach);
        }
        info!(claim = %claim, "Claim submitted directly");
        Ok(self.enqueue(claim))
    }

    fn enqueue(&self, claim: Claim) -> ClaimSummary {
        let summary = claim.summary();
        self.queue.insert(claim);
        self.events.publish(ArbiterEvent::ClaimSubmitted {
            claim: summary.clone(),
            timestamp: Utc::now(),
        });
        summary
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ArbiterState {
        self.status.borrow().state
    }

    pub fn current_holder(&self) -> Option<ClaimSummary> {
        self.status.borrow().holder.clone()
    }

    /// Waiting claims in service order.
    pub fn list_pending_claims(&self) -> Vec<ClaimSummary> {
        self.queue.summaries()
    }

    /// Unlinked cases in registration order.
    pub fn list_pending_cases(&self) -> Vec<PendingCaseSummary> {
        self.registry.list_pending()
    }

    /// Wait until the engine status changes.
    pub async fn status_changed(&mut self) -> Option<EngineStatus> {
        self.status.changed().await.ok()?;
        Some(self.status.borrow_and_update().clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArbiterEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        self.events.subscribe_filtered(filter)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Request cooperative shutdown. The loop releases any active session
    /// and idles the actuator before its task completes.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Arbiter shutdown requested");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Starts the dispatcher and arbitration loop.
pub struct ArbiterService;

impl ArbiterService {
    /// Spawn onto the current tokio runtime. The returned task completes
    /// after shutdown, once every command has been handed to the actuator.
    pub fn spawn(
        config: ArbiterConfig,
        actuator: Arc<dyn SignalActuator>,
    ) -> (Arbiter, JoinHandle<()>) {
        let config = Arc::new(config);
        let queue = ClaimQueue::new().shared();
        let registry = CaseRegistry::new().shared();
        let events = EventBus::new().shared();
        let cancel = CancellationToken::new();

        info!(
            actuator = actuator.name(),
            hold_window_ms = config.hold_window_ms,
            poll_interval_ms = config.poll_interval_ms,
            renew_on_rescan = config.renew_on_rescan,
            "Starting arbiter"
        );
        let (sink, dispatcher) = ActuatorDispatcher::spawn(actuator, config.actuator_timeout());
        let engine = ArbitrationEngine::new(&config, queue.clone(), sink, events.clone());

        let arbiter = Arbiter {
            config: config.clone(),
            queue: queue.clone(),
            registry: registry.clone(),
            clock: ClaimClock::new(),
            events: events.clone(),
            status: engine.status_receiver(),
            cancel: cancel.clone(),
        };

        let handle = tokio::spawn(async move {
            run_loop(engine, &config, &queue, &registry, &events, &cancel).await;
            if let Err(e) = dispatcher.await {
                warn!("Actuator dispatcher ended abnormally: {}", e);
            }
        });

        (arbiter, handle)
    }
}

async fn run_loop(
    mut engine: ArbitrationEngine,
    config: &ArbiterConfig,
    queue: &ClaimQueue,
    registry: &CaseRegistry,
    events: &EventBus,
    cancel: &CancellationToken,
) {
    let wake = queue.notifier();
    let poll = config.poll_interval();

    loop {
        let now = Instant::now();
        evict_stale_cases(config, registry, events);
        engine.tick(now);

        let poll_deadline = now + poll;
        let deadline = engine
            .next_deadline()
            .map_or(poll_deadline, |d| d.min(poll_deadline));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = wake.notified() => debug!("Woken by claim arrival"),
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    engine.shutdown(Instant::now());
}

fn evict_stale_cases(config: &ArbiterConfig, registry: &CaseRegistry, events: &EventBus) {
    let Some(ttl) = config.case_ttl() else {
        return;
    };
    for case in registry.evict_older_than(ttl) {
        warn!(
            case_id = %case.case_id,
            patient = %case.patient_name,
            ttl_secs = ttl.as_secs(),
            "Pending case was never linked; evicted"
        );
        events.publish(ArbiterEvent::CaseEvicted {
            case,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::RecordingActuator;
    use crate::error::ArbiterError;

    #[tokio::test(start_paused = true)]
    async fn test_intake_validation_leaves_queue_untouched() {
        let (arbiter, handle) =
            ArbiterService::spawn(ArbiterConfig::default(), RecordingActuator::new().shared());

        assert!(matches!(
            arbiter.submit_claim("amb-1", 9, None),
            Err(ArbiterError::InvalidSeverity { value: 9, .. })
        ));
        assert_eq!(
            arbiter.submit_claim(" ", 3, None).unwrap_err().code(),
            "MISSING_FIELD"
        );
        assert_eq!(
            arbiter.link_identity("nope", "rfid-1", None).unwrap_err().code(),
            "CASE_NOT_FOUND"
        );
        assert!(arbiter.list_pending_claims().is_empty());

        arbiter.register_case("c1", "Mei", "General", 4).unwrap();
        assert_eq!(
            arbiter.register_case("c1", "Mei", "General", 4).unwrap_err(),
            ArbiterError::DuplicateCaseId {
                case_id: "c1".into()
            }
        );
        assert_eq!(arbiter.list_pending_cases().len(), 1);

        arbiter.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_intake() {
        let (arbiter, handle) =
            ArbiterService::spawn(ArbiterConfig::default(), RecordingActuator::new().shared());
        let mut events = arbiter.subscribe_filtered(EventFilter::new().types(vec![
            "case_registered",
            "case_linked",
            "claim_submitted",
        ]));

        arbiter.register_case("c9", "Ana", "St. Mary", 2).unwrap();
        arbiter
            .link_identity("c9", "rfid-9", Some(Approach::new("east")))
            .unwrap();

        let kinds = [
            events.recv().await.unwrap().event_type(),
            events.recv().await.unwrap().event_type(),
            events.recv().await.unwrap().event_type(),
        ];
        assert_eq!(kinds, ["case_registered", "case_linked", "claim_submitted"]);

        arbiter.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cases_are_evicted() {
        let config = ArbiterConfig {
            case_ttl_secs: 60,
            ..ArbiterConfig::default()
        };
        let (arbiter, handle) = ArbiterService::spawn(config, RecordingActuator::new().shared());
        let mut evicted = arbiter.subscribe_filtered(EventFilter::new().types(vec!["case_evicted"]));

        arbiter.register_case("old", "Lee", "General", 3).unwrap();
        let event = evicted.recv().await.unwrap();
        match event {
            ArbiterEvent::CaseEvicted { case, .. } => assert_eq!(case.case_id, "old"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(arbiter.list_pending_cases().is_empty());
        assert_eq!(
            arbiter.link_identity("old", "rfid-1", None).unwrap_err().code(),
            "CASE_NOT_FOUND"
        );

        arbiter.shutdown();
        handle.await.unwrap();
    }
}
