//! Arbitration Engine: preemptive single-holder corridor control
//!
//! ```text
//!            queue non-empty                 hold expired, queue empty
//!   ┌──────┐ ───────────────▶ ┌─────────┐ ─────────────────────────▶ ┌──────┐
//!   │ Idle │                  │ Granted │                            │ Idle │
//!   └──────┘ ◀─────────────── └─────────┘ ◀──┐                       └──────┘
//!               shutdown           │         │ preempted | hold expired
//!                                  └─────────┘   with a claim waiting
//! ```
//!
//! The engine owns no thread or timer. The service loop calls [`tick`] on
//! every wake-up (claim arrival, deadline, poll) and sleeps until
//! [`next_deadline`]. Commands go out through a [`CommandSink`] in the
//! order they are decided, so `release()` always precedes the next grant.
//!
//! [`tick`]: ArbitrationEngine::tick
//! [`next_deadline`]: ArbitrationEngine::next_deadline

pub mod session;
pub mod state;

pub use session::ArbitrationSession;
pub use state::{ArbiterState, IllegalTransition, StateMachine, TransitionReason, TransitionRecord};

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actuator::{CommandSink, SignalCommand};
use crate::config::ArbiterConfig;
use crate::cycle::DefaultCycle;
use crate::events::{ArbiterEvent, ReleaseReason, SharedEventBus};
use crate::model::{Approach, Claim, ClaimSummary};
use crate::queue::SharedClaimQueue;

/// Point-in-time view of the engine for the query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub state: ArbiterState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<ClaimSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_phase: Option<String>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: ArbiterState::Idle,
            session_id: None,
            holder: None,
            cycle_phase: None,
        }
    }
}

pub struct ArbitrationEngine {
    hold_window: Duration,
    renew_on_rescan: bool,
    default_approach: Approach,
    queue: SharedClaimQueue,
    sink: CommandSink,
    events: SharedEventBus,
    machine: StateMachine,
    session: Option<ArbitrationSession>,
    cycle: DefaultCycle,
    status: watch::Sender<EngineStatus>,
}

impl ArbitrationEngine {
    pub fn new(
        config: &ArbiterConfig,
        queue: SharedClaimQueue,
        sink: CommandSink,
        events: SharedEventBus,
    ) -> Self {
        let (status, _) = watch::channel(EngineStatus::default());
        Self {
            hold_window: config.hold_window(),
            renew_on_rescan: config.renew_on_rescan,
            default_approach: config.default_approach.clone(),
            queue,
            sink,
            events,
            machine: StateMachine::new(),
            session: None,
            cycle: DefaultCycle::new(config.cycle.clone()),
            status,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.machine.current()
    }

    pub fn session(&self) -> Option<&ArbitrationSession> {
        self.session.as_ref()
    }

    /// Claim currently holding the corridor.
    pub fn current_holder(&self) -> Option<&Claim> {
        self.session.as_ref().map(ArbitrationSession::holder)
    }

    pub fn transitions(&self) -> impl Iterator<Item = &TransitionRecord> {
        self.machine.transitions()
    }

    /// Receiver that always holds the latest [`EngineStatus`].
    pub fn status_receiver(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    /// Earliest instant at which [`tick`](Self::tick) has timed work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.session {
            Some(session) => Some(session.expires_at(self.hold_window)),
            None => self.cycle.next_boundary(),
        }
    }

    /// Evaluate the engine at `now`.
    pub fn tick(&mut self, now: Instant) {
        if self.session.is_some() {
            self.tick_granted(now);
        }
        if self.session.is_none() {
            self.tick_idle(now);
        }
        self.publish_status();
    }

    fn tick_granted(&mut self, now: Instant) {
        let Some(session) = self.session.as_ref() else {
            return;
        };

        // Preemption and renewal apply only inside the window.
        if now >= session.expires_at(self.hold_window) {
            self.release(now, ReleaseReason::HoldExpired);
            match self.queue.pop_highest() {
                Some(next) => self.grant(next, now, TransitionReason::HoldExpired),
                None => self.enter_idle(TransitionReason::HoldExpired),
            }
            return;
        }

        if self.renew_on_rescan {
            self.absorb_rescans(now);
        }

        let Some(holder) = self.current_holder() else {
            return;
        };
        if let Some(challenger) = self.queue.pop_highest_if(|top| top.preempts(holder)) {
            self.preempt(challenger, now);
            return;
        }

        self.deny_waiting();
    }

    fn tick_idle(&mut self, now: Instant) {
        if let Some(claim) = self.queue.pop_highest() {
            if let Some(command) = self.cycle.stop() {
                self.sink.emit(command);
            }
            self.grant(claim, now, TransitionReason::QueueNonEmpty);
            return;
        }

        if let Some(step) = self.cycle.tick(now) {
            self.sink.emit(step.command);
            self.events.publish(ArbiterEvent::CycleAdvanced {
                phase: step.phase.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    /// Drop queued rescans of the holder and restart its window. A rescan
    /// more urgent than the held claim is left queued to preempt it.
    fn absorb_rescans(&mut self, now: Instant) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let holder = session.holder();
        let rescans = self
            .queue
            .remove_where(|c| c.requester_id() == holder.requester_id() && !c.preempts(holder));
        if rescans.is_empty() {
            return;
        }

        session.renew(now);
        info!(
            requester_id = session.holder().requester_id(),
            rescans = rescans.len(),
            renewals = session.renewals(),
            "Hold window renewed by rescan"
        );
        self.events.publish(ArbiterEvent::HoldRenewed {
            session_id: session.id().to_string(),
            requester_id: session.holder().requester_id().to_string(),
            timestamp: Utc::now(),
        });
    }

    fn approach_for(&self, claim: &Claim) -> Approach {
        claim
            .approach()
            .cloned()
            .unwrap_or_else(|| self.default_approach.clone())
    }

    fn advance(&mut self, to: ArbiterState, reason: TransitionReason, holder: Option<&str>) {
        if let Err(e) = self.machine.advance(to, reason, holder) {
            error!("{}", e);
        }
    }

    fn grant(&mut self, claim: Claim, now: Instant, reason: TransitionReason) {
        let approach = self.approach_for(&claim);
        self.sink.emit(SignalCommand::grant_requester(
            claim.requester_id(),
            claim.severity(),
            approach.clone(),
        ));
        info!(claim = %claim, %approach, "Corridor granted");

        let session = ArbitrationSession::new(claim, approach, now);
        self.start_session(session, reason);
    }

    fn start_session(&mut self, session: ArbitrationSession, reason: TransitionReason) {
        let requester_id = session.holder().requester_id().to_string();
        self.advance(ArbiterState::Granted, reason, Some(&requester_id));
        self.events.publish(ArbiterEvent::Granted {
            session_id: session.id().to_string(),
            claim: session.holder().summary(),
            approach: session.approach().clone(),
            timestamp: Utc::now(),
        });
        self.session = Some(session);
    }

    fn release(&mut self, now: Instant, reason: ReleaseReason) -> Option<ArbitrationSession> {
        let session = self.session.take()?;
        self.sink.emit(SignalCommand::Release);

        let held = session.held_for(now);
        info!(
            requester_id = session.holder().requester_id(),
            %reason,
            held_ms = held.as_millis() as u64,
            "Corridor released"
        );
        self.events.publish(ArbiterEvent::Released {
            session_id: session.id().to_string(),
            requester_id: session.holder().requester_id().to_string(),
            reason,
            held_ms: held.as_millis() as u64,
            timestamp: Utc::now(),
        });
        Some(session)
    }

    fn preempt(&mut self, challenger: Claim, now: Instant) {
        let Some(previous) = self.release(now, ReleaseReason::Preempted) else {
            return;
        };

        warn!(
            displaced = %previous.holder(),
            by = %challenger,
            "Higher priority claim preempts current holder"
        );
        self.events.publish(ArbiterEvent::Preempted {
            displaced: previous.holder().summary(),
            by_requester: challenger.requester_id().to_string(),
            by_severity: challenger.severity(),
            timestamp: Utc::now(),
        });
        let escalation = previous.holder().requester_id() == challenger.requester_id();
        if self.renew_on_rescan && escalation {
            debug!(
                requester_id = challenger.requester_id(),
                "Escalated rescan supersedes the held claim"
            );
        } else {
            // Original stamp kept: the displaced claim resumes its place.
            self.queue.insert(previous.holder().clone());
        }

        let approach = self.approach_for(&challenger);
        self.sink.emit(SignalCommand::grant_requester(
            challenger.requester_id(),
            challenger.severity(),
            approach.clone(),
        ));
        info!(claim = %challenger, %approach, "Corridor granted");

        let session = ArbitrationSession::preempting(challenger, approach, now, previous);
        self.start_session(session, TransitionReason::Preempted);
    }

    fn deny_waiting(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        for claim in self.queue.snapshot() {
            if !session.should_deny(&claim) {
                continue;
            }
            self.sink.emit(SignalCommand::deny(claim.requester_id()));
            warn!(
                claim = %claim,
                holder = %session.holder(),
                "Lower priority claim denied; waiting for the current window to finish"
            );
            self.events.publish(ArbiterEvent::Denied {
                claim: claim.summary(),
                holder: session.holder().requester_id().to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    fn enter_idle(&mut self, reason: TransitionReason) {
        self.advance(ArbiterState::Idle, reason, None);
        self.sink.emit(SignalCommand::Idle);
        info!("Queue drained; returning to default cycle");
        self.events.publish(ArbiterEvent::EnteredIdle {
            timestamp: Utc::now(),
        });
    }

    /// Leave the actuator in its safe state: release whatever is open, then
    /// idle. Queued claims stay where they are.
    pub fn shutdown(&mut self, now: Instant) {
        if self.release(now, ReleaseReason::Shutdown).is_some() {
            self.advance(ArbiterState::Idle, TransitionReason::Shutdown, None);
        } else if let Some(command) = self.cycle.stop() {
            self.sink.emit(command);
        }
        self.sink.emit(SignalCommand::Idle);
        self.publish_status();

        debug!(history = %self.machine.summary(), "Arbitration history");
        info!(pending = self.queue.len(), "Arbitration engine stopped");
        self.events.publish(ArbiterEvent::ShutdownCompleted {
            timestamp: Utc::now(),
        });
    }

    fn publish_status(&self) {
        let status = EngineStatus {
            state: self.machine.current(),
            session_id: self.session.as_ref().map(|s| s.id().to_string()),
            holder: self.session.as_ref().map(|s| s.holder().summary()),
            cycle_phase: self.cycle.phase().map(|p| p.to_string()),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CycleConfig;
    use crate::events::EventBus;
    use crate::model::{ClaimClock, PendingCase, SeverityScale};
    use crate::queue::ClaimQueue;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        engine: ArbitrationEngine,
        queue: SharedClaimQueue,
        clock: ClaimClock,
        rx: UnboundedReceiver<SignalCommand>,
        t0: Instant,
    }

    impl Harness {
        fn new(config: ArbiterConfig) -> Self {
            let queue = ClaimQueue::new().shared();
            let (sink, rx) = CommandSink::channel();
            let engine =
                ArbitrationEngine::new(&config, queue.clone(), sink, EventBus::new().shared());
            Self {
                engine,
                queue,
                clock: ClaimClock::new(),
                rx,
                t0: Instant::now(),
            }
        }

        fn submit(&self, id: &str, severity: i64) -> Claim {
            let claim = Claim::new(
                id,
                SeverityScale::default().parse(severity).unwrap(),
                self.clock.stamp(),
            );
            self.queue.insert(claim.clone());
            claim
        }

        fn tick_at(&mut self, ms: u64) {
            self.engine.tick(self.t0 + Duration::from_millis(ms));
        }

        fn drain(&mut self) -> Vec<SignalCommand> {
            let mut out = Vec::new();
            while let Ok(command) = self.rx.try_recv() {
                out.push(command);
            }
            out
        }
    }

    fn config() -> ArbiterConfig {
        ArbiterConfig {
            default_approach: Approach::new("main"),
            cycle: CycleConfig {
                corridor_a: Approach::new("a"),
                corridor_b: Approach::new("b"),
                ..CycleConfig::default()
            },
            ..ArbiterConfig::default()
        }
    }

    fn grant(id: &str, severity: i64) -> SignalCommand {
        SignalCommand::grant_requester(
            id,
            SeverityScale::default().parse(severity).unwrap(),
            Approach::new("main"),
        )
    }

    #[tokio::test]
    async fn test_idle_runs_default_cycle() {
        let mut h = Harness::new(config());
        h.tick_at(0);
        assert_eq!(h.drain(), [SignalCommand::grant_cycle(Approach::new("a"))]);
        assert_eq!(h.engine.state(), ArbiterState::Idle);
        assert_eq!(
            h.engine.next_deadline(),
            Some(h.t0 + Duration::from_millis(3_000))
        );
    }

    #[tokio::test]
    async fn test_claim_interrupts_open_cycle_phase() {
        let mut h = Harness::new(config());
        h.tick_at(0);
        h.drain();

        h.submit("amb-1", 3);
        h.tick_at(500);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("amb-1", 3)]);
        assert_eq!(h.engine.state(), ArbiterState::Granted);
        assert_eq!(h.engine.current_holder().unwrap().requester_id(), "amb-1");
    }

    #[tokio::test]
    async fn test_preemption_releases_then_grants_and_requeues() {
        let mut h = Harness::new(config());
        let x = h.submit("x", 2);
        h.tick_at(0);
        h.drain();

        h.submit("y", 4);
        h.tick_at(3_000);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("y", 4)]);

        let session = h.engine.session().unwrap();
        assert!(session.preempted());
        assert_eq!(session.granted_at(), h.t0 + Duration::from_millis(3_000));

        // Displaced claim is back in the queue with its original sequence
        let queued = h.queue.snapshot();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].seq(), x.seq());

        // and is not denied while it waits.
        h.tick_at(3_100);
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn test_equal_severity_never_preempts() {
        let mut h = Harness::new(config());
        h.submit("first", 3);
        h.tick_at(0);
        h.drain();

        h.submit("second", 3);
        h.tick_at(100);
        assert_eq!(h.drain(), [SignalCommand::deny("second")]);
        assert_eq!(h.engine.current_holder().unwrap().requester_id(), "first");
    }

    #[tokio::test]
    async fn test_deny_is_emitted_once_per_claim() {
        let mut h = Harness::new(config());
        h.submit("holder", 5);
        h.tick_at(0);
        h.drain();

        h.submit("waiting", 1);
        for ms in [100, 200, 300, 400] {
            h.tick_at(ms);
        }
        assert_eq!(h.drain(), [SignalCommand::deny("waiting")]);
        assert_eq!(h.engine.state(), ArbiterState::Granted);
    }

    #[tokio::test]
    async fn test_expiry_hands_over_to_next_claim() {
        let mut h = Harness::new(config());
        h.submit("a", 4);
        h.tick_at(0);
        h.submit("b", 2);
        h.tick_at(100);
        h.drain();

        h.tick_at(9_999);
        assert!(h.drain().is_empty());

        h.tick_at(10_000);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("b", 2)]);
        assert_eq!(
            h.engine.session().unwrap().granted_at(),
            h.t0 + Duration::from_millis(10_000)
        );
    }

    #[tokio::test]
    async fn test_expiry_with_empty_queue_returns_to_cycle() {
        let mut h = Harness::new(config());
        h.submit("a", 4);
        h.tick_at(0);
        h.drain();

        h.tick_at(10_000);
        assert_eq!(
            h.drain(),
            [
                SignalCommand::Release,
                SignalCommand::Idle,
                SignalCommand::grant_cycle(Approach::new("a")),
            ]
        );
        assert_eq!(h.engine.state(), ArbiterState::Idle);
        assert!(h.engine.current_holder().is_none());
    }

    #[tokio::test]
    async fn test_rescan_renews_only_when_enabled() {
        let mut h = Harness::new(ArbiterConfig {
            renew_on_rescan: true,
            ..config()
        });
        h.submit("amb", 3);
        h.tick_at(0);
        h.submit("amb", 3);
        h.tick_at(6_000);
        h.drain();

        assert!(h.queue.is_empty());
        assert_eq!(h.engine.session().unwrap().renewals(), 1);
        h.tick_at(10_000);
        assert!(h.drain().is_empty());
        h.tick_at(16_000);
        assert_eq!(h.drain()[0], SignalCommand::Release);

        let mut h = Harness::new(config());
        h.submit("amb", 3);
        h.tick_at(0);
        h.submit("amb", 3);
        h.tick_at(6_000);
        assert_eq!(h.drain().last(), Some(&SignalCommand::deny("amb")));
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_wins_over_waiting_preemptor() {
        let mut h = Harness::new(config());
        h.submit("x", 2);
        h.tick_at(0);
        h.drain();

        // First look at y lands on the expiry boundary.
        h.submit("y", 4);
        h.tick_at(10_000);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("y", 4)]);

        assert!(h.queue.is_empty(), "expired holder must not be requeued");
        assert!(!h.engine.session().unwrap().preempted());
        let reasons: Vec<_> = h.engine.transitions().map(|t| t.reason).collect();
        assert_eq!(
            reasons,
            [TransitionReason::QueueNonEmpty, TransitionReason::HoldExpired]
        );
    }

    #[tokio::test]
    async fn test_escalated_rescan_preempts_instead_of_renewing() {
        let mut h = Harness::new(ArbiterConfig {
            renew_on_rescan: true,
            ..config()
        });
        h.submit("amb", 2);
        h.tick_at(0);
        h.drain();

        h.submit("amb", 5);
        h.tick_at(100);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("amb", 5)]);
        assert!(h.queue.is_empty(), "superseded claim is not kept");
        assert_eq!(h.engine.session().unwrap().renewals(), 0);

        h.submit("other", 3);
        h.tick_at(200);
        assert_eq!(h.drain(), [SignalCommand::deny("other")]);
        let holder = h.engine.current_holder().unwrap();
        assert_eq!(holder.requester_id(), "amb");
        assert_eq!(holder.severity(), SeverityScale::default().parse(5).unwrap());

        // Without renewal the two scans stay independent claims.
        let mut h = Harness::new(config());
        h.submit("amb", 2);
        h.tick_at(0);
        h.submit("amb", 5);
        h.tick_at(100);
        h.drain();
        let queued = h.queue.snapshot();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].severity(), SeverityScale::default().parse(2).unwrap());
    }

    #[tokio::test]
    async fn test_rescan_after_expiry_starts_fresh_session() {
        let mut h = Harness::new(ArbiterConfig {
            renew_on_rescan: true,
            ..config()
        });
        h.submit("amb", 3);
        h.tick_at(0);
        h.drain();

        h.submit("amb", 3);
        h.tick_at(10_200);
        assert_eq!(h.drain(), [SignalCommand::Release, grant("amb", 3)]);

        let session = h.engine.session().unwrap();
        assert_eq!(session.renewals(), 0);
        assert_eq!(session.granted_at(), h.t0 + Duration::from_millis(10_200));
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_linked_case_uses_scan_approach_when_present() {
        let mut h = Harness::new(config());
        let severity = SeverityScale::default().parse(5).unwrap();
        let claim = PendingCase::new("c1", "Ravi", "North Clinic", severity, h.clock.stamp())
            .into_claim("rfid-9")
            .with_approach(Approach::new("east"));
        h.queue.insert(claim);
        h.tick_at(0);

        assert_eq!(
            h.drain(),
            [SignalCommand::grant_requester(
                "rfid-9",
                severity,
                Approach::new("east")
            )]
        );
    }

    #[tokio::test]
    async fn test_shutdown_releases_then_idles() {
        let mut h = Harness::new(config());
        h.submit("a", 2);
        h.tick_at(0);
        h.drain();

        h.engine.shutdown(h.t0 + Duration::from_millis(50));
        assert_eq!(h.drain(), [SignalCommand::Release, SignalCommand::Idle]);
        assert_eq!(h.engine.state(), ArbiterState::Idle);

        let reasons: Vec<_> = h.engine.transitions().map(|t| t.reason).collect();
        assert_eq!(
            reasons,
            [TransitionReason::QueueNonEmpty, TransitionReason::Shutdown]
        );
    }

    #[tokio::test]
    async fn test_shutdown_during_cycle_gap_only_idles() {
        let mut h = Harness::new(config());
        h.tick_at(0);
        h.tick_at(3_500);
        h.drain();

        h.engine.shutdown(h.t0 + Duration::from_millis(3_600));
        assert_eq!(h.drain(), [SignalCommand::Idle]);
    }

    #[tokio::test]
    async fn test_status_tracks_holder() {
        let mut h = Harness::new(config());
        let status = h.engine.status_receiver();
        h.submit("amb-3", 3);
        h.tick_at(0);

        let snapshot = status.borrow().clone();
        assert_eq!(snapshot.state, ArbiterState::Granted);
        assert_eq!(snapshot.holder.unwrap().requester_id, "amb-3");
        assert!(snapshot.session_id.is_some());
    }
}
