//! Emergency Corridor Arbitration Library
//!
//! This library provides:
//! - A severity-ranked priority queue of corridor claims
//! - A pending case registry that turns scanned identities into claims
//! - A preemptive single-holder arbitration engine with a hold window
//! - A default two-corridor cycle for when nobody is waiting
//! - An async signal actuator surface with an ordered dispatcher
//!
//! # Usage
//!
//! ```no_run
//! use arbitration::{ArbiterConfig, ArbiterService, RecordingActuator};
//!
//! # async fn demo() -> Result<(), arbitration::ArbiterError> {
//! let actuator = RecordingActuator::new().shared();
//! let (arbiter, handle) = ArbiterService::spawn(ArbiterConfig::default(), actuator);
//!
//! arbiter.register_case("case-1", "Asha", "City General", 5)?;
//! arbiter.link_identity("case-1", "rfid-0042", None)?;
//! arbiter.submit_claim("amb-7", 2, None)?;
//!
//! arbiter.shutdown();
//! let _ = handle.await;
//! # Ok(())
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod actuator;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod queue;
pub mod registry;
pub mod service;

pub use actuator::{
    ActuatorDispatcher, ActuatorError, CommandSink, Grantee, RecordedCommand, RecordingActuator,
    SignalActuator, SignalCommand,
};
pub use config::{ArbiterConfig, ConfigError, CycleConfig, MAX_POLL_INTERVAL_MS};
pub use cycle::{CyclePhase, CycleStep, DefaultCycle};
pub use engine::{
    ArbiterState, ArbitrationEngine, ArbitrationSession, EngineStatus, TransitionReason,
    TransitionRecord,
};
pub use error::{ArbiterError, ArbiterResult};
pub use events::{ArbiterEvent, EventBus, EventFilter, ReleaseReason, SharedEventBus};
pub use model::{
    Approach, CaseDetails, Claim, ClaimClock, ClaimSummary, PendingCase, PendingCaseSummary,
    Severity, SeverityScale, Stamp,
};
pub use queue::{ClaimQueue, SharedClaimQueue};
pub use registry::{CaseRegistry, SharedCaseRegistry};
pub use service::{Arbiter, ArbiterService};
