//! Default Cycle Driver: the non-priority rotation used while idle
//!
//! ```text
//! OpenA ──corridor_a_ms──▶ GapAfterA ──gap_ms──▶ OpenB ──corridor_b_ms──▶ GapAfterB ──gap_ms──▶ OpenA
//! ```
//!
//! Open phases emit `grant(corridor)`, gaps emit `release()`, so the actuator
//! sees the same command surface as for emergency grants. The driver is
//! ticked by the arbitration loop; it never sleeps on its own, which is what
//! lets a new claim cut into a phase within one loop wake-up.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::actuator::SignalCommand;
use crate::config::CycleConfig;

/// Phases of the default rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CyclePhase {
    OpenA,
    GapAfterA,
    OpenB,
    GapAfterB,
}

impl CyclePhase {
    fn next(self) -> Self {
        match self {
            Self::OpenA => Self::GapAfterA,
            Self::GapAfterA => Self::OpenB,
            Self::OpenB => Self::GapAfterB,
            Self::GapAfterB => Self::OpenA,
        }
    }

    /// Whether a corridor is open during this phase.
    pub fn is_open(self) -> bool {
        matches!(self, Self::OpenA | Self::OpenB)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenA => write!(f, "open_a"),
            Self::GapAfterA => write!(f, "gap_after_a"),
            Self::OpenB => write!(f, "open_b"),
            Self::GapAfterB => write!(f, "gap_after_b"),
        }
    }
}

/// A phase change and the command announcing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleStep {
    pub phase: CyclePhase,
    pub command: SignalCommand,
}

/// Two-corridor rotation driven by explicit ticks.
#[derive(Debug, Clone)]
pub struct DefaultCycle {
    config: CycleConfig,
    current: Option<(CyclePhase, Instant)>,
}

impl DefaultCycle {
    pub fn new(mut config: CycleConfig) -> Self {
        // Open phases must take time or the rotation could never settle.
        config.corridor_a_ms = config.corridor_a_ms.max(1);
        config.corridor_b_ms = config.corridor_b_ms.max(1);
        Self {
            config,
            current: None,
        }
    }

    fn duration_of(&self, phase: CyclePhase) -> Duration {
        Duration::from_millis(match phase {
            CyclePhase::OpenA => self.config.corridor_a_ms,
            CyclePhase::OpenB => self.config.corridor_b_ms,
            CyclePhase::GapAfterA | CyclePhase::GapAfterB => self.config.gap_ms,
        })
    }

    fn command_for(&self, phase: CyclePhase) -> SignalCommand {
        match phase {
            CyclePhase::OpenA => SignalCommand::grant_cycle(self.config.corridor_a.clone()),
            CyclePhase::OpenB => SignalCommand::grant_cycle(self.config.corridor_b.clone()),
            CyclePhase::GapAfterA | CyclePhase::GapAfterB => SignalCommand::Release,
        }
    }

    pub fn phase(&self) -> Option<CyclePhase> {
        self.current.map(|(phase, _)| phase)
    }

    /// When the current phase ends, if the cycle is running.
    pub fn next_boundary(&self) -> Option<Instant> {
        self.current
            .map(|(phase, started)| started + self.duration_of(phase))
    }

    /// Start the rotation if stopped, or advance it to `now`.
    ///
    /// Returns the step to announce when the phase changed. After a long
    /// stall only the phase reached is announced, not every skipped one.
    pub fn tick(&mut self, now: Instant) -> Option<CycleStep> {
        let Some((mut phase, mut started)) = self.current else {
            self.current = Some((CyclePhase::OpenA, now));
            debug!(phase = %CyclePhase::OpenA, "Default cycle started");
            return Some(self.step(CyclePhase::OpenA));
        };

        let mut changed = false;
        loop {
            let end = started + self.duration_of(phase);
            if now < end {
                break;
            }
            phase = phase.next();
            started = end;
            changed = true;
            // Zero-length gaps are skipped entirely.
            while self.duration_of(phase).is_zero() {
                phase = phase.next();
            }
        }
        self.current = Some((phase, started));

        changed.then(|| {
            debug!(%phase, "Default cycle advanced");
            self.step(phase)
        })
    }

    fn step(&self, phase: CyclePhase) -> CycleStep {
        CycleStep {
            phase,
            command: self.command_for(phase),
        }
    }

    /// Stop the rotation. Returns `release()` if a corridor was open.
    pub fn stop(&mut self) -> Option<SignalCommand> {
        let (phase, _) = self.current.take()?;
        debug!(%phase, "Default cycle stopped");
        phase.is_open().then_some(SignalCommand::Release)
    }
}
