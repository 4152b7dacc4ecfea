//! Logging signal actuator for the standalone agent.
//!
//! Every command is logged through `tracing`; with an output attached it is
//! also written as a `{"signal": ...}` JSON line for whatever drives the
//! physical lamps.

use arbitration::{ActuatorError, Grantee, SignalActuator, SignalCommand};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::output::LineWriter;

#[derive(Debug, Default)]
pub struct LoggingActuator {
    output: Option<LineWriter>,
}

impl LoggingActuator {
    /// Log-only actuator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also emit each command as a JSON line.
    pub fn with_output(output: LineWriter) -> Self {
        Self {
            output: Some(output),
        }
    }
}

#[async_trait]
impl SignalActuator for LoggingActuator {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn apply(&self, command: &SignalCommand) -> Result<(), ActuatorError> {
        match command {
            SignalCommand::Grant {
                grantee: Grantee::Requester { approach, .. },
            } => info!(%command, "GREEN corridor on {}; all other approaches RED", approach),
            SignalCommand::Grant {
                grantee: Grantee::Cycle { corridor },
            } => info!(%command, "Default cycle: {} GREEN", corridor),
            SignalCommand::Release => info!(%command, "All approaches YELLOW then RED"),
            SignalCommand::Deny { requester_id } => {
                warn!(%command, "Denied {}: waiting behind current holder", requester_id)
            }
            SignalCommand::Idle => info!(%command, "Signals idle"),
        }

        if let Some(output) = &self.output {
            output.write_json(&json!({
                "signal": command,
                "at": Utc::now(),
            }));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbitration::{Approach, SeverityScale};

    #[tokio::test]
    async fn test_commands_are_written_as_signal_lines() {
        let (output, mut rx) = LineWriter::channel();
        let actuator = LoggingActuator::with_output(output);
        let severity = SeverityScale::default().parse(5).unwrap();

        actuator
            .apply(&SignalCommand::grant_requester(
                "rfid-1",
                severity,
                Approach::new("signal-2"),
            ))
            .await
            .unwrap();
        actuator.apply(&SignalCommand::Idle).await.unwrap();

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["signal"]["command"], "grant");
        assert_eq!(first["signal"]["grantee"]["requester_id"], "rfid-1");
        assert_eq!(first["signal"]["grantee"]["severity"], 5);
        assert!(first["at"].is_string());

        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(second["signal"]["command"], "idle");
    }

    #[tokio::test]
    async fn test_log_only_actuator_succeeds() {
        let actuator = LoggingActuator::new();
        assert!(actuator.apply(&SignalCommand::Release).await.is_ok());
        assert_eq!(actuator.name(), "logging");
    }
}
