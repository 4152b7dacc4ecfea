//! Emergency corridor arbiter agent
//!
//! Reads intake requests as JSON lines on stdin and writes one JSON reply
//! per request on stdout, interleaved with `{"signal": ...}` lines for the
//! signal controller. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 10s hold window, 250ms poll
//! corridor-agent
//!
//! # Config file, environment and flags, lowest to highest precedence
//! ARBITER_POLL_INTERVAL_MS=100 corridor-agent --config arbiter.toml --hold-window-ms 8000
//!
//! # Feed a scenario
//! echo '{"op":"submit_claim","requester_id":"amb-1","severity":4}' | corridor-agent
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use arbitration::{ArbiterService, SignalActuator};
use corridor_agent::{handle_line, Args, LineWriter, LoggingActuator};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corridor_agent=info,arbitration=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args
        .resolve_config(|key| std::env::var(key).ok())
        .context("Invalid arbiter configuration")?;
    info!(
        "Arbiter config: hold_window={}ms, poll={}ms, severity={}..={}, default_approach={}",
        config.hold_window_ms,
        config.poll_interval_ms,
        config.severity.min,
        config.severity.max,
        config.default_approach
    );

    let (output, writer_task) = LineWriter::stdout();
    let actuator: Arc<dyn SignalActuator> = if args.quiet_signals {
        Arc::new(LoggingActuator::new())
    } else {
        Arc::new(LoggingActuator::with_output(output.clone()))
    };
    let (arbiter, arbiter_task) = ArbiterService::spawn(config, actuator);

    let interrupted = CancellationToken::new();
    tokio::spawn({
        let interrupted = interrupted.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                interrupted.cancel();
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let next = tokio::select! {
            _ = interrupted.cancelled() => break,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Intake closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read intake: {}", e);
                break;
            }
        };

        if let Some(reply) = handle_line(&arbiter, &line) {
            output.write_json(&reply.body);
            if reply.shutdown {
                break;
            }
        }
    }

    arbiter.shutdown();
    arbiter_task
        .await
        .context("Arbitration loop terminated abnormally")?;

    // Signal lines are flushed once the last writer handle is gone.
    drop(output);
    writer_task
        .await
        .context("Output writer terminated abnormally")?;
    Ok(())
}
