//! Corridor agent: process wrapper around the `arbitration` crate.
//!
//! - `cli`: clap arguments layered over file and environment config
//! - `intake`: the stdin JSON-lines request protocol
//! - `actuator`: a signal actuator that logs and echoes commands
//! - `output`: serialized JSON-line writer shared by replies and signals

pub mod actuator;
pub mod cli;
pub mod intake;
pub mod output;

pub use actuator::LoggingActuator;
pub use cli::Args;
pub use intake::{handle_line, parse_request, IntakeError, IntakeRequest, Reply};
pub use output::LineWriter;
