//! JSON-lines intake protocol.
//!
//! One request object per line, tagged by `op`; one reply per request:
//! `{"ok":true,...}` on success, `{"ok":false,"code":...,"message":...}`
//! otherwise. Lines that do not parse never reach the arbiter.

use arbitration::{Approach, Arbiter, ArbiterError};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// A single intake request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IntakeRequest {
    /// Case Intake: register a pending case.
    RegisterCase {
        case_id: String,
        patient_name: String,
        destination: String,
        severity: i64,
    },
    /// Identity Scanner: link a scanned requester to a case.
    LinkIdentity {
        case_id: String,
        requester_id: String,
        #[serde(default)]
        approach: Option<String>,
    },
    /// Direct claim, bypassing the pending case stage.
    SubmitClaim {
        requester_id: String,
        severity: i64,
        #[serde(default)]
        approach: Option<String>,
    },
    Status,
    PendingCases,
    PendingClaims,
    Shutdown,
}

impl IntakeRequest {
    pub fn op(&self) -> &'static str {
        match self {
            Self::RegisterCase { .. } => "register_case",
            Self::LinkIdentity { .. } => "link_identity",
            Self::SubmitClaim { .. } => "submit_claim",
            Self::Status => "status",
            Self::PendingCases => "pending_cases",
            Self::PendingClaims => "pending_claims",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Intake failures, reported back on the wire.
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Rejected(#[from] ArbiterError),
}

impl IntakeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_REQUEST",
            Self::Rejected(e) => e.code(),
        }
    }

    fn to_reply(&self) -> Value {
        let mut reply = json!({
            "ok": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::Rejected(e) = self {
            reply["hint"] = Value::from(e.recovery_action());
        }
        reply
    }
}

/// What to send back and whether the caller asked to stop.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub body: Value,
    pub shutdown: bool,
}

impl Reply {
    fn ok(mut body: Value) -> Self {
        body["ok"] = Value::Bool(true);
        Self {
            body,
            shutdown: false,
        }
    }

    fn error(error: &IntakeError) -> Self {
        Self {
            body: error.to_reply(),
            shutdown: false,
        }
    }
}

/// Parse one line without touching the arbiter.
pub fn parse_request(line: &str) -> Result<IntakeRequest, IntakeError> {
    Ok(serde_json::from_str(line)?)
}

/// Handle one input line. Blank lines get no reply.
pub fn handle_line(arbiter: &Arbiter, line: &str) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request = match parse_request(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected intake line: {}", e);
            return Some(Reply::error(&e));
        }
    };

    let op = request.op();
    debug!(op, "Intake request");
    match execute(arbiter, request) {
        Ok(reply) => Some(reply),
        Err(e) => {
            warn!(op, code = e.code(), "Intake request rejected: {}", e);
            Some(Reply::error(&e))
        }
    }
}

fn execute(arbiter: &Arbiter, request: IntakeRequest) -> Result<Reply, IntakeError> {
    let reply = match request {
        IntakeRequest::RegisterCase {
            case_id,
            patient_name,
            destination,
            severity,
        } => {
            let case = arbiter.register_case(&case_id, &patient_name, &destination, severity)?;
            Reply::ok(json!({ "case": case }))
        }
        IntakeRequest::LinkIdentity {
            case_id,
            requester_id,
            approach,
        } => {
            let claim = arbiter.link_identity(&case_id, &requester_id, approach.map(Approach::new))?;
            Reply::ok(json!({ "claim": claim }))
        }
        IntakeRequest::SubmitClaim {
            requester_id,
            severity,
            approach,
        } => {
            let claim = arbiter.submit_claim(&requester_id, severity, approach.map(Approach::new))?;
            Reply::ok(json!({ "claim": claim }))
        }
        IntakeRequest::Status => Reply::ok(json!({
            "status": arbiter.status(),
            "pending_claims": arbiter.list_pending_claims().len(),
            "pending_cases": arbiter.list_pending_cases().len(),
            "at": Utc::now(),
        })),
        IntakeRequest::PendingCases => Reply::ok(json!({ "cases": arbiter.list_pending_cases() })),
        IntakeRequest::PendingClaims => {
            Reply::ok(json!({ "claims": arbiter.list_pending_claims() }))
        }
        IntakeRequest::Shutdown => {
            arbiter.shutdown();
            Reply {
                shutdown: true,
                ..Reply::ok(json!({ "shutdown": true }))
            }
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_requests() {
        let request = parse_request(
            r#"{"op":"register_case","case_id":"c1","patient_name":"Ana","destination":"General","severity":4}"#,
        )
        .unwrap();
        assert_eq!(request.op(), "register_case");

        let request =
            parse_request(r#"{"op":"submit_claim","requester_id":"amb-1","severity":2}"#).unwrap();
        assert_eq!(
            request,
            IntakeRequest::SubmitClaim {
                requester_id: "amb-1".into(),
                severity: 2,
                approach: None,
            }
        );

        assert_eq!(parse_request(r#"{"op":"status"}"#).unwrap(), IntakeRequest::Status);
    }

    #[test]
    fn test_malformed_requests() {
        for line in [
            "not json",
            r#"{"op":"launch_rocket"}"#,
            r#"{"op":"submit_claim","requester_id":"amb-1"}"#,
            r#"{"op":"submit_claim","requester_id":"amb-1","severity":"high"}"#,
            r#"{"case_id":"c1"}"#,
        ] {
            let err = parse_request(line).unwrap_err();
            assert_eq!(err.code(), "MALFORMED_REQUEST", "line: {}", line);
        }
    }

    #[test]
    fn test_rejection_reply_shape() {
        let err = IntakeError::from(ArbiterError::CaseNotFound {
            case_id: "c9".into(),
        });
        let reply = Reply::error(&err);
        assert_eq!(reply.body["ok"], false);
        assert_eq!(reply.body["code"], "CASE_NOT_FOUND");
        assert!(reply.body["message"].as_str().unwrap().contains("c9"));
        assert!(reply.body["hint"].is_string());
        assert!(!reply.shutdown);

        let malformed = Reply::error(&parse_request("{").unwrap_err());
        assert!(malformed.body.get("hint").is_none());
    }
}
