//! Serializable operation results carried inside response envelopes.
//!
//! The responding side folds its dispatch outcome into a [`WireResult`]
//! before echoing it back, so failures survive the trip across the wire
//! with their structure intact.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A tagged success/failure value, the `result` of a response message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Status")]
pub enum WireResult {
    Success,
    Failure {
        #[serde(rename = "Error")]
        error: WireError,
    },
}

/// A structured error: a kind, a human-readable message and, for
/// aggregates, the ordered list of underlying errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inner: Vec<WireError>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl WireResult {
    /// Fold a list of dispatch failures into one wire result.
    pub fn from_errors(errors: &[LinkError]) -> WireResult {
        match errors {
            [] => WireResult::Success,
            [single] => WireResult::failure(single),
            many => WireResult::Failure {
                error: WireError {
                    kind: "Aggregate".into(),
                    message: format!("aggregate of {} errors", many.len()),
                    inner: many.iter().map(WireError::from).collect(),
                },
            },
        }
    }

    pub fn failure(error: &LinkError) -> WireResult {
        WireResult::Failure {
            error: WireError::from(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WireResult::Success)
    }

    /// Convert back into a local result; a failure surfaces as
    /// [`LinkError::Remote`].
    pub fn into_result(self) -> Result<(), LinkError> {
        match self {
            WireResult::Success => Ok(()),
            WireResult::Failure { error } => Err(LinkError::Remote(error)),
        }
    }
}

impl From<&LinkError> for WireError {
    fn from(error: &LinkError) -> Self {
        let kind = match error {
            LinkError::Transport(_) => "Transport",
            LinkError::Codec(_) => "Codec",
            LinkError::UnsupportedVersion(_) => "UnsupportedVersion",
            LinkError::UnknownPayload(_) => "UnknownPayload",
            LinkError::NoResponder(_) => "NoResponder",
            LinkError::ResponderFault(_) => "ResponderFault",
            LinkError::Aggregate(_) => "Aggregate",
            LinkError::Usage(_) => "Usage",
            LinkError::Cancelled => "Cancelled",
            LinkError::Remote(remote) => return remote.clone(),
            LinkError::ConnectionClosed => "ConnectionClosed",
        };
        let inner = match error {
            LinkError::Aggregate(errors) => errors.iter().map(WireError::from).collect(),
            _ => Vec::new(),
        };
        WireError {
            kind: kind.into(),
            message: error.to_string(),
            inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_roundtrip() {
        let json = serde_json::to_string(&WireResult::Success).unwrap();
        assert_eq!(json, r#"{"Status":"Success"}"#);
        let back: WireResult = serde_json::from_str(&json).unwrap();
        assert!(back.is_success());
    }

    #[test]
    fn failure_carries_kind_and_message() {
        let wire = WireResult::failure(&LinkError::NoResponder("Command".into()));
        match &wire {
            WireResult::Failure { error } => {
                assert_eq!(error.kind, "NoResponder");
                assert!(error.message.contains("Command"));
            }
            _ => panic!("expected failure"),
        }
        assert!(matches!(wire.into_result(), Err(LinkError::Remote(_))));
    }

    #[test]
    fn aggregate_preserves_member_order() {
        let errors = vec![
            LinkError::Transport("broken pipe".into()),
            LinkError::ResponderFault("boom".into()),
        ];
        match WireResult::from_errors(&errors) {
            WireResult::Failure { error } => {
                assert_eq!(error.kind, "Aggregate");
                assert_eq!(error.inner.len(), 2);
                assert_eq!(error.inner[0].kind, "Transport");
                assert_eq!(error.inner[1].kind, "ResponderFault");
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn remote_error_is_not_rewrapped() {
        let original = WireError {
            kind: "Transport".into(),
            message: "lost".into(),
            inner: Vec::new(),
        };
        let wire = WireResult::failure(&LinkError::Remote(original.clone()));
        match wire {
            WireResult::Failure { error } => assert_eq!(error, original),
            _ => panic!("expected failure"),
        }
    }
}
