// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for placeflow-core.
//!
//! Every engine-level failure is a value of [`EngineError`]; the engine
//! guarantees that any error path leaves persisted state untouched. Each
//! variant maps to a stable machine-readable code for API layers.

use std::fmt;

use uuid::Uuid;

use crate::case::{CaseStatus, EventKind, SignerRole, StageKind};

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Token validation failures.
///
/// External actors never see these directly; the gateway collapses them into
/// a generic invalid-link response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// No token with this value was ever issued.
    NotFound,
    /// The token's TTL elapsed before it was used.
    Expired,
    /// The token was already consumed, or was invalidated by a reissue.
    AlreadyConsumed,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "token not found"),
            Self::Expired => write!(f, "token expired"),
            Self::AlreadyConsumed => write!(f, "token already consumed"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Signature-capture failures.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureError {
    /// The role is not part of the stage's required quorum.
    RoleNotExpected {
        /// The offending role.
        role: SignerRole,
        /// The stage whose quorum was checked.
        stage: StageKind,
    },
    /// The case is not in a state that accepts signatures for this stage.
    StageNotAwaitingSignature {
        /// The case's current status.
        status: CaseStatus,
    },
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoleNotExpected { role, stage } => {
                write!(f, "role '{}' is not expected to sign stage '{}'", role, stage)
            }
            Self::StageNotAwaitingSignature { status } => {
                write!(f, "case in status '{}' does not accept signatures", status)
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// Engine errors that can occur while processing a case operation.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    /// Case was not found in the persistence layer.
    CaseNotFound {
        /// The case ID that was not found.
        case_id: Uuid,
    },

    /// The event is not valid for the case's current state.
    IllegalTransition {
        /// Status the case was in.
        from: CaseStatus,
        /// The attempted event.
        event: EventKind,
        /// Events that are currently legal, for the calling actor.
        allowed: Vec<EventKind>,
    },

    /// A capability token failed validation.
    InvalidToken {
        /// Why the token was rejected.
        reason: TokenError,
    },

    /// A signature was rejected by quorum or state validation.
    Signature {
        /// Why the signature was rejected.
        reason: SignatureError,
    },

    /// Deployment-time misconfiguration (unknown route, incoherent route
    /// table). Raised at startup validation, never retried.
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// Persistence operation failed.
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl EngineError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::CaseNotFound { .. } => "CASE_NOT_FOUND",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::InvalidToken { .. } => "INVALID_TOKEN",
            Self::Signature { .. } => "SIGNATURE_REJECTED",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaseNotFound { case_id } => {
                write!(f, "Case '{}' not found", case_id)
            }
            Self::IllegalTransition { from, event, allowed } => {
                let allowed = allowed
                    .iter()
                    .map(|e| e.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "Event '{}' is not valid in status '{}' (allowed: [{}])",
                    event, from, allowed
                )
            }
            Self::InvalidToken { reason } => {
                write!(f, "Invalid token: {}", reason)
            }
            Self::Signature { reason } => {
                write!(f, "Signature rejected: {}", reason)
            }
            Self::Configuration { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::Database { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TokenError> for EngineError {
    fn from(reason: TokenError) -> Self {
        EngineError::InvalidToken { reason }
    }
}

impl From<SignatureError> for EngineError {
    fn from(reason: SignatureError) -> Self {
        EngineError::Signature { reason }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let cases: Vec<(EngineError, &str)> = vec![
            (
                EngineError::CaseNotFound {
                    case_id: Uuid::nil(),
                },
                "CASE_NOT_FOUND",
            ),
            (
                EngineError::IllegalTransition {
                    from: CaseStatus::Draft,
                    event: EventKind::Approve,
                    allowed: vec![EventKind::SendDocumentRequest],
                },
                "ILLEGAL_TRANSITION",
            ),
            (
                EngineError::InvalidToken {
                    reason: TokenError::Expired,
                },
                "INVALID_TOKEN",
            ),
            (
                EngineError::Signature {
                    reason: SignatureError::StageNotAwaitingSignature {
                        status: CaseStatus::Draft,
                    },
                },
                "SIGNATURE_REJECTED",
            ),
            (
                EngineError::Configuration {
                    message: "unknown route".to_string(),
                },
                "CONFIGURATION_ERROR",
            ),
            (
                EngineError::Database {
                    operation: "insert".to_string(),
                    details: "locked".to_string(),
                },
                "DATABASE_ERROR",
            ),
        ];

        for (error, expected_code) in cases {
            assert_eq!(error.error_code(), expected_code, "for {:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_illegal_transition_display_lists_allowed() {
        let err = EngineError::IllegalTransition {
            from: CaseStatus::Draft,
            event: EventKind::Approve,
            allowed: vec![EventKind::SendDocumentRequest, EventKind::DocumentsUploaded],
        };
        let text = err.to_string();
        assert!(text.contains("draft"));
        assert!(text.contains("approve"));
        assert!(text.contains("send_document_request, documents_uploaded"));
    }

    #[test]
    fn test_token_error_conversion() {
        let err: EngineError = TokenError::AlreadyConsumed.into();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
        assert!(err.to_string().contains("already consumed"));
    }
}
