// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External actor gateway.
//!
//! The one entry point for unauthenticated parties: a contractor, client,
//! or third-party company holding a capability link. The token is consumed
//! first (atomic, single-use), uploaded blobs are written to the document
//! store outside the case lock, and the consumed scope is mapped to its
//! workflow event.
//!
//! Every failure, whatever the cause, collapses to the same generic
//! invalid-link response. A stale or replayed link must not reveal case
//! state, workflow structure, or even whether the link ever existed.

use tracing::{debug, warn};

use crate::case::{CaseEvent, DocumentKind, NewDocument, SignatureMethod};
use crate::engine::WorkflowEngine;
use crate::error::Result;
use crate::machine::EventOrigin;
use crate::token::{TokenClaims, TokenScope};

/// What the external actor submitted with the link.
#[derive(Debug, Clone)]
pub enum ActionPayload {
    /// Identity documents from the contractor.
    Documents {
        /// Typed files, raw content.
        files: Vec<(DocumentKind, Vec<u8>)>,
    },
    /// Quote sheet from the third-party company.
    Quote {
        /// Raw quote sheet content.
        content: Vec<u8>,
    },
    /// A signature (typed name or drawn image).
    Signature {
        /// Capture method.
        method: SignatureMethod,
        /// Raw signature payload.
        content: Vec<u8>,
    },
    /// Employment contract from the third-party company.
    Contract {
        /// Raw contract content.
        content: Vec<u8>,
    },
}

/// Outcome surfaced to the external actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayResponse {
    /// The action was applied.
    Accepted {
        /// Human-readable confirmation; never carries internal state.
        message: String,
    },
    /// Generic refusal, identical for every failure cause.
    LinkInvalid,
}

impl GatewayResponse {
    /// The one message external actors see on any failure.
    pub const INVALID_MESSAGE: &'static str = "This link is no longer valid or has expired.";
}

/// Consume a token and apply the action it authorizes.
pub(crate) async fn act_on_token(
    engine: &WorkflowEngine,
    token_value: &str,
    payload: ActionPayload,
) -> GatewayResponse {
    let claims = match engine.tokens.consume(token_value).await {
        Ok(claims) => claims,
        Err(e) => {
            debug!("external action refused: {}", e);
            return GatewayResponse::LinkInvalid;
        }
    };

    let (event, message) = match build_event(engine, &claims, payload).await {
        Ok(Some(built)) => built,
        Ok(None) => {
            warn!(
                case_id = %claims.case_id,
                scope = claims.scope.as_str(),
                "payload does not match token scope"
            );
            return GatewayResponse::LinkInvalid;
        }
        Err(e) => {
            warn!(case_id = %claims.case_id, "external upload failed: {}", e);
            return GatewayResponse::LinkInvalid;
        }
    };

    match engine
        .apply_event(claims.case_id, event, EventOrigin::External, "external")
        .await
    {
        Ok(_) => GatewayResponse::Accepted {
            message: message.to_string(),
        },
        Err(e) => {
            // The token is already burned; recovery is an internal reissue.
            warn!(case_id = %claims.case_id, "external action failed: {}", e);
            GatewayResponse::LinkInvalid
        }
    }
}

/// Store the payload's blobs and build the event the scope authorizes.
/// `None` means the payload shape does not match the scope.
async fn build_event(
    engine: &WorkflowEngine,
    claims: &TokenClaims,
    payload: ActionPayload,
) -> Result<Option<(CaseEvent, &'static str)>> {
    let store = engine.document_store();
    let built = match (claims.scope, payload) {
        (TokenScope::DocumentUpload, ActionPayload::Documents { files }) => {
            let mut documents = Vec::with_capacity(files.len());
            for (kind, content) in files {
                let doc_ref = store.put(content, kind.as_str()).await?;
                documents.push(NewDocument { kind, doc_ref });
            }
            Some((
                CaseEvent::DocumentsUploaded { documents },
                "Documents received. Our team will be in touch.",
            ))
        }
        (TokenScope::QuoteSubmission, ActionPayload::Quote { content }) => {
            let quote_ref = store.put(content, DocumentKind::QuoteSheet.as_str()).await?;
            Some((
                CaseEvent::ThirdPartySubmitted { quote_ref },
                "Quote received. Thank you.",
            ))
        }
        (
            TokenScope::CohfSignature | TokenScope::ContractSignature,
            ActionPayload::Signature { method, content },
        ) => {
            // Signature tokens are minted for a specific signer.
            let Some(role) = claims.signer_role else {
                return Ok(None);
            };
            let payload_ref = store
                .put(content, &format!("signature_{}", role.as_str()))
                .await?;
            Some((
                CaseEvent::SignatureCaptured {
                    role,
                    method,
                    payload_ref,
                },
                "Signature recorded. Thank you.",
            ))
        }
        (TokenScope::ContractUpload, ActionPayload::Contract { content }) => {
            let contract_ref = store.put(content, DocumentKind::Contract.as_str()).await?;
            Some((
                CaseEvent::ContractUploaded { contract_ref },
                "Contract received. Our team will review it shortly.",
            ))
        }
        (TokenScope::WorkOrderSignature, ActionPayload::Signature { method, content }) => {
            let payload_ref = store.put(content, "work_order_signature").await?;
            Some((
                CaseEvent::ClientSigned {
                    method,
                    payload_ref,
                },
                "Work order signed. Thank you.",
            ))
        }
        _ => None,
    };
    Ok(built)
}
