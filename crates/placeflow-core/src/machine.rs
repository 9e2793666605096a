// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The workflow state machine.
//!
//! [`transition`] is a pure function of `(status, event, route)` plus, for
//! signature events, the quorum position computed over the stage's
//! signature set. It returns the next status and a list of declarative
//! [`SideEffect`]s; it never performs I/O and never mutates anything. Any
//! `(status, event)` pair outside the sparse table yields
//! [`EngineError::IllegalTransition`] carrying the currently legal events.
//!
//! The engine commits the returned effects atomically with the status
//! change, or not at all.

use crate::case::{
    CaseEvent, CaseStatus, EventKind, NewDocument, OnboardingRoute, SignatureMethod, SignerRole,
    StageKind, StageState,
};
use crate::error::EngineError;
use crate::notify::NotificationKind;
use crate::routes::{self, RouteSpec};
use crate::signature::SignatureProgress;
use crate::token::TokenScope;

/// Where an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// Authenticated internal user.
    Internal,
    /// External actor acting on a consumed capability token.
    External,
}

/// Per-application context the pure table needs beyond `(status, event,
/// route)`.
#[derive(Debug, Clone, Copy)]
pub struct TransitionCtx {
    /// Where the event came from.
    pub origin: EventOrigin,
    /// The case's `rejected_from` bookkeeping (reopen target derivation).
    pub rejected_from: Option<CaseStatus>,
    /// Quorum position for signature events, computed with the incoming
    /// signature already counted. `None` for non-signature events.
    pub signature: Option<SignatureProgress>,
}

/// A declarative side effect of a transition.
///
/// Effects are executed by the commit batch (state, artifacts, tokens,
/// signatures) or after it (notifications); the table itself stays free of
/// I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// Set a stage's progress state.
    SetStageState {
        /// Stage to update.
        stage: StageKind,
        /// New progress state.
        state: StageState,
    },
    /// Record a stage's primary artifact.
    SetStageArtifact {
        /// Stage to update.
        stage: StageKind,
        /// Document-store reference.
        artifact_ref: String,
    },
    /// Attach uploaded documents to the case.
    RecordDocuments {
        /// References already written to the document store.
        documents: Vec<NewDocument>,
    },
    /// Append a signature event to a stage.
    AppendSignature {
        /// Stage signed.
        stage: StageKind,
        /// Signing party.
        role: SignerRole,
        /// Capture method.
        method: SignatureMethod,
        /// Signature payload reference.
        payload_ref: String,
    },
    /// Issue a capability token for a stage (implicitly invalidating any
    /// previously active token for it).
    IssueToken {
        /// Stage the token acts on.
        stage: StageKind,
        /// Action the token authorizes.
        scope: TokenScope,
        /// Signature role for signature scopes.
        signer_role: Option<SignerRole>,
    },
    /// Invalidate a stage's active token without replacement.
    InvalidateToken {
        /// Stage whose token is withdrawn.
        stage: StageKind,
    },
    /// Set or clear the case's rejection bookkeeping.
    SetRejectedFrom {
        /// New value; `None` clears it.
        status: Option<CaseStatus>,
    },
    /// Emit a workflow notification after commit.
    Notify {
        /// What to announce.
        kind: NotificationKind,
    },
}

/// Result of a legal transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Status the case moves to.
    pub next: CaseStatus,
    /// Effects to commit with the status change.
    pub effects: Vec<SideEffect>,
}

impl Outcome {
    fn new(next: CaseStatus) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Why the inner table rejected an application. `Illegal` is expanded into
/// a full [`EngineError::IllegalTransition`] (with the allowed-event list)
/// only at the public boundary, so legality probing cannot recurse.
enum TransitionFailure {
    Illegal,
    Other(EngineError),
}

impl From<EngineError> for TransitionFailure {
    fn from(e: EngineError) -> Self {
        TransitionFailure::Other(e)
    }
}

/// Compute the transition for `(status, event, route)`.
///
/// Pure: same inputs, same output. Errors with `IllegalTransition` for any
/// pair outside the table.
pub fn transition(
    status: CaseStatus,
    route: OnboardingRoute,
    event: &CaseEvent,
    ctx: &TransitionCtx,
) -> Result<Outcome, EngineError> {
    transition_inner(status, route, event, ctx).map_err(|failure| match failure {
        TransitionFailure::Illegal => EngineError::IllegalTransition {
            from: status,
            event: event.kind(),
            allowed: allowed_events(status, route),
        },
        TransitionFailure::Other(e) => e,
    })
}

fn transition_inner(
    status: CaseStatus,
    route: OnboardingRoute,
    event: &CaseEvent,
    ctx: &TransitionCtx,
) -> Result<Outcome, TransitionFailure> {
    use CaseStatus as S;

    let spec = routes::spec_for(route);

    let outcome = match (status, event) {
        // --- document collection -------------------------------------------
        (S::Draft, CaseEvent::SendDocumentRequest) => Outcome::new(S::PendingDocuments)
            .with(SideEffect::SetStageState {
                stage: StageKind::Documents,
                state: StageState::AwaitingExternalResponse,
            })
            .with(SideEffect::IssueToken {
                stage: StageKind::Documents,
                scope: TokenScope::DocumentUpload,
                signer_role: None,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::DocumentLinkIssued,
            }),

        // Internal shortcut: the consultant collected documents directly.
        (S::Draft, CaseEvent::DocumentsUploaded { documents }) => {
            let mut outcome = after_documents(spec);
            outcome.effects.insert(
                0,
                SideEffect::RecordDocuments {
                    documents: documents.clone(),
                },
            );
            outcome.effects.insert(
                1,
                SideEffect::SetStageState {
                    stage: StageKind::Documents,
                    state: StageState::Submitted,
                },
            );
            outcome
        }

        (S::PendingDocuments, CaseEvent::DocumentsUploaded { documents }) => {
            Outcome::new(S::DocumentsUploaded)
                .with(SideEffect::RecordDocuments {
                    documents: documents.clone(),
                })
                .with(SideEffect::SetStageState {
                    stage: StageKind::Documents,
                    state: StageState::Submitted,
                })
                .with(SideEffect::InvalidateToken {
                    stage: StageKind::Documents,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::DocumentsReceived,
                })
        }

        (S::DocumentsUploaded, CaseEvent::Advance) => after_documents(spec),

        // --- quote / costing ------------------------------------------------
        (S::PendingThirdPartyResponse, CaseEvent::ThirdPartySubmitted { quote_ref })
            if spec.uses_third_party_quote() =>
        {
            Outcome::new(S::PendingReview)
                .with(SideEffect::SetStageState {
                    stage: StageKind::ThirdPartyQuote,
                    state: StageState::Submitted,
                })
                .with(SideEffect::SetStageArtifact {
                    stage: StageKind::ThirdPartyQuote,
                    artifact_ref: quote_ref.clone(),
                })
                .with(SideEffect::InvalidateToken {
                    stage: StageKind::ThirdPartyQuote,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::QuoteReceived,
                })
        }

        (S::PendingCdsCs, CaseEvent::CostingSubmitted { sheet_ref })
            if !spec.uses_third_party_quote() =>
        {
            Outcome::new(S::PendingReview)
                .with(SideEffect::SetStageState {
                    stage: StageKind::CostingDealSheet,
                    state: StageState::Submitted,
                })
                .with(SideEffect::SetStageArtifact {
                    stage: StageKind::CostingDealSheet,
                    artifact_ref: sheet_ref.clone(),
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::CostingSubmitted,
                })
        }

        // --- review gates ---------------------------------------------------
        (S::PendingReview, CaseEvent::Approve) => Outcome::new(S::Approved)
            .with(SideEffect::SetStageState {
                stage: spec.quote_stage(),
                state: StageState::Approved,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::CaseApproved,
            }),

        (S::ContractUploaded, CaseEvent::Approve) if spec.uploads_contract => {
            Outcome::new(S::ContractApproved)
                .with(SideEffect::SetStageState {
                    stage: StageKind::Contract,
                    state: StageState::Approved,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::ContractApproved,
                })
        }

        (S::AwaitingWorkOrderApproval, CaseEvent::Approve) if spec.has_work_order => Outcome::new(S::Active)
            .with(SideEffect::SetStageState {
                stage: StageKind::WorkOrderApproval,
                state: StageState::Approved,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::WorkOrderApproved,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::ContractorActivated,
            }),

        (from, CaseEvent::Reject { reason })
            if from.is_review_class() && review_reachable(spec, from) =>
        {
            let stage = routes::stage_for_status(from, route);
            let mut outcome = Outcome::new(S::Rejected)
                .with(SideEffect::SetRejectedFrom { status: Some(from) });
            if let Some(stage) = stage {
                outcome = outcome.with(SideEffect::SetStageState {
                    stage,
                    state: StageState::Rejected,
                });
            }
            outcome.with(SideEffect::Notify {
                kind: NotificationKind::CaseRejected {
                    reason: reason.clone(),
                },
            })
        }

        (S::Rejected, CaseEvent::Reopen) => reopen(spec, ctx.rejected_from)?,

        // --- signature stage (COHF or contract, per route) ------------------
        (S::Approved, CaseEvent::SendForSignature) => {
            let first_external = spec
                .external_signers()
                .next()
                .expect("validated: every quorum has an external signer");
            Outcome::new(S::PendingSignature)
                .with(SideEffect::SetStageState {
                    stage: spec.signature_stage,
                    state: StageState::AwaitingExternalResponse,
                })
                .with(SideEffect::IssueToken {
                    stage: spec.signature_stage,
                    scope: TokenScope::for_signature_stage(spec.signature_stage),
                    signer_role: Some(first_external),
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::SignatureRequested {
                        role: first_external,
                    },
                })
        }

        (
            S::PendingSignature | S::PendingSuperadminSignature,
            CaseEvent::SignatureCaptured {
                role,
                method,
                payload_ref,
            },
        ) => signature_captured(spec, status, ctx, *role, *method, payload_ref)?,

        // --- third-party contract upload (COHF routes) ----------------------
        (S::Signed, CaseEvent::Advance) if spec.uploads_contract => {
            Outcome::new(S::PendingContractUpload)
                .with(SideEffect::SetStageState {
                    stage: StageKind::Contract,
                    state: StageState::AwaitingExternalResponse,
                })
                .with(SideEffect::IssueToken {
                    stage: StageKind::Contract,
                    scope: TokenScope::ContractUpload,
                    signer_role: None,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::ContractRequested,
                })
        }

        (S::PendingContractUpload, CaseEvent::ContractUploaded { contract_ref })
            if spec.uploads_contract =>
        {
            Outcome::new(S::ContractUploaded)
                .with(SideEffect::SetStageState {
                    stage: StageKind::Contract,
                    state: StageState::Submitted,
                })
                .with(SideEffect::SetStageArtifact {
                    stage: StageKind::Contract,
                    artifact_ref: contract_ref.clone(),
                })
                .with(SideEffect::InvalidateToken {
                    stage: StageKind::Contract,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::ContractReceived,
                })
        }

        // --- work order -----------------------------------------------------
        (S::Signed, CaseEvent::SendWorkOrder)
            if spec.has_work_order && !spec.uploads_contract =>
        {
            send_work_order()
        }

        (S::ContractApproved, CaseEvent::SendWorkOrder)
            if spec.uploads_contract && spec.has_work_order =>
        {
            send_work_order()
        }

        (S::PendingClientWoSignature, CaseEvent::ClientSigned { method, payload_ref })
            if spec.has_work_order =>
        {
            Outcome::new(S::WorkOrderCompleted)
                .with(SideEffect::SetStageState {
                    stage: StageKind::ClientSignature,
                    state: StageState::Submitted,
                })
                .with(SideEffect::AppendSignature {
                    stage: StageKind::ClientSignature,
                    role: SignerRole::Client,
                    method: *method,
                    payload_ref: payload_ref.clone(),
                })
                .with(SideEffect::InvalidateToken {
                    stage: StageKind::ClientSignature,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::WorkOrderSigned,
                })
        }

        (S::WorkOrderCompleted, CaseEvent::SubmitWorkOrderApproval) if spec.has_work_order => {
            Outcome::new(S::AwaitingWorkOrderApproval)
                .with(SideEffect::SetStageState {
                    stage: StageKind::ClientSignature,
                    state: StageState::Approved,
                })
                .with(SideEffect::SetStageState {
                    stage: StageKind::WorkOrder,
                    state: StageState::Approved,
                })
                .with(SideEffect::SetStageState {
                    stage: StageKind::WorkOrderApproval,
                    state: StageState::Submitted,
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::WorkOrderAwaitingApproval,
                })
        }

        // --- activation and holds ------------------------------------------
        (S::Signed, CaseEvent::Activate) if !spec.has_work_order => Outcome::new(S::Active)
            .with(SideEffect::Notify {
                kind: NotificationKind::ContractorActivated,
            }),

        (S::Active, CaseEvent::Suspend) => Outcome::new(S::Suspended).with(SideEffect::Notify {
            kind: NotificationKind::ContractorSuspended,
        }),

        (S::Suspended, CaseEvent::Reinstate) => Outcome::new(S::Active).with(SideEffect::Notify {
            kind: NotificationKind::ContractorReinstated,
        }),

        _ => return Err(TransitionFailure::Illegal),
    };

    Ok(outcome)
}

/// Events currently legal for a case in `status` on `route`.
///
/// Derived by probing the transition table itself, so the legality answer
/// can never drift from it.
pub fn allowed_events(status: CaseStatus, route: OnboardingRoute) -> Vec<EventKind> {
    EventKind::ALL
        .iter()
        .copied()
        .filter(|kind| {
            let (event, ctx) = probe(route, *kind);
            transition_inner(status, route, &event, &ctx).is_ok()
        })
        .collect()
}

/// Representative event + context for legality probing.
fn probe(route: OnboardingRoute, kind: EventKind) -> (CaseEvent, TransitionCtx) {
    let spec = routes::spec_for(route);
    let ctx = TransitionCtx {
        origin: EventOrigin::Internal,
        // Any concrete review-class value works; reopen legality depends
        // only on the status being `rejected`.
        rejected_from: Some(CaseStatus::PendingReview),
        signature: Some(SignatureProgress {
            quorum_complete: false,
            externals_complete: false,
            next_external: None,
        }),
    };
    let event = match kind {
        EventKind::SendDocumentRequest => CaseEvent::SendDocumentRequest,
        EventKind::DocumentsUploaded => CaseEvent::DocumentsUploaded { documents: vec![] },
        EventKind::Advance => CaseEvent::Advance,
        EventKind::CostingSubmitted => CaseEvent::CostingSubmitted {
            sheet_ref: String::new(),
        },
        EventKind::ThirdPartySubmitted => CaseEvent::ThirdPartySubmitted {
            quote_ref: String::new(),
        },
        EventKind::Approve => CaseEvent::Approve,
        EventKind::Reject => CaseEvent::Reject {
            reason: String::new(),
        },
        EventKind::Reopen => CaseEvent::Reopen,
        EventKind::SendForSignature => CaseEvent::SendForSignature,
        EventKind::SignatureCaptured => CaseEvent::SignatureCaptured {
            role: spec.quorum[0],
            method: SignatureMethod::Typed,
            payload_ref: String::new(),
        },
        EventKind::ContractUploaded => CaseEvent::ContractUploaded {
            contract_ref: String::new(),
        },
        EventKind::SendWorkOrder => CaseEvent::SendWorkOrder,
        EventKind::ClientSigned => CaseEvent::ClientSigned {
            method: SignatureMethod::Typed,
            payload_ref: String::new(),
        },
        EventKind::SubmitWorkOrderApproval => CaseEvent::SubmitWorkOrderApproval,
        EventKind::Activate => CaseEvent::Activate,
        EventKind::Suspend => CaseEvent::Suspend,
        EventKind::Reinstate => CaseEvent::Reinstate,
    };
    (event, ctx)
}

/// Whether a review-class status is reachable at all on this route.
fn review_reachable(spec: &RouteSpec, status: CaseStatus) -> bool {
    match status {
        CaseStatus::PendingReview => true,
        CaseStatus::ContractUploaded => spec.uploads_contract,
        CaseStatus::AwaitingWorkOrderApproval => spec.has_work_order,
        _ => false,
    }
}

/// Route branch after document collection: quote routes go to the third
/// party, the rest to the internal costing sheet.
fn after_documents(spec: &RouteSpec) -> Outcome {
    if spec.uses_third_party_quote() {
        Outcome::new(CaseStatus::PendingThirdPartyResponse)
            .with(SideEffect::SetStageState {
                stage: StageKind::ThirdPartyQuote,
                state: StageState::AwaitingExternalResponse,
            })
            .with(SideEffect::IssueToken {
                stage: StageKind::ThirdPartyQuote,
                scope: TokenScope::QuoteSubmission,
                signer_role: None,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::QuoteRequested,
            })
    } else {
        Outcome::new(CaseStatus::PendingCdsCs)
            .with(SideEffect::SetStageState {
                stage: StageKind::CostingDealSheet,
                state: StageState::Sent,
            })
            .with(SideEffect::Notify {
                kind: NotificationKind::DocumentsReceived,
            })
    }
}

fn send_work_order() -> Outcome {
    Outcome::new(CaseStatus::PendingClientWoSignature)
        .with(SideEffect::SetStageState {
            stage: StageKind::WorkOrder,
            state: StageState::Sent,
        })
        .with(SideEffect::SetStageState {
            stage: StageKind::ClientSignature,
            state: StageState::AwaitingExternalResponse,
        })
        .with(SideEffect::IssueToken {
            stage: StageKind::ClientSignature,
            scope: TokenScope::WorkOrderSignature,
            signer_role: Some(SignerRole::Client),
        })
        .with(SideEffect::Notify {
            kind: NotificationKind::WorkOrderIssued,
        })
}

/// Signature-capture sub-table. The quorum position in `ctx` already counts
/// the incoming signature.
fn signature_captured(
    spec: &RouteSpec,
    status: CaseStatus,
    ctx: &TransitionCtx,
    role: SignerRole,
    method: SignatureMethod,
    payload_ref: &str,
) -> Result<Outcome, EngineError> {
    let progress = ctx.signature.ok_or_else(|| EngineError::Configuration {
        message: "signature event applied without quorum context".to_string(),
    })?;

    let stage = spec.signature_stage;
    let append = SideEffect::AppendSignature {
        stage,
        role,
        method,
        payload_ref: payload_ref.to_string(),
    };

    if progress.quorum_complete {
        return Ok(Outcome::new(CaseStatus::Signed)
            .with(append)
            .with(SideEffect::SetStageState {
                stage,
                state: StageState::Approved,
            })
            .with(SideEffect::InvalidateToken { stage })
            .with(SideEffect::Notify {
                kind: NotificationKind::StageSigned { stage },
            }));
    }

    if status == CaseStatus::PendingSignature
        && spec.two_phase_signing
        && progress.externals_complete
    {
        return Ok(Outcome::new(CaseStatus::PendingSuperadminSignature)
            .with(append)
            .with(SideEffect::InvalidateToken { stage })
            .with(SideEffect::Notify {
                kind: NotificationKind::CountersignRequested,
            }));
    }

    // Quorum still open: stay put. If the external link was just consumed
    // and another external signer is outstanding, hand the link chain on.
    let mut outcome = Outcome::new(status).with(append);
    if ctx.origin == EventOrigin::External {
        if let Some(next_role) = progress.next_external {
            outcome = outcome
                .with(SideEffect::IssueToken {
                    stage,
                    scope: TokenScope::for_signature_stage(stage),
                    signer_role: Some(next_role),
                })
                .with(SideEffect::Notify {
                    kind: NotificationKind::SignatureRequested { role: next_role },
                });
        }
    }
    Ok(outcome)
}

/// Reopen a rejected case at the resubmission state for the stage that was
/// under review when the rejection happened.
fn reopen(
    spec: &RouteSpec,
    rejected_from: Option<CaseStatus>,
) -> Result<Outcome, EngineError> {
    let from = rejected_from.ok_or_else(|| EngineError::Configuration {
        message: "rejected case has no recorded rejection origin".to_string(),
    })?;

    let outcome = match from {
        CaseStatus::PendingReview => {
            if spec.uses_third_party_quote() {
                Outcome::new(CaseStatus::PendingThirdPartyResponse)
                    .with(SideEffect::SetStageState {
                        stage: StageKind::ThirdPartyQuote,
                        state: StageState::AwaitingExternalResponse,
                    })
                    .with(SideEffect::IssueToken {
                        stage: StageKind::ThirdPartyQuote,
                        scope: TokenScope::QuoteSubmission,
                        signer_role: None,
                    })
            } else {
                Outcome::new(CaseStatus::PendingCdsCs).with(SideEffect::SetStageState {
                    stage: StageKind::CostingDealSheet,
                    state: StageState::Sent,
                })
            }
        }
        CaseStatus::ContractUploaded => Outcome::new(CaseStatus::PendingContractUpload)
            .with(SideEffect::SetStageState {
                stage: StageKind::Contract,
                state: StageState::AwaitingExternalResponse,
            })
            .with(SideEffect::IssueToken {
                stage: StageKind::Contract,
                scope: TokenScope::ContractUpload,
                signer_role: None,
            }),
        CaseStatus::AwaitingWorkOrderApproval => {
            Outcome::new(CaseStatus::PendingClientWoSignature)
                .with(SideEffect::SetStageState {
                    stage: StageKind::ClientSignature,
                    state: StageState::AwaitingExternalResponse,
                })
                .with(SideEffect::IssueToken {
                    stage: StageKind::ClientSignature,
                    scope: TokenScope::WorkOrderSignature,
                    signer_role: Some(SignerRole::Client),
                })
        }
        other => {
            return Err(EngineError::Configuration {
                message: format!("rejection recorded from non-review status '{}'", other),
            });
        }
    };

    Ok(outcome
        .with(SideEffect::SetRejectedFrom { status: None })
        .with(SideEffect::Notify {
            kind: NotificationKind::CaseReopened,
        }))
}
