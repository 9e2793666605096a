// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The workflow engine.
//!
//! [`WorkflowEngine`] owns the canonical case state and is the only writer.
//! Each application of an event:
//!
//! 1. serializes on the case id (one transition per case at a time),
//! 2. loads the case and its stages,
//! 3. computes the pure transition (see [`crate::machine`]),
//! 4. commits the status change and every declarative side effect in one
//!    atomic batch, or nothing at all,
//! 5. dispatches notifications after the lock is released.
//!
//! Blob uploads never happen under the case lock; callers (and the
//! gateway) write to the document store first and pass references in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Duration;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::case::{
    CaseDocument, CaseEvent, CaseSnapshot, CaseStatus, ContractorCase, EventKind, ExternalLink,
    OnboardingRoute, SignatureEvent, SignerRole, StageKind, StageRecord, StageSnapshot,
};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineSettings;
use crate::document::{DocumentStore, MemoryDocumentStore};
use crate::error::{EngineError, Result, SignatureError};
use crate::gateway::{ActionPayload, GatewayResponse};
use crate::machine::{self, EventOrigin, SideEffect, TransitionCtx};
use crate::notify::{self, CaseNotification, LoggingNotifier, NotificationKind, Notifier};
use crate::persistence::{CaseEventRecord, CommitBatch, NewCaseEvent, Persistence};
use crate::routes;
use crate::signature;
use crate::token::{TokenScope, TokenService};

/// Per-case async lock registry.
///
/// All transition attempts for one case are mutually exclusive; different
/// cases proceed fully in parallel. Entries for idle cases are swept
/// opportunistically once the registry grows past a threshold.
struct CaseLocks {
    inner: StdMutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

const LOCK_SWEEP_THRESHOLD: usize = 1024;

impl CaseLocks {
    fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, case_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("lock registry poisoned");
            if map.len() > LOCK_SWEEP_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(case_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Builder for creating a [`WorkflowEngine`].
pub struct WorkflowEngineBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    documents: Option<Arc<dyn DocumentStore>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    settings: EngineSettings,
}

impl std::fmt::Debug for WorkflowEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngineBuilder")
            .field("persistence", &self.persistence.as_ref().map(|_| "..."))
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for WorkflowEngineBuilder {
    fn default() -> Self {
        Self {
            persistence: None,
            documents: None,
            notifier: None,
            clock: None,
            settings: EngineSettings::default(),
        }
    }
}

impl WorkflowEngineBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence layer (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the document store. Default: in-memory.
    pub fn documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Set the notifier. Default: tracing-based logging notifier.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the clock. Default: system time.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override engine settings (link base URL, token TTLs).
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the engine.
    ///
    /// Validates the route tables: an incoherent deployment fails here, at
    /// startup, not per-request.
    pub fn build(self) -> Result<WorkflowEngine> {
        let persistence = self.persistence.ok_or_else(|| EngineError::Configuration {
            message: "persistence is required".to_string(),
        })?;
        routes::validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(WorkflowEngine {
            tokens: TokenService::new(persistence.clone(), clock.clone()),
            persistence,
            documents: self
                .documents
                .unwrap_or_else(|| Arc::new(MemoryDocumentStore::new())),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LoggingNotifier)),
            clock,
            settings: self.settings,
            locks: CaseLocks::new(),
        })
    }
}

/// The workflow engine: canonical case state and the only legal writer.
pub struct WorkflowEngine {
    pub(crate) persistence: Arc<dyn Persistence>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tokens: TokenService,
    pub(crate) settings: EngineSettings,
    locks: CaseLocks,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Create a new builder for configuring the engine.
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    /// The document store this engine hands references from.
    pub fn document_store(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Create a case in `draft` with its route's stage set.
    #[instrument(skip(self, attributes), fields(route = %route))]
    pub async fn create_case(
        &self,
        route: OnboardingRoute,
        attributes: serde_json::Value,
        actor: &str,
    ) -> Result<Uuid> {
        let now = self.clock.now();
        let case = ContractorCase {
            id: Uuid::new_v4(),
            onboarding_route: route,
            status: CaseStatus::Draft,
            rejected_from: None,
            attributes,
            created_at: now,
            updated_at: now,
        };
        let stages: Vec<StageRecord> = routes::stages_for(route)
            .iter()
            .map(|kind| StageRecord::new(*kind))
            .collect();

        self.persistence
            .insert_case(
                &case,
                &stages,
                NewCaseEvent {
                    event_type: "case_created".to_string(),
                    actor: Some(actor.to_string()),
                    detail: Some(json!({ "route": route.as_str() })),
                },
            )
            .await?;

        info!(case_id = %case.id, "case created");
        notify::dispatch(
            self.notifier.clone(),
            vec![CaseNotification {
                case_id: case.id,
                kind: NotificationKind::CaseCreated,
                links: vec![],
            }],
        );
        Ok(case.id)
    }

    /// Apply an event on behalf of an authenticated internal user.
    ///
    /// Token-gated events (`third_party_submitted`, `contract_uploaded`,
    /// `client_signed`) are refused here: they only exist through the
    /// gateway. Signature captures through this path are limited to the
    /// internal signatories.
    #[instrument(skip(self, event), fields(case_id = %case_id, event = %event.kind()))]
    pub async fn apply_internal_event(
        &self,
        case_id: Uuid,
        event: CaseEvent,
        actor: &str,
    ) -> Result<CaseSnapshot> {
        self.apply_event(case_id, event, EventOrigin::Internal, actor)
            .await
    }

    /// Apply an event against the case, serialized per case id.
    pub(crate) async fn apply_event(
        &self,
        case_id: Uuid,
        event: CaseEvent,
        origin: EventOrigin,
        actor: &str,
    ) -> Result<CaseSnapshot> {
        let _guard = self.locks.acquire(case_id).await;

        let case = self
            .persistence
            .get_case(case_id)
            .await?
            .ok_or(EngineError::CaseNotFound { case_id })?;
        let stages = self.persistence.get_stages(case_id).await?;

        if origin == EventOrigin::Internal && event.kind().requires_token() {
            return Err(self.internal_illegal(&case, event.kind()));
        }

        let ctx = self.transition_ctx(&case, &stages, &event, origin)?;
        let outcome = machine::transition(case.status, case.onboarding_route, &event, &ctx)?;

        let (batch, links, notes) = self.prepare_commit(&case, &event, actor, origin, outcome);

        if !self.persistence.commit_transition(&batch).await? {
            // The per-case lock makes this unreachable short of an external
            // writer; surface it rather than retrying blind.
            return Err(EngineError::Database {
                operation: "commit_transition".to_string(),
                details: format!("case '{}' changed outside the engine", case_id),
            });
        }

        info!(
            from = %batch.expected_status,
            to = %batch.new_status,
            "transition applied"
        );

        let snapshot = self.load_snapshot(case_id).await?;
        drop(_guard);

        notify::dispatch(
            self.notifier.clone(),
            notes
                .into_iter()
                .map(|kind| CaseNotification {
                    case_id,
                    kind,
                    links: links.clone(),
                })
                .collect(),
        );

        Ok(snapshot)
    }

    /// Regenerate the external link for the stage the case is currently
    /// waiting on.
    ///
    /// The previous link is invalidated in the same commit; the case status
    /// does not change. Fails with `IllegalTransition` when the case is not
    /// waiting on `stage`.
    #[instrument(skip(self), fields(case_id = %case_id, stage = %stage))]
    pub async fn issue_external_link(
        &self,
        case_id: Uuid,
        stage: StageKind,
        ttl_override: Option<Duration>,
    ) -> Result<ExternalLink> {
        let _guard = self.locks.acquire(case_id).await;

        let case = self
            .persistence
            .get_case(case_id)
            .await?
            .ok_or(EngineError::CaseNotFound { case_id })?;
        let stages = self.persistence.get_stages(case_id).await?;

        let (awaiting_stage, scope, signer_role) = self
            .reissue_target(&case, &stages)
            .filter(|(awaiting, _, _)| *awaiting == stage)
            .ok_or_else(|| self.internal_illegal(&case, external_event_kind(stage, &case)))?;

        let now = self.clock.now();
        let ttl = ttl_override.unwrap_or_else(|| scope.ttl(&self.settings));
        let minted = self
            .tokens
            .mint(case_id, awaiting_stage, scope, signer_role, ttl);
        let link = self.link_for(scope, &minted.value, awaiting_stage, minted.record.expires_at);

        let mut batch = CommitBatch::for_case(&case, now);
        batch.tokens_issued.push(minted.record);
        batch.events.push(NewCaseEvent {
            event_type: "link_reissued".to_string(),
            actor: None,
            detail: Some(json!({ "stage": awaiting_stage.as_str() })),
        });

        if !self.persistence.commit_transition(&batch).await? {
            return Err(EngineError::Database {
                operation: "commit_transition".to_string(),
                details: format!("case '{}' changed outside the engine", case_id),
            });
        }
        drop(_guard);

        notify::dispatch(
            self.notifier.clone(),
            vec![CaseNotification {
                case_id,
                kind: NotificationKind::LinkReissued {
                    stage: awaiting_stage,
                },
                links: vec![link.clone()],
            }],
        );

        Ok(link)
    }

    /// Act on an external capability token. See [`crate::gateway`].
    pub async fn act_on_token(&self, token_value: &str, payload: ActionPayload) -> GatewayResponse {
        crate::gateway::act_on_token(self, token_value, payload).await
    }

    /// Read-only view of a case: status, route, stages, and the events an
    /// internal actor may apply next.
    pub async fn case_snapshot(&self, case_id: Uuid) -> Result<CaseSnapshot> {
        self.load_snapshot(case_id).await
    }

    /// List cases, newest first, optionally filtered by status.
    pub async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ContractorCase>> {
        self.persistence.list_cases(status, limit, offset).await
    }

    /// Append-only audit trail for a case, oldest first.
    pub async fn case_history(&self, case_id: Uuid) -> Result<Vec<CaseEventRecord>> {
        self.persistence.case_history(case_id).await
    }

    /// Documents attached to a case.
    pub async fn case_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>> {
        self.persistence.get_documents(case_id).await
    }

    /// Persistence reachability check.
    pub async fn health_check(&self) -> Result<bool> {
        self.persistence.health_check().await
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Build the transition context: origin, reopen bookkeeping, and for
    /// signature events the quorum position including the incoming event.
    fn transition_ctx(
        &self,
        case: &ContractorCase,
        stages: &[StageRecord],
        event: &CaseEvent,
        origin: EventOrigin,
    ) -> Result<TransitionCtx> {
        let signature = match event {
            CaseEvent::SignatureCaptured { role, .. } => {
                let spec = routes::spec_for(case.onboarding_route);
                signature::validate_capture(spec, case.status, *role)?;
                if origin == EventOrigin::Internal && !role.is_internal() {
                    return Err(SignatureError::RoleNotExpected {
                        role: *role,
                        stage: spec.signature_stage,
                    }
                    .into());
                }
                let existing = stages
                    .iter()
                    .find(|s| s.stage_kind == spec.signature_stage)
                    .map(|s| s.signatures.as_slice())
                    .unwrap_or(&[]);
                Some(signature::evaluate(spec, existing, *role))
            }
            _ => None,
        };

        Ok(TransitionCtx {
            origin,
            rejected_from: case.rejected_from,
            signature,
        })
    }

    /// Turn a transition outcome into an atomic commit batch plus the links
    /// and notifications to send after it lands.
    fn prepare_commit(
        &self,
        case: &ContractorCase,
        event: &CaseEvent,
        actor: &str,
        origin: EventOrigin,
        outcome: machine::Outcome,
    ) -> (CommitBatch, Vec<ExternalLink>, Vec<NotificationKind>) {
        let now = self.clock.now();
        let mut batch = CommitBatch::for_case(case, now);
        batch.new_status = outcome.next;

        let mut links = Vec::new();
        let mut notes = Vec::new();

        for effect in outcome.effects {
            match effect {
                SideEffect::SetStageState { stage, state } => {
                    batch.stage_states.push((stage, state));
                }
                SideEffect::SetStageArtifact { stage, artifact_ref } => {
                    batch.stage_artifacts.push((stage, artifact_ref));
                }
                SideEffect::RecordDocuments { documents } => {
                    batch
                        .documents
                        .extend(documents.into_iter().map(|d| CaseDocument {
                            kind: d.kind,
                            doc_ref: d.doc_ref,
                            uploaded_at: now,
                        }));
                }
                SideEffect::AppendSignature {
                    stage,
                    role,
                    method,
                    payload_ref,
                } => {
                    batch.signatures.push((
                        stage,
                        SignatureEvent {
                            signer_role: role,
                            method,
                            payload_ref,
                            signed_at: now,
                        },
                    ));
                }
                SideEffect::IssueToken {
                    stage,
                    scope,
                    signer_role,
                } => {
                    let minted = self.tokens.mint(
                        case.id,
                        stage,
                        scope,
                        signer_role,
                        scope.ttl(&self.settings),
                    );
                    links.push(self.link_for(scope, &minted.value, stage, minted.record.expires_at));
                    batch.tokens_issued.push(minted.record);
                }
                SideEffect::InvalidateToken { stage } => {
                    batch.tokens_invalidated.push(stage);
                }
                SideEffect::SetRejectedFrom { status } => {
                    batch.rejected_from = Some(status);
                }
                SideEffect::Notify { kind } => notes.push(kind),
            }
        }

        batch.events.push(NewCaseEvent {
            event_type: event.kind().as_str().to_string(),
            actor: Some(actor.to_string()),
            detail: Some(json!({
                "from": case.status.as_str(),
                "to": batch.new_status.as_str(),
                "origin": match origin {
                    EventOrigin::Internal => "internal",
                    EventOrigin::External => "external",
                },
            })),
        });

        (batch, links, notes)
    }

    fn link_for(
        &self,
        scope: TokenScope,
        token_value: &str,
        stage: StageKind,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> ExternalLink {
        ExternalLink {
            url: format!(
                "{}{}",
                self.settings.link_base_url.trim_end_matches('/'),
                scope.link_path(token_value)
            ),
            stage,
            expires_at,
        }
    }

    /// The stage the case is currently waiting on externally, with the
    /// scope and signer a regenerated link must carry.
    fn reissue_target(
        &self,
        case: &ContractorCase,
        stages: &[StageRecord],
    ) -> Option<(StageKind, TokenScope, Option<SignerRole>)> {
        let spec = routes::spec_for(case.onboarding_route);
        match case.status {
            CaseStatus::PendingDocuments => {
                Some((StageKind::Documents, TokenScope::DocumentUpload, None))
            }
            CaseStatus::PendingThirdPartyResponse => Some((
                StageKind::ThirdPartyQuote,
                TokenScope::QuoteSubmission,
                None,
            )),
            CaseStatus::PendingSignature => {
                let signed: Vec<SignerRole> = stages
                    .iter()
                    .find(|s| s.stage_kind == spec.signature_stage)
                    .map(|s| s.signatures.iter().map(|e| e.signer_role).collect())
                    .unwrap_or_default();
                let next = spec.external_signers().find(|r| !signed.contains(r))?;
                Some((
                    spec.signature_stage,
                    TokenScope::for_signature_stage(spec.signature_stage),
                    Some(next),
                ))
            }
            CaseStatus::PendingContractUpload => {
                Some((StageKind::Contract, TokenScope::ContractUpload, None))
            }
            CaseStatus::PendingClientWoSignature => Some((
                StageKind::ClientSignature,
                TokenScope::WorkOrderSignature,
                Some(SignerRole::Client),
            )),
            _ => None,
        }
    }

    /// IllegalTransition for internal callers: the allowed list excludes
    /// token-gated events they cannot apply anyway.
    fn internal_illegal(&self, case: &ContractorCase, event: EventKind) -> EngineError {
        let allowed = machine::allowed_events(case.status, case.onboarding_route)
            .into_iter()
            .filter(|k| !k.requires_token())
            .collect();
        EngineError::IllegalTransition {
            from: case.status,
            event,
            allowed,
        }
    }

    async fn load_snapshot(&self, case_id: Uuid) -> Result<CaseSnapshot> {
        let case = self
            .persistence
            .get_case(case_id)
            .await?
            .ok_or(EngineError::CaseNotFound { case_id })?;
        let stages = self.persistence.get_stages(case_id).await?;
        let now = self.clock.now();

        Ok(CaseSnapshot {
            id: case.id,
            route: case.onboarding_route,
            status: case.status,
            stages: stages
                .into_iter()
                .map(|s| StageSnapshot {
                    stage_kind: s.stage_kind,
                    state: s.state,
                    has_active_token: s.token_digest.is_some()
                        && s.token_expiry.is_some_and(|e| e > now),
                    token_expiry: s.token_expiry,
                    artifact_ref: s.artifact_ref,
                    signatures: s.signatures,
                })
                .collect(),
            pending_actions: machine::allowed_events(case.status, case.onboarding_route),
            updated_at: case.updated_at,
        })
    }
}

/// The external event a link for `stage` would produce, for error payloads.
fn external_event_kind(stage: StageKind, case: &ContractorCase) -> EventKind {
    let spec = routes::spec_for(case.onboarding_route);
    match stage {
        StageKind::Documents => EventKind::DocumentsUploaded,
        StageKind::ThirdPartyQuote => EventKind::ThirdPartySubmitted,
        StageKind::CostingDealSheet => EventKind::CostingSubmitted,
        StageKind::Cohf => EventKind::SignatureCaptured,
        StageKind::Contract if spec.uploads_contract => EventKind::ContractUploaded,
        StageKind::Contract => EventKind::SignatureCaptured,
        StageKind::ClientSignature => EventKind::ClientSigned,
        StageKind::WorkOrder | StageKind::WorkOrderApproval => EventKind::SendWorkOrder,
    }
}
