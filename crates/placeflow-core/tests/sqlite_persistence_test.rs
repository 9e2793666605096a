// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The SQLite backend behind the same engine flows as the memory backend.

mod common;

use std::sync::Arc;

use common::*;

use chrono::Utc;
use placeflow_core::case::{
    CaseEvent, CaseStatus, DocumentKind, OnboardingRoute, SignatureMethod, SignerRole,
};
use placeflow_core::clock::ManualClock;
use placeflow_core::engine::WorkflowEngine;
use placeflow_core::error::TokenError;
use placeflow_core::gateway::{ActionPayload, GatewayResponse};
use placeflow_core::persistence::{Persistence, SqlitePersistence};
use placeflow_core::token;

struct SqliteContext {
    engine: WorkflowEngine,
    persistence: Arc<SqlitePersistence>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    _dir: tempfile::TempDir,
}

async fn sqlite_context() -> SqliteContext {
    let dir = tempfile::tempdir().expect("tempdir");
    let persistence = Arc::new(
        SqlitePersistence::from_path(dir.path().join("placeflow.db"))
            .await
            .expect("sqlite setup"),
    );
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let notifier = Arc::new(RecordingNotifier::new());
    let engine = WorkflowEngine::builder()
        .persistence(persistence.clone())
        .clock(clock.clone())
        .notifier(notifier.clone())
        .build()
        .expect("engine builds");
    SqliteContext {
        engine,
        persistence,
        clock,
        notifier,
        _dir: dir,
    }
}

impl SqliteContext {
    async fn latest_link(&self) -> placeflow_core::case::ExternalLink {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        self.notifier
            .links()
            .into_iter()
            .next_back()
            .expect("a link was issued")
    }
}

#[tokio::test]
async fn test_sqlite_wps_lifecycle_round_trips() {
    let ctx = sqlite_context().await;
    let case_id = ctx
        .engine
        .create_case(
            OnboardingRoute::Wps,
            serde_json::json!({"first_name": "Amira", "client_name": "Acme"}),
            "consultant-1",
        )
        .await
        .unwrap();

    ctx.engine
        .apply_internal_event(case_id, CaseEvent::SendDocumentRequest, "admin-1")
        .await
        .unwrap();
    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Documents {
                files: vec![(DocumentKind::Passport, b"scan".to_vec())],
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));

    for event in [
        CaseEvent::Advance,
        CaseEvent::CostingSubmitted {
            sheet_ref: "mem://sheets/cds".to_string(),
        },
        CaseEvent::Approve,
        CaseEvent::SendForSignature,
    ] {
        ctx.engine
            .apply_internal_event(case_id, event, "admin-1")
            .await
            .unwrap();
    }

    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Signature {
                method: SignatureMethod::Drawn,
                content: b"sig".to_vec(),
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));

    let snap = ctx
        .engine
        .apply_internal_event(
            case_id,
            CaseEvent::SignatureCaptured {
                role: SignerRole::AventusPartyA,
                method: SignatureMethod::Typed,
                payload_ref: "mem://sig/a".to_string(),
            },
            "superadmin-1",
        )
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Signed);

    // Everything survived the round trip through SQL.
    let case = ctx.persistence.get_case(case_id).await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Signed);
    assert_eq!(case.attributes["client_name"], "Acme");

    let stages = ctx.persistence.get_stages(case_id).await.unwrap();
    let contract = stages
        .iter()
        .find(|s| s.stage_kind == placeflow_core::case::StageKind::Contract)
        .unwrap();
    assert_eq!(contract.signatures.len(), 2);
    assert_eq!(
        contract.signatures[0].signer_role,
        SignerRole::Contractor
    );

    let documents = ctx.persistence.get_documents(case_id).await.unwrap();
    assert_eq!(documents.len(), 1);

    let history = ctx.persistence.case_history(case_id).await.unwrap();
    assert_eq!(history[0].event_type, "case_created");
    assert!(history.iter().any(|e| e.event_type == "signature_captured"));
}

#[tokio::test]
async fn test_sqlite_token_cas_single_winner() {
    let ctx = sqlite_context().await;
    let case_id = ctx
        .engine
        .create_case(OnboardingRoute::Wps, serde_json::json!({}), "consultant-1")
        .await
        .unwrap();
    ctx.engine
        .apply_internal_event(case_id, CaseEvent::SendDocumentRequest, "admin-1")
        .await
        .unwrap();
    let digest = token::digest(&token_value(&ctx.latest_link().await));

    let now = ctx.clock.now();
    let (a, b) = futures::join!(
        ctx.persistence.consume_token(&digest, now),
        ctx.persistence.consume_token(&digest, now),
    );
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one consume must win");
    let loser = if a.is_ok() { b } else { a };
    assert_eq!(loser.unwrap_err(), TokenError::AlreadyConsumed.into());
}

#[tokio::test]
async fn test_sqlite_illegal_transition_writes_nothing() {
    let ctx = sqlite_context().await;
    let case_id = ctx
        .engine
        .create_case(OnboardingRoute::Wps, serde_json::json!({}), "consultant-1")
        .await
        .unwrap();

    let before_case = ctx.persistence.get_case(case_id).await.unwrap();
    let before_history = ctx.persistence.case_history(case_id).await.unwrap();

    let err = ctx
        .engine
        .apply_internal_event(case_id, CaseEvent::Approve, "admin-1")
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ILLEGAL_TRANSITION");

    assert_eq!(ctx.persistence.get_case(case_id).await.unwrap(), before_case);
    assert_eq!(
        ctx.persistence.case_history(case_id).await.unwrap(),
        before_history
    );
}
