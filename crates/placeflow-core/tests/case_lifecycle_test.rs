// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end walkthroughs of the onboarding routes.

mod common;

use common::*;

use placeflow_core::case::{
    CaseEvent, CaseStatus, DocumentKind, EventKind, OnboardingRoute, SignerRole, StageKind,
    StageState,
};
use placeflow_core::gateway::{ActionPayload, GatewayResponse};
use placeflow_core::notify::NotificationKind;

#[tokio::test]
async fn test_wps_full_lifecycle() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Wps).await;
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::Draft);

    // 1. Send the contractor their upload link.
    let snap = ctx
        .internal(case_id, CaseEvent::SendDocumentRequest)
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::PendingDocuments);

    // 2. Contractor uploads through the link.
    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Documents {
                files: vec![
                    (DocumentKind::Passport, b"passport scan".to_vec()),
                    (DocumentKind::Photo, b"photo".to_vec()),
                ],
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::DocumentsUploaded);

    let documents = ctx.engine.case_documents(case_id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents.iter().any(|d| d.kind == DocumentKind::Passport));

    // 3. Route into costing, complete it, pass review.
    ctx.internal(case_id, CaseEvent::Advance).await.unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingCdsCs);
    ctx.internal(
        case_id,
        CaseEvent::CostingSubmitted {
            sheet_ref: "mem://sheets/cds".to_string(),
        },
    )
    .await
    .unwrap();
    let snap = ctx.internal(case_id, CaseEvent::Approve).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Approved);

    // 4. Contract signing: contractor through the link, then countersign.
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);

    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingSuperadminSignature
    );

    let snap = ctx
        .sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Signed);
    let contract = snap
        .stages
        .iter()
        .find(|s| s.stage_kind == StageKind::Contract)
        .unwrap();
    assert_eq!(contract.state, StageState::Approved);
    assert_eq!(contract.signatures.len(), 2);

    // 5. Work order: client signs, ops countersigns and approves.
    ctx.internal(case_id, CaseEvent::SendWorkOrder).await.unwrap();
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingClientWoSignature
    );
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::WorkOrderCompleted
    );

    ctx.internal(case_id, CaseEvent::SubmitWorkOrderApproval)
        .await
        .unwrap();
    let snap = ctx.internal(case_id, CaseEvent::Approve).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Active);

    // 6. Hold and reinstate.
    let snap = ctx.internal(case_id, CaseEvent::Suspend).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Suspended);
    let snap = ctx.internal(case_id, CaseEvent::Reinstate).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Active);

    // The audit trail recorded the whole journey.
    let history = ctx.engine.case_history(case_id).await.unwrap();
    assert!(history.len() >= 12);
    assert_eq!(history[0].event_type, "case_created");
    assert!(history.iter().any(|e| e.event_type == "client_signed"));

    ctx.settle().await;
    let kinds: Vec<_> = ctx.notifier.all().into_iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::ContractorActivated));
    assert!(kinds.contains(&NotificationKind::CountersignRequested));
}

#[tokio::test]
async fn test_third_party_full_lifecycle() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::ThirdParty).await;

    // Documents straight from the consultant: branches to the quote request.
    let snap = ctx.upload_documents_internally(case_id).await;
    assert_eq!(snap.status, CaseStatus::PendingThirdPartyResponse);

    // Third party returns its quote through the link.
    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Quote {
                content: b"rates and provisions".to_vec(),
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingReview);

    ctx.internal(case_id, CaseEvent::Approve).await.unwrap();

    // COHF: third party signs through the link, both signatories counter.
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingSuperadminSignature
    );

    ctx.sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap();
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingSuperadminSignature
    );
    let snap = ctx
        .sign_internally(case_id, SignerRole::AventusPartyB)
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Signed);
    let cohf = snap
        .stages
        .iter()
        .find(|s| s.stage_kind == StageKind::Cohf)
        .unwrap();
    assert_eq!(cohf.signatures.len(), 3);

    // Third party uploads its employment contract.
    ctx.internal(case_id, CaseEvent::Advance).await.unwrap();
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingContractUpload
    );
    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Contract {
                content: b"employment contract".to_vec(),
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::ContractUploaded);

    ctx.internal(case_id, CaseEvent::Approve).await.unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::ContractApproved);

    // Work order and activation.
    ctx.internal(case_id, CaseEvent::SendWorkOrder).await.unwrap();
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    ctx.internal(case_id, CaseEvent::SubmitWorkOrderApproval)
        .await
        .unwrap();
    let snap = ctx.internal(case_id, CaseEvent::Approve).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Active);
}

#[tokio::test]
async fn test_freelancer_activates_without_work_order() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Freelancer).await;
    ctx.drive_to_approved_costing(case_id).await;

    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();

    // Externals chain: contractor first, then the client link goes out.
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);

    let client_link = ctx.latest_link().await;
    assert_ne!(token_value(&link), token_value(&client_link));
    ctx.sign_externally(&client_link).await;
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingSuperadminSignature
    );

    ctx.sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::Signed);

    // No work order on this route: straight to active.
    let snap = ctx.internal(case_id, CaseEvent::Activate).await.unwrap();
    assert_eq!(snap.status, CaseStatus::Active);
    assert!(!snap.stages.iter().any(|s| s.stage_kind == StageKind::WorkOrder));
}

#[tokio::test]
async fn test_illegal_event_leaves_case_untouched() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Wps).await;

    let before = ctx.snapshot(case_id).await;
    let err = ctx.internal(case_id, CaseEvent::Approve).await.unwrap_err();
    assert_eq!(err.error_code(), "ILLEGAL_TRANSITION");

    let after = ctx.snapshot(case_id).await;
    assert_eq!(before, after, "failed event must not change the case");

    // The error tells the internal actor what they can do instead.
    match err {
        placeflow_core::error::EngineError::IllegalTransition { allowed, .. } => {
            assert_eq!(
                allowed,
                vec![EventKind::SendDocumentRequest, EventKind::DocumentsUploaded]
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_token_gated_events_refused_internally() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::ThirdParty).await;
    ctx.upload_documents_internally(case_id).await;

    // The case is waiting on the third party, but an internal actor cannot
    // fake the submission: that event only exists through the gateway.
    let err = ctx
        .internal(
            case_id,
            CaseEvent::ThirdPartySubmitted {
                quote_ref: "mem://forged/quote".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ILLEGAL_TRANSITION");
    assert_eq!(
        ctx.snapshot(case_id).await.status,
        CaseStatus::PendingThirdPartyResponse
    );
}

#[tokio::test]
async fn test_reject_then_reopen_restores_quote_stage() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Saudi).await;
    ctx.upload_documents_internally(case_id).await;
    let link = ctx.latest_link().await;
    ctx.engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Quote {
                content: b"quote".to_vec(),
            },
        )
        .await;

    let snap = ctx
        .internal(
            case_id,
            CaseEvent::Reject {
                reason: "rates above client budget".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Rejected);
    assert_eq!(snap.pending_actions, vec![EventKind::Reopen]);

    // Absorbing: review actions are gone.
    let err = ctx.internal(case_id, CaseEvent::Approve).await.unwrap_err();
    assert_eq!(err.error_code(), "ILLEGAL_TRANSITION");

    // Reopen goes back to the quote request with a fresh link.
    let snap = ctx.internal(case_id, CaseEvent::Reopen).await.unwrap();
    assert_eq!(snap.status, CaseStatus::PendingThirdPartyResponse);

    let link = ctx.latest_link().await;
    let response = ctx
        .engine
        .act_on_token(
            &token_value(&link),
            ActionPayload::Quote {
                content: b"revised quote".to_vec(),
            },
        )
        .await;
    assert!(matches!(response, GatewayResponse::Accepted { .. }));
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingReview);
}

#[tokio::test]
async fn test_snapshot_exposes_no_token_values() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Wps).await;
    ctx.internal(case_id, CaseEvent::SendDocumentRequest)
        .await
        .unwrap();

    let link = ctx.latest_link().await;
    let raw = token_value(&link);

    let snap = ctx.snapshot(case_id).await;
    let documents_stage = snap
        .stages
        .iter()
        .find(|s| s.stage_kind == StageKind::Documents)
        .unwrap();
    assert!(documents_stage.has_active_token);
    assert!(documents_stage.token_expiry.is_some());

    // The raw value must not appear anywhere in the serialized snapshot.
    let serialized = serde_json::to_string(&snap).unwrap();
    assert!(!serialized.contains(&raw));
}
