// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signature quorum behavior across routes.

mod common;

use common::*;

use placeflow_core::case::{
    CaseEvent, CaseStatus, OnboardingRoute, SignatureMethod, SignerRole, StageKind,
};

#[tokio::test]
async fn test_three_role_quorum_requires_every_role() {
    // The {client, aventus_party_a, aventus_party_b} quorum: the case stays
    // in pending_signature until the last role signs.
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Saudi).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);

    // Client signs through the link.
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);

    // First internal signatory.
    ctx.sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap();
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);

    // Second internal signatory completes the quorum.
    let snap = ctx
        .sign_internally(case_id, SignerRole::AventusPartyB)
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Signed);
}

#[tokio::test]
async fn test_duplicate_role_never_advances_the_quorum() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Saudi).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();

    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;

    // Party A re-signs three times; party B is still missing.
    for _ in 0..3 {
        let snap = ctx
            .sign_internally(case_id, SignerRole::AventusPartyA)
            .await
            .unwrap();
        assert_eq!(snap.status, CaseStatus::PendingSignature);
    }

    // Every event was appended for audit, none was discarded.
    let snap = ctx.snapshot(case_id).await;
    let contract = snap
        .stages
        .iter()
        .find(|s| s.stage_kind == StageKind::Contract)
        .unwrap();
    assert_eq!(contract.signatures.len(), 4);
    assert_eq!(
        contract
            .signatures
            .iter()
            .filter(|s| s.signer_role == SignerRole::AventusPartyA)
            .count(),
        3
    );

    let snap = ctx
        .sign_internally(case_id, SignerRole::AventusPartyB)
        .await
        .unwrap();
    assert_eq!(snap.status, CaseStatus::Signed);
}

#[tokio::test]
async fn test_role_outside_quorum_is_rejected() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Saudi).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();

    // The third party has no seat in the saudi contract quorum.
    let err = ctx
        .internal(
            case_id,
            CaseEvent::SignatureCaptured {
                role: SignerRole::ThirdParty,
                method: SignatureMethod::Typed,
                payload_ref: "mem://sig/tp".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIGNATURE_REJECTED");
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::PendingSignature);
}

#[tokio::test]
async fn test_internal_channel_cannot_sign_for_external_roles() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Saudi).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();

    // The client signs through their link, never through an admin session.
    let err = ctx
        .internal(
            case_id,
            CaseEvent::SignatureCaptured {
                role: SignerRole::Client,
                method: SignatureMethod::Typed,
                payload_ref: "mem://sig/client".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIGNATURE_REJECTED");
}

#[tokio::test]
async fn test_signature_outside_signature_states_is_rejected() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Wps).await;

    let err = ctx
        .sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIGNATURE_REJECTED");
    assert_eq!(ctx.snapshot(case_id).await.status, CaseStatus::Draft);
}

#[tokio::test]
async fn test_uae_single_countersign_quorum() {
    // uae COHF: third party plus one internal signatory only.
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Uae).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();

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

    let cohf = snap
        .stages
        .iter()
        .find(|s| s.stage_kind == StageKind::Cohf)
        .unwrap();
    assert_eq!(cohf.signatures.len(), 2);
}

#[tokio::test]
async fn test_re_signing_after_quorum_is_rejected() {
    let ctx = TestContext::new();
    let case_id = ctx.create_case(OnboardingRoute::Uae).await;
    ctx.drive_to_approved_quote(case_id).await;
    ctx.internal(case_id, CaseEvent::SendForSignature).await.unwrap();
    let link = ctx.latest_link().await;
    ctx.sign_externally(&link).await;
    ctx.sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap();

    // The stage is signed; the capture window is closed.
    let err = ctx
        .sign_internally(case_id, SignerRole::AventusPartyA)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIGNATURE_REJECTED");
}
