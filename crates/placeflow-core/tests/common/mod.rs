// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for placeflow-core integration tests.
//!
//! Provides a TestContext wiring the engine to the in-memory backends, a
//! manual clock, and a recording notifier, plus helpers to drive cases
//! along the common paths.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use placeflow_core::case::{
    CaseEvent, CaseSnapshot, DocumentKind, ExternalLink, NewDocument, OnboardingRoute,
    SignatureMethod, SignerRole,
};
use placeflow_core::clock::ManualClock;
pub use placeflow_core::clock::Clock;
use placeflow_core::engine::WorkflowEngine;
use placeflow_core::error::Result;
use placeflow_core::gateway::{ActionPayload, GatewayResponse};
use placeflow_core::notify::{CaseNotification, Notifier, NotifyError};
use placeflow_core::persistence::MemoryPersistence;

/// Notifier that records everything it is asked to deliver.
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<CaseNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<CaseNotification> {
        self.notifications.lock().unwrap().clone()
    }

    /// Links attached to recorded notifications, oldest first.
    pub fn links(&self) -> Vec<ExternalLink> {
        let mut links: Vec<ExternalLink> = Vec::new();
        for n in self.all() {
            for link in n.links {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: CaseNotification) -> std::result::Result<(), NotifyError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Engine plus its injected collaborators.
pub struct TestContext {
    pub engine: WorkflowEngine,
    pub persistence: Arc<MemoryPersistence>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestContext {
    pub fn new() -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = WorkflowEngine::builder()
            .persistence(persistence.clone())
            .clock(clock.clone())
            .notifier(notifier.clone())
            .build()
            .expect("engine builds");
        Self {
            engine,
            persistence,
            clock,
            notifier,
        }
    }

    pub async fn create_case(&self, route: OnboardingRoute) -> Uuid {
        self.engine
            .create_case(route, serde_json::json!({"first_name": "Amira"}), "consultant-1")
            .await
            .expect("case created")
    }

    /// Apply an internal event as a fixed admin actor.
    pub async fn internal(&self, case_id: Uuid, event: CaseEvent) -> Result<CaseSnapshot> {
        self.engine.apply_internal_event(case_id, event, "admin-1").await
    }

    pub async fn snapshot(&self, case_id: Uuid) -> CaseSnapshot {
        self.engine.case_snapshot(case_id).await.expect("snapshot")
    }

    /// Let spawned notification dispatch land.
    pub async fn settle(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(25)).await;
    }

    /// Most recently issued link, after letting dispatch settle.
    pub async fn latest_link(&self) -> ExternalLink {
        self.settle().await;
        self.notifier
            .links()
            .into_iter()
            .next_back()
            .expect("a link was issued")
    }

    /// Internal direct document upload (the consultant collected scans).
    pub async fn upload_documents_internally(&self, case_id: Uuid) -> CaseSnapshot {
        self.internal(
            case_id,
            CaseEvent::DocumentsUploaded {
                documents: vec![
                    NewDocument {
                        kind: DocumentKind::Passport,
                        doc_ref: "mem://seed/passport".to_string(),
                    },
                    NewDocument {
                        kind: DocumentKind::Photo,
                        doc_ref: "mem://seed/photo".to_string(),
                    },
                ],
            },
        )
        .await
        .expect("documents uploaded")
    }

    /// External signature through the gateway; panics unless accepted.
    pub async fn sign_externally(&self, link: &ExternalLink) {
        let response = self
            .engine
            .act_on_token(
                &token_value(link),
                ActionPayload::Signature {
                    method: SignatureMethod::Drawn,
                    content: b"signature image".to_vec(),
                },
            )
            .await;
        assert!(
            matches!(response, GatewayResponse::Accepted { .. }),
            "external signature should be accepted, got {:?}",
            response
        );
    }

    /// Internal signature by one of the Aventus signatories.
    pub async fn sign_internally(&self, case_id: Uuid, role: SignerRole) -> Result<CaseSnapshot> {
        self.internal(
            case_id,
            CaseEvent::SignatureCaptured {
                role,
                method: SignatureMethod::Typed,
                payload_ref: format!("mem://sig/{}", role),
            },
        )
        .await
    }

    /// Drive a costing-route case from draft to `approved`.
    pub async fn drive_to_approved_costing(&self, case_id: Uuid) {
        self.upload_documents_internally(case_id).await;
        self.internal(
            case_id,
            CaseEvent::CostingSubmitted {
                sheet_ref: "mem://seed/costing".to_string(),
            },
        )
        .await
        .expect("costing submitted");
        self.internal(case_id, CaseEvent::Approve).await.expect("approved");
    }

    /// Drive a quote-route case from draft to `approved` using the gateway
    /// for the third-party quote.
    pub async fn drive_to_approved_quote(&self, case_id: Uuid) {
        self.upload_documents_internally(case_id).await;
        let link = self.latest_link().await;
        let response = self
            .engine
            .act_on_token(
                &token_value(&link),
                ActionPayload::Quote {
                    content: b"quote sheet".to_vec(),
                },
            )
            .await;
        assert!(matches!(response, GatewayResponse::Accepted { .. }));
        self.internal(case_id, CaseEvent::Approve).await.expect("approved");
    }
}

/// Raw token value carried in a link's URL (its last path segment).
pub fn token_value(link: &ExternalLink) -> String {
    link.url
        .rsplit('/')
        .next()
        .expect("link has a token segment")
        .to_string()
}
