// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow event notification.
//!
//! Notifications are computed as declarative side effects of a transition
//! and dispatched after the commit, outside the case lock. Delivery is
//! best-effort: a failing notifier never affects case state. Dispatch
//! retries up to three times with backoff, then logs and gives up;
//! downstream consumers are expected to be idempotent (at-least-once).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::case::{ExternalLink, SignerRole, StageKind};

/// What happened to a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationKind {
    /// A case was created.
    CaseCreated,
    /// A document upload link went out to the contractor.
    DocumentLinkIssued,
    /// Contractor documents were received.
    DocumentsReceived,
    /// A quote request went out to the third-party company.
    QuoteRequested,
    /// The third-party quote came back.
    QuoteReceived,
    /// The costing/deal sheet was completed.
    CostingSubmitted,
    /// The case passed admin review.
    CaseApproved,
    /// The case was rejected at a review gate.
    CaseRejected {
        /// Reviewer's reason.
        reason: String,
    },
    /// A rejected case was reopened.
    CaseReopened,
    /// A signature request went out.
    SignatureRequested {
        /// Role the request targets.
        role: SignerRole,
    },
    /// All external signatures are in; internal countersign requested.
    CountersignRequested,
    /// A signature stage completed its quorum.
    StageSigned {
        /// The fully signed stage.
        stage: StageKind,
    },
    /// The employment-contract upload link went out to the third party.
    ContractRequested,
    /// The third-party contract was received.
    ContractReceived,
    /// The third-party contract was approved.
    ContractApproved,
    /// The work order went out to the client.
    WorkOrderIssued,
    /// The client signed the work order.
    WorkOrderSigned,
    /// The countersigned work order awaits final approval.
    WorkOrderAwaitingApproval,
    /// The work order was approved.
    WorkOrderApproved,
    /// The contractor is live.
    ContractorActivated,
    /// The contractor was placed on hold.
    ContractorSuspended,
    /// The contractor's suspension was lifted.
    ContractorReinstated,
    /// An external link was regenerated for a stage.
    LinkReissued {
        /// Stage whose link was regenerated.
        stage: StageKind,
    },
}

/// A notification about one case, with any links minted by the same
/// transition (so email channels can embed them).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseNotification {
    /// The case the notification is about.
    pub case_id: Uuid,
    /// What happened.
    pub kind: NotificationKind,
    /// Capability links minted by the transition that produced this
    /// notification. Raw token values live here and nowhere else.
    pub links: Vec<ExternalLink>,
}

/// Notification delivery failure.
#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Delivery channel for workflow notifications (email, portal inbox, ...).
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Best-effort; errors are retried by the
    /// dispatcher and then dropped.
    async fn notify(&self, notification: CaseNotification) -> Result<(), NotifyError>;
}

/// Default notifier: logs every notification through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: CaseNotification) -> Result<(), NotifyError> {
        debug!(
            case_id = %notification.case_id,
            kind = ?notification.kind,
            links = notification.links.len(),
            "workflow notification"
        );
        Ok(())
    }
}

const DELIVERY_ATTEMPTS: u32 = 3;
const RETRY_BASE: StdDuration = StdDuration::from_millis(200);

/// Fire-and-forget delivery of a transition's notifications.
///
/// Spawned after commit; never awaited by the caller.
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, notifications: Vec<CaseNotification>) {
    if notifications.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for notification in notifications {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match notifier.notify(notification.clone()).await {
                    Ok(()) => break,
                    Err(e) if attempt < DELIVERY_ATTEMPTS => {
                        debug!(
                            case_id = %notification.case_id,
                            attempt,
                            "notification delivery failed, retrying: {}",
                            e
                        );
                        tokio::time::sleep(RETRY_BASE * attempt).await;
                    }
                    Err(e) => {
                        warn!(
                            case_id = %notification.case_id,
                            kind = ?notification.kind,
                            "dropping notification after {} attempts: {}",
                            attempt,
                            e
                        );
                        break;
                    }
                }
            }
        }
    });
}
