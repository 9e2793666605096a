// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain model for contractor placement cases.
//!
//! A [`ContractorCase`] is the aggregate root: one contractor being placed
//! with a client through one onboarding route. The case owns an ordered set
//! of [`StageRecord`]s (one per stage the route requires), uploaded document
//! references, and an append-only signature history per stage. All mutation
//! goes through the workflow engine; nothing here writes state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Routes
// ============================================================================

/// Onboarding route a contractor is placed through.
///
/// The route determines which stages apply and who signs what (see
/// [`crate::routes`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingRoute {
    /// Direct employment under the Work Permit System.
    Wps,
    /// Freelancer arrangement, no work order.
    Freelancer,
    /// Generic third-party-employed placement.
    ThirdParty,
    /// Third-party placement, Saudi Arabia.
    Saudi,
    /// International/offshore placement.
    Offshore,
    /// Third-party placement, UAE.
    Uae,
}

impl OnboardingRoute {
    /// Every route, in declaration order.
    pub const ALL: [OnboardingRoute; 6] = [
        OnboardingRoute::Wps,
        OnboardingRoute::Freelancer,
        OnboardingRoute::ThirdParty,
        OnboardingRoute::Saudi,
        OnboardingRoute::Offshore,
        OnboardingRoute::Uae,
    ];

    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wps => "wps",
            Self::Freelancer => "freelancer",
            Self::ThirdParty => "third_party",
            Self::Saudi => "saudi",
            Self::Offshore => "offshore",
            Self::Uae => "uae",
        }
    }

    /// Parse a stored identifier. Returns `None` for unknown values; callers
    /// at configuration boundaries turn that into a configuration error.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wps" => Some(Self::Wps),
            "freelancer" => Some(Self::Freelancer),
            "third_party" => Some(Self::ThirdParty),
            "saudi" => Some(Self::Saudi),
            "offshore" => Some(Self::Offshore),
            "uae" => Some(Self::Uae),
            _ => None,
        }
    }

    /// Human-readable route name for notifications and admin listings.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Wps => "WPS (Work Permit System)",
            Self::Freelancer => "Freelancer",
            Self::ThirdParty => "3rd Party",
            Self::Saudi => "3rd Party Saudi Arabia",
            Self::Offshore => "International/Offshore",
            Self::Uae => "3rd Party UAE",
        }
    }
}

impl fmt::Display for OnboardingRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Case status
// ============================================================================

/// Case-level workflow status.
///
/// This is the superset across all routes; each route walks a fixed
/// subsequence of it (see the state diagram in the crate docs). Absorbing
/// states are `rejected` (re-enterable only via `reopen`) and `active`
/// (re-enterable from `suspended`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Created by a consultant, nothing sent yet.
    Draft,
    /// Document upload link issued to the contractor.
    PendingDocuments,
    /// Documents received, awaiting internal routing.
    DocumentsUploaded,
    /// Quote request sent to the third-party company.
    PendingThirdPartyResponse,
    /// Costing/deal sheet being completed by the consultant.
    PendingCdsCs,
    /// Submitted for admin review.
    PendingReview,
    /// Review passed; contracting not yet started.
    Approved,
    /// Rejected at a review gate; absorbing except for `reopen`.
    Rejected,
    /// Signature stage open, external signer(s) outstanding.
    PendingSignature,
    /// External signers done, internal countersign outstanding.
    PendingSuperadminSignature,
    /// Signature stage quorum complete.
    Signed,
    /// Work order sent to the client for signature.
    PendingClientWoSignature,
    /// Client signed the work order.
    WorkOrderCompleted,
    /// Employment contract upload link issued to the third party.
    PendingContractUpload,
    /// Third-party contract received, awaiting internal approval.
    ContractUploaded,
    /// Third-party contract approved.
    ContractApproved,
    /// Countersigned work order awaiting final operations approval.
    AwaitingWorkOrderApproval,
    /// Contractor is live.
    Active,
    /// Placed on hold; re-enterable back to `active`.
    Suspended,
}

impl CaseStatus {
    /// Every status, in workflow order.
    pub const ALL: [CaseStatus; 19] = [
        CaseStatus::Draft,
        CaseStatus::PendingDocuments,
        CaseStatus::DocumentsUploaded,
        CaseStatus::PendingThirdPartyResponse,
        CaseStatus::PendingCdsCs,
        CaseStatus::PendingReview,
        CaseStatus::Approved,
        CaseStatus::Rejected,
        CaseStatus::PendingSignature,
        CaseStatus::PendingSuperadminSignature,
        CaseStatus::Signed,
        CaseStatus::PendingClientWoSignature,
        CaseStatus::WorkOrderCompleted,
        CaseStatus::PendingContractUpload,
        CaseStatus::ContractUploaded,
        CaseStatus::ContractApproved,
        CaseStatus::AwaitingWorkOrderApproval,
        CaseStatus::Active,
        CaseStatus::Suspended,
    ];

    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingDocuments => "pending_documents",
            Self::DocumentsUploaded => "documents_uploaded",
            Self::PendingThirdPartyResponse => "pending_third_party_response",
            Self::PendingCdsCs => "pending_cds_cs",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::PendingSignature => "pending_signature",
            Self::PendingSuperadminSignature => "pending_superadmin_signature",
            Self::Signed => "signed",
            Self::PendingClientWoSignature => "pending_client_wo_signature",
            Self::WorkOrderCompleted => "work_order_completed",
            Self::PendingContractUpload => "pending_contract_upload",
            Self::ContractUploaded => "contract_uploaded",
            Self::ContractApproved => "contract_approved",
            Self::AwaitingWorkOrderApproval => "awaiting_work_order_approval",
            Self::Active => "active",
            Self::Suspended => "suspended",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }

    /// Review-class states: `approve` and `reject` are valid here.
    pub fn is_review_class(&self) -> bool {
        matches!(
            self,
            Self::PendingReview | Self::ContractUploaded | Self::AwaitingWorkOrderApproval
        )
    }

    /// States in which the signature stage accepts signature events.
    pub fn accepts_signatures(&self) -> bool {
        matches!(self, Self::PendingSignature | Self::PendingSuperadminSignature)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Stages
// ============================================================================

/// A discrete sub-workflow within a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Identity/visa document collection from the contractor.
    Documents,
    /// Quote sheet from the employing third-party company.
    ThirdPartyQuote,
    /// Internal costing and deal sheet.
    CostingDealSheet,
    /// Confirmation of Hire Form, multi-party signed.
    Cohf,
    /// Employment contract (generated and signed, or third-party uploaded).
    Contract,
    /// Client signature on the work order.
    ClientSignature,
    /// Work order issuance and internal countersign.
    WorkOrder,
    /// Final operations approval of the signed work order.
    WorkOrderApproval,
}

impl StageKind {
    /// Every stage kind, in canonical workflow order.
    pub const ALL: [StageKind; 8] = [
        StageKind::Documents,
        StageKind::ThirdPartyQuote,
        StageKind::CostingDealSheet,
        StageKind::Cohf,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ];

    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::ThirdPartyQuote => "third_party_quote",
            Self::CostingDealSheet => "costing_deal_sheet",
            Self::Cohf => "cohf",
            Self::Contract => "contract",
            Self::ClientSignature => "client_signature",
            Self::WorkOrder => "work_order",
            Self::WorkOrderApproval => "work_order_approval",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage progress, independent of the case-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    /// Not started.
    #[default]
    Pending,
    /// Initiated internally, no external party involved yet.
    Sent,
    /// An external party holds an active link for this stage.
    AwaitingExternalResponse,
    /// External/internal input received, not yet reviewed.
    Submitted,
    /// Stage complete.
    Approved,
    /// Stage rejected at review.
    Rejected,
}

impl StageState {
    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::AwaitingExternalResponse => "awaiting_external_response",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "awaiting_external_response" => Some(Self::AwaitingExternalResponse),
            "submitted" => Some(Self::Submitted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

// ============================================================================
// Signatures
// ============================================================================

/// A party that can sign a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerRole {
    /// The contractor being placed.
    Contractor,
    /// The end client.
    Client,
    /// First internal signatory.
    AventusPartyA,
    /// Second internal signatory.
    AventusPartyB,
    /// The employing third-party company.
    ThirdParty,
}

impl SignerRole {
    /// Internal signatories sign through authenticated sessions, external
    /// ones only through capability links.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::AventusPartyA | Self::AventusPartyB)
    }

    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contractor => "contractor",
            Self::Client => "client",
            Self::AventusPartyA => "aventus_party_a",
            Self::AventusPartyB => "aventus_party_b",
            Self::ThirdParty => "third_party",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "contractor" => Some(Self::Contractor),
            "client" => Some(Self::Client),
            "aventus_party_a" => Some(Self::AventusPartyA),
            "aventus_party_b" => Some(Self::AventusPartyB),
            "third_party" => Some(Self::ThirdParty),
            _ => None,
        }
    }
}

impl fmt::Display for SignerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a signature was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMethod {
    /// Typed full name.
    Typed,
    /// Drawn signature image.
    Drawn,
}

impl SignatureMethod {
    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Typed => "typed",
            Self::Drawn => "drawn",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "typed" => Some(Self::Typed),
            "drawn" => Some(Self::Drawn),
            _ => None,
        }
    }
}

/// One captured signature. Immutable once created; re-signing appends a new
/// event and the old one is kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEvent {
    /// Who signed.
    pub signer_role: SignerRole,
    /// How the signature was captured.
    pub method: SignatureMethod,
    /// Document-store reference to the signature payload.
    pub payload_ref: String,
    /// When the signature was captured.
    pub signed_at: DateTime<Utc>,
}

// ============================================================================
// Documents
// ============================================================================

/// Typed classification for uploaded case documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Passport scan.
    Passport,
    /// Contractor photo.
    Photo,
    /// Visa page scan.
    VisaPage,
    /// National ID, front.
    IdFront,
    /// National ID, back.
    IdBack,
    /// Emirates ID scan.
    EmiratesId,
    /// Degree certificate.
    Degree,
    /// Third-party quote sheet.
    QuoteSheet,
    /// Employment contract.
    Contract,
    /// Signed work order.
    WorkOrder,
    /// Anything else.
    Other,
}

impl DocumentKind {
    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passport => "passport",
            Self::Photo => "photo",
            Self::VisaPage => "visa_page",
            Self::IdFront => "id_front",
            Self::IdBack => "id_back",
            Self::EmiratesId => "emirates_id",
            Self::Degree => "degree",
            Self::QuoteSheet => "quote_sheet",
            Self::Contract => "contract",
            Self::WorkOrder => "work_order",
            Self::Other => "other",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "passport" => Some(Self::Passport),
            "photo" => Some(Self::Photo),
            "visa_page" => Some(Self::VisaPage),
            "id_front" => Some(Self::IdFront),
            "id_back" => Some(Self::IdBack),
            "emirates_id" => Some(Self::EmiratesId),
            "degree" => Some(Self::Degree),
            "quote_sheet" => Some(Self::QuoteSheet),
            "contract" => Some(Self::Contract),
            "work_order" => Some(Self::WorkOrder),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A document reference being attached to a case by an upload event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDocument {
    /// Document classification.
    pub kind: DocumentKind,
    /// Document-store reference.
    pub doc_ref: String,
}

/// A stored case document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDocument {
    /// Document classification.
    pub kind: DocumentKind,
    /// Document-store reference.
    pub doc_ref: String,
    /// When the document was attached.
    pub uploaded_at: DateTime<Utc>,
}

// ============================================================================
// Aggregate
// ============================================================================

/// The aggregate root: one contractor placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractorCase {
    /// Case identity.
    pub id: Uuid,
    /// Route this contractor is onboarded through.
    pub onboarding_route: OnboardingRoute,
    /// Current workflow status.
    pub status: CaseStatus,
    /// Status at which the case was rejected; the `reopen` target is derived
    /// from it. `None` unless `status == Rejected`.
    pub rejected_from: Option<CaseStatus>,
    /// Opaque placement attributes (name, client, role, rates). The engine
    /// never interprets these.
    pub attributes: serde_json::Value,
    /// When the case was created.
    pub created_at: DateTime<Utc>,
    /// When the case last transitioned.
    pub updated_at: DateTime<Utc>,
}

/// Per-stage record owned by a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Which stage this is.
    pub stage_kind: StageKind,
    /// Stage progress.
    pub state: StageState,
    /// SHA-256 digest of the currently active capability token, if any. Raw
    /// token values are never persisted.
    pub token_digest: Option<String>,
    /// Expiry of the active token.
    pub token_expiry: Option<DateTime<Utc>>,
    /// Primary artifact produced by this stage (quote sheet, contract, ...).
    pub artifact_ref: Option<String>,
    /// Append-only signature history.
    pub signatures: Vec<SignatureEvent>,
}

impl StageRecord {
    /// Fresh pending stage.
    pub fn new(stage_kind: StageKind) -> Self {
        Self {
            stage_kind,
            state: StageState::Pending,
            token_digest: None,
            token_expiry: None,
            artifact_ref: None,
            signatures: Vec::new(),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// A workflow event applied to a case.
///
/// Internal actors submit these through
/// [`apply_internal_event`](crate::engine::WorkflowEngine::apply_internal_event);
/// external actors only ever produce the token-scoped subset through the
/// gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaseEvent {
    /// Issue a document upload link to the contractor.
    SendDocumentRequest,
    /// Documents received (direct internal upload, or via upload link).
    DocumentsUploaded {
        /// References already written to the document store.
        documents: Vec<NewDocument>,
    },
    /// Move past `documents_uploaded` into the route's quote/costing stage.
    Advance,
    /// Costing/deal sheet completed by the consultant.
    CostingSubmitted {
        /// Document-store reference to the completed sheet.
        sheet_ref: String,
    },
    /// Third-party company submitted its quote (external only).
    ThirdPartySubmitted {
        /// Document-store reference to the quote sheet.
        quote_ref: String,
    },
    /// Review gate passed.
    Approve,
    /// Review gate failed; the case becomes `rejected`.
    Reject {
        /// Reviewer's reason, carried into the audit trail and notification.
        reason: String,
    },
    /// Re-open a rejected case at the stage preceding the rejection.
    Reopen,
    /// Start the route's signature stage (COHF or contract).
    SendForSignature,
    /// A signature was captured for the route's signature stage.
    SignatureCaptured {
        /// Signing party.
        role: SignerRole,
        /// Capture method.
        method: SignatureMethod,
        /// Document-store reference to the signature payload.
        payload_ref: String,
    },
    /// Third party uploaded the employment contract (external only).
    ContractUploaded {
        /// Document-store reference to the uploaded contract.
        contract_ref: String,
    },
    /// Issue the work order to the client for signature.
    SendWorkOrder,
    /// Client signed the work order (external only).
    ClientSigned {
        /// Capture method.
        method: SignatureMethod,
        /// Document-store reference to the signature payload.
        payload_ref: String,
    },
    /// Countersign the client-signed work order and submit it for approval.
    SubmitWorkOrderApproval,
    /// Activate a signed case on a route without a work order.
    Activate,
    /// Put an active contractor on hold.
    Suspend,
    /// Lift a suspension.
    Reinstate,
}

impl CaseEvent {
    /// Fieldless discriminant, used as the transition-table key.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SendDocumentRequest => EventKind::SendDocumentRequest,
            Self::DocumentsUploaded { .. } => EventKind::DocumentsUploaded,
            Self::Advance => EventKind::Advance,
            Self::CostingSubmitted { .. } => EventKind::CostingSubmitted,
            Self::ThirdPartySubmitted { .. } => EventKind::ThirdPartySubmitted,
            Self::Approve => EventKind::Approve,
            Self::Reject { .. } => EventKind::Reject,
            Self::Reopen => EventKind::Reopen,
            Self::SendForSignature => EventKind::SendForSignature,
            Self::SignatureCaptured { .. } => EventKind::SignatureCaptured,
            Self::ContractUploaded { .. } => EventKind::ContractUploaded,
            Self::SendWorkOrder => EventKind::SendWorkOrder,
            Self::ClientSigned { .. } => EventKind::ClientSigned,
            Self::SubmitWorkOrderApproval => EventKind::SubmitWorkOrderApproval,
            Self::Activate => EventKind::Activate,
            Self::Suspend => EventKind::Suspend,
            Self::Reinstate => EventKind::Reinstate,
        }
    }
}

/// Discriminant of [`CaseEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`CaseEvent::SendDocumentRequest`].
    SendDocumentRequest,
    /// See [`CaseEvent::DocumentsUploaded`].
    DocumentsUploaded,
    /// See [`CaseEvent::Advance`].
    Advance,
    /// See [`CaseEvent::CostingSubmitted`].
    CostingSubmitted,
    /// See [`CaseEvent::ThirdPartySubmitted`].
    ThirdPartySubmitted,
    /// See [`CaseEvent::Approve`].
    Approve,
    /// See [`CaseEvent::Reject`].
    Reject,
    /// See [`CaseEvent::Reopen`].
    Reopen,
    /// See [`CaseEvent::SendForSignature`].
    SendForSignature,
    /// See [`CaseEvent::SignatureCaptured`].
    SignatureCaptured,
    /// See [`CaseEvent::ContractUploaded`].
    ContractUploaded,
    /// See [`CaseEvent::SendWorkOrder`].
    SendWorkOrder,
    /// See [`CaseEvent::ClientSigned`].
    ClientSigned,
    /// See [`CaseEvent::SubmitWorkOrderApproval`].
    SubmitWorkOrderApproval,
    /// See [`CaseEvent::Activate`].
    Activate,
    /// See [`CaseEvent::Suspend`].
    Suspend,
    /// See [`CaseEvent::Reinstate`].
    Reinstate,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [EventKind; 17] = [
        EventKind::SendDocumentRequest,
        EventKind::DocumentsUploaded,
        EventKind::Advance,
        EventKind::CostingSubmitted,
        EventKind::ThirdPartySubmitted,
        EventKind::Approve,
        EventKind::Reject,
        EventKind::Reopen,
        EventKind::SendForSignature,
        EventKind::SignatureCaptured,
        EventKind::ContractUploaded,
        EventKind::SendWorkOrder,
        EventKind::ClientSigned,
        EventKind::SubmitWorkOrderApproval,
        EventKind::Activate,
        EventKind::Suspend,
        EventKind::Reinstate,
    ];

    /// Stable identifier, used for audit rows and error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendDocumentRequest => "send_document_request",
            Self::DocumentsUploaded => "documents_uploaded",
            Self::Advance => "advance",
            Self::CostingSubmitted => "costing_submitted",
            Self::ThirdPartySubmitted => "third_party_submitted",
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Reopen => "reopen",
            Self::SendForSignature => "send_for_signature",
            Self::SignatureCaptured => "signature_captured",
            Self::ContractUploaded => "contract_uploaded",
            Self::SendWorkOrder => "send_work_order",
            Self::ClientSigned => "client_signed",
            Self::SubmitWorkOrderApproval => "submit_work_order_approval",
            Self::Activate => "activate",
            Self::Suspend => "suspend",
            Self::Reinstate => "reinstate",
        }
    }

    /// Events that only ever arrive through a consumed capability token.
    pub fn requires_token(&self) -> bool {
        matches!(
            self,
            Self::ThirdPartySubmitted | Self::ContractUploaded | Self::ClientSigned
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Read-only view of a stage for API consumers. Never carries token values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Which stage this is.
    pub stage_kind: StageKind,
    /// Stage progress.
    pub state: StageState,
    /// Whether an unexpired external link is outstanding for this stage.
    pub has_active_token: bool,
    /// Expiry of the active link, if any.
    pub token_expiry: Option<DateTime<Utc>>,
    /// Primary artifact produced by this stage.
    pub artifact_ref: Option<String>,
    /// Signature history, oldest first.
    pub signatures: Vec<SignatureEvent>,
}

/// Read-only view of a case for API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseSnapshot {
    /// Case identity.
    pub id: Uuid,
    /// Onboarding route.
    pub route: OnboardingRoute,
    /// Current workflow status.
    pub status: CaseStatus,
    /// Stage views, in route order.
    pub stages: Vec<StageSnapshot>,
    /// Events currently legal for internal actors, in table order.
    pub pending_actions: Vec<EventKind>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
}

/// A freshly issued external capability link. The raw token appears here and
/// nowhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalLink {
    /// Full URL to hand to the external party.
    pub url: String,
    /// Stage the link acts on.
    pub stage: StageKind,
    /// When the link stops working.
    pub expires_at: DateTime<Utc>,
}
