// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Route resolver.
//!
//! Each onboarding route walks a fixed, totally ordered subsequence of the
//! stage catalogue. The tables here are static data: no I/O, no side
//! effects, and [`validate`] checks their coherence once at engine
//! construction so an incoherent deployment fails at startup rather than
//! mid-case.

use crate::case::{CaseStatus, OnboardingRoute, SignerRole, StageKind};
use crate::error::EngineError;

/// Static per-route workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSpec {
    /// The route this spec describes.
    pub route: OnboardingRoute,
    /// Ordered stages the route requires.
    pub stages: &'static [StageKind],
    /// Stage whose quorum drives the `pending_signature` phase
    /// ([`StageKind::Cohf`] or [`StageKind::Contract`]).
    pub signature_stage: StageKind,
    /// Required signer roles for the signature stage. Array order is signing
    /// order for the external roles.
    pub quorum: &'static [SignerRole],
    /// When true, external roles sign first and the case passes through
    /// `pending_superadmin_signature` for the internal countersign. When
    /// false, all roles collect in `pending_signature` until the quorum
    /// completes.
    pub two_phase_signing: bool,
    /// When true, the employing third party uploads its own contract after
    /// the signature stage instead of Aventus generating one.
    pub uploads_contract: bool,
    /// Whether the route issues a client work order.
    pub has_work_order: bool,
}

impl RouteSpec {
    /// Whether this route collects a third-party quote (as opposed to an
    /// internal costing/deal sheet).
    pub fn uses_third_party_quote(&self) -> bool {
        self.stages.contains(&StageKind::ThirdPartyQuote)
    }

    /// The quote-or-costing stage for this route.
    pub fn quote_stage(&self) -> StageKind {
        if self.uses_third_party_quote() {
            StageKind::ThirdPartyQuote
        } else {
            StageKind::CostingDealSheet
        }
    }

    /// External roles in the signature quorum, in signing order.
    pub fn external_signers(&self) -> impl Iterator<Item = SignerRole> + '_ {
        self.quorum.iter().copied().filter(|r| !r.is_internal())
    }
}

const WPS: RouteSpec = RouteSpec {
    route: OnboardingRoute::Wps,
    stages: &[
        StageKind::Documents,
        StageKind::CostingDealSheet,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ],
    signature_stage: StageKind::Contract,
    quorum: &[SignerRole::Contractor, SignerRole::AventusPartyA],
    two_phase_signing: true,
    uploads_contract: false,
    has_work_order: true,
};

const FREELANCER: RouteSpec = RouteSpec {
    route: OnboardingRoute::Freelancer,
    // Client signs the contract itself (quorum seat), so the standalone
    // client-signature stage does not apply.
    stages: &[
        StageKind::Documents,
        StageKind::CostingDealSheet,
        StageKind::Contract,
    ],
    signature_stage: StageKind::Contract,
    quorum: &[
        SignerRole::Contractor,
        SignerRole::Client,
        SignerRole::AventusPartyA,
    ],
    two_phase_signing: true,
    uploads_contract: false,
    has_work_order: false,
};

const OFFSHORE: RouteSpec = RouteSpec {
    route: OnboardingRoute::Offshore,
    stages: &[
        StageKind::Documents,
        StageKind::CostingDealSheet,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ],
    signature_stage: StageKind::Contract,
    quorum: &[
        SignerRole::Contractor,
        SignerRole::Client,
        SignerRole::AventusPartyA,
    ],
    two_phase_signing: true,
    uploads_contract: false,
    has_work_order: true,
};

const SAUDI: RouteSpec = RouteSpec {
    route: OnboardingRoute::Saudi,
    stages: &[
        StageKind::Documents,
        StageKind::ThirdPartyQuote,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ],
    signature_stage: StageKind::Contract,
    quorum: &[
        SignerRole::Client,
        SignerRole::AventusPartyA,
        SignerRole::AventusPartyB,
    ],
    two_phase_signing: false,
    uploads_contract: false,
    has_work_order: true,
};

const THIRD_PARTY: RouteSpec = RouteSpec {
    route: OnboardingRoute::ThirdParty,
    stages: &[
        StageKind::Documents,
        StageKind::ThirdPartyQuote,
        StageKind::Cohf,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ],
    signature_stage: StageKind::Cohf,
    quorum: &[
        SignerRole::ThirdParty,
        SignerRole::AventusPartyA,
        SignerRole::AventusPartyB,
    ],
    two_phase_signing: true,
    uploads_contract: true,
    has_work_order: true,
};

const UAE: RouteSpec = RouteSpec {
    route: OnboardingRoute::Uae,
    stages: &[
        StageKind::Documents,
        StageKind::ThirdPartyQuote,
        StageKind::Cohf,
        StageKind::Contract,
        StageKind::ClientSignature,
        StageKind::WorkOrder,
        StageKind::WorkOrderApproval,
    ],
    signature_stage: StageKind::Cohf,
    quorum: &[SignerRole::ThirdParty, SignerRole::AventusPartyA],
    two_phase_signing: true,
    uploads_contract: true,
    has_work_order: true,
};

/// Resolve the full workflow definition for a route.
pub fn spec_for(route: OnboardingRoute) -> &'static RouteSpec {
    match route {
        OnboardingRoute::Wps => &WPS,
        OnboardingRoute::Freelancer => &FREELANCER,
        OnboardingRoute::Offshore => &OFFSHORE,
        OnboardingRoute::Saudi => &SAUDI,
        OnboardingRoute::ThirdParty => &THIRD_PARTY,
        OnboardingRoute::Uae => &UAE,
    }
}

/// Ordered stages required by a route. Pure and deterministic.
pub fn stages_for(route: OnboardingRoute) -> &'static [StageKind] {
    spec_for(route).stages
}

/// The stage a case-level status belongs to, if any.
///
/// `draft`, `rejected`, `active` and `suspended` belong to no stage. The
/// mapping is route-aware because `pending_signature`-class statuses can
/// mean the COHF or the contract depending on the route.
pub fn stage_for_status(status: CaseStatus, route: OnboardingRoute) -> Option<StageKind> {
    let spec = spec_for(route);
    match status {
        CaseStatus::PendingDocuments | CaseStatus::DocumentsUploaded => Some(StageKind::Documents),
        CaseStatus::PendingThirdPartyResponse => Some(StageKind::ThirdPartyQuote),
        CaseStatus::PendingCdsCs => Some(StageKind::CostingDealSheet),
        CaseStatus::PendingReview | CaseStatus::Approved => Some(spec.quote_stage()),
        CaseStatus::PendingSignature
        | CaseStatus::PendingSuperadminSignature
        | CaseStatus::Signed => Some(spec.signature_stage),
        CaseStatus::PendingContractUpload
        | CaseStatus::ContractUploaded
        | CaseStatus::ContractApproved => Some(StageKind::Contract),
        CaseStatus::PendingClientWoSignature => Some(StageKind::ClientSignature),
        CaseStatus::WorkOrderCompleted => Some(StageKind::WorkOrder),
        CaseStatus::AwaitingWorkOrderApproval => Some(StageKind::WorkOrderApproval),
        CaseStatus::Draft
        | CaseStatus::Rejected
        | CaseStatus::Active
        | CaseStatus::Suspended => None,
    }
}

/// Validate the route tables.
///
/// Run once at engine construction: an incoherent table is a deployment
/// bug, not a per-request condition.
pub fn validate() -> Result<(), EngineError> {
    for route in OnboardingRoute::ALL {
        let spec = spec_for(route);

        if spec.stages.first() != Some(&StageKind::Documents) {
            return Err(config_error(route, "route must start with the documents stage"));
        }
        if !spec.stages.contains(&spec.signature_stage) {
            return Err(config_error(route, "signature stage not in route stage list"));
        }
        if !spec.stages.contains(&StageKind::Contract) {
            return Err(config_error(route, "every route must carry a contract stage"));
        }
        if !spec.stages.contains(&StageKind::ClientSignature)
            && !spec.quorum.contains(&SignerRole::Client)
        {
            return Err(config_error(route, "no client signature anywhere in route"));
        }
        if spec.quorum.is_empty() {
            return Err(config_error(route, "signature quorum is empty"));
        }
        if !spec.quorum.iter().any(|r| r.is_internal()) {
            return Err(config_error(route, "quorum has no internal signatory"));
        }
        if spec.external_signers().next().is_none() {
            return Err(config_error(route, "quorum has no external signatory"));
        }
        if spec.uploads_contract && spec.signature_stage != StageKind::Cohf {
            return Err(config_error(
                route,
                "third-party contract upload requires a COHF signature stage",
            ));
        }
        if spec.has_work_order != spec.stages.contains(&StageKind::WorkOrder) {
            return Err(config_error(route, "work order flag disagrees with stage list"));
        }
        if spec.stages.contains(&StageKind::WorkOrder)
            != spec.stages.contains(&StageKind::WorkOrderApproval)
        {
            return Err(config_error(
                route,
                "work order and work order approval stages must travel together",
            ));
        }

        // Stages must appear in canonical order.
        let mut last = None;
        for stage in spec.stages {
            let pos = StageKind::ALL.iter().position(|s| s == stage);
            if pos < last {
                return Err(config_error(route, "stages out of canonical order"));
            }
            last = pos;
        }
    }
    Ok(())
}

fn config_error(route: OnboardingRoute, message: &str) -> EngineError {
    EngineError::Configuration {
        message: format!("route '{}': {}", route, message),
    }
}
