// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signature capture and quorum evaluation.
//!
//! A signature stage is signed when every role in its required quorum set
//! has produced at least one signature event. This is a role-set check, not
//! a count: a role signing twice never satisfies a different missing role.
//! Re-signing appends; earlier events stay for audit.

use std::collections::HashSet;

use crate::case::{CaseStatus, SignatureEvent, SignerRole};
use crate::error::SignatureError;
use crate::routes::RouteSpec;

/// Quorum position after appending one more signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureProgress {
    /// Every required role has signed.
    pub quorum_complete: bool,
    /// Every required external role has signed.
    pub externals_complete: bool,
    /// The next external role still missing, in the route's signing order.
    pub next_external: Option<SignerRole>,
}

/// Validate that a role may sign the route's signature stage while the case
/// is in `status`.
pub fn validate_capture(
    spec: &RouteSpec,
    status: CaseStatus,
    role: SignerRole,
) -> Result<(), SignatureError> {
    if !status.accepts_signatures() {
        return Err(SignatureError::StageNotAwaitingSignature { status });
    }
    if !spec.quorum.contains(&role) {
        return Err(SignatureError::RoleNotExpected {
            role,
            stage: spec.signature_stage,
        });
    }
    Ok(())
}

/// Evaluate quorum progress assuming `incoming` is appended to `existing`.
pub fn evaluate(
    spec: &RouteSpec,
    existing: &[SignatureEvent],
    incoming: SignerRole,
) -> SignatureProgress {
    let mut signed: HashSet<SignerRole> = existing.iter().map(|s| s.signer_role).collect();
    signed.insert(incoming);

    let quorum_complete = spec.quorum.iter().all(|r| signed.contains(r));
    let externals_complete = spec.external_signers().all(|r| signed.contains(&r));
    let next_external = spec.external_signers().find(|r| !signed.contains(r));

    SignatureProgress {
        quorum_complete,
        externals_complete,
        next_external,
    }
}
