// Copyright (C) 2025 Placeflow Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Capability token service.
//!
//! Every external action runs on a single-use, time-limited token scoped to
//! exactly one action on one stage of one case. Raw token values exist only
//! in the link handed to the external party; at rest the ledger keeps a
//! SHA-256 digest, so a database read never yields a usable link.
//!
//! Consumption is an atomic compare-and-swap independent of the case lock:
//! two tabs racing the same link yield exactly one success.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::case::{SignerRole, StageKind};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::error::Result;
use crate::persistence::Persistence;

/// The single action a token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Contractor uploads identity documents.
    DocumentUpload,
    /// Third-party company submits its quote sheet.
    QuoteSubmission,
    /// External party signs the COHF.
    CohfSignature,
    /// External party signs the contract.
    ContractSignature,
    /// Third-party company uploads the employment contract.
    ContractUpload,
    /// Client signs the work order.
    WorkOrderSignature,
}

impl TokenScope {
    /// Stable wire/storage identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentUpload => "document_upload",
            Self::QuoteSubmission => "quote_submission",
            Self::CohfSignature => "cohf_signature",
            Self::ContractSignature => "contract_signature",
            Self::ContractUpload => "contract_upload",
            Self::WorkOrderSignature => "work_order_signature",
        }
    }

    /// Parse a stored identifier.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "document_upload" => Some(Self::DocumentUpload),
            "quote_submission" => Some(Self::QuoteSubmission),
            "cohf_signature" => Some(Self::CohfSignature),
            "contract_signature" => Some(Self::ContractSignature),
            "contract_upload" => Some(Self::ContractUpload),
            "work_order_signature" => Some(Self::WorkOrderSignature),
            _ => None,
        }
    }

    /// Signature scope for a given signature stage.
    pub fn for_signature_stage(stage: StageKind) -> Self {
        if stage == StageKind::Cohf {
            Self::CohfSignature
        } else {
            Self::ContractSignature
        }
    }

    /// TTL for links of this scope under the given settings.
    pub fn ttl(&self, settings: &EngineSettings) -> Duration {
        match self {
            Self::QuoteSubmission => settings.quote_ttl,
            Self::CohfSignature | Self::ContractSignature | Self::WorkOrderSignature => {
                settings.signature_ttl
            }
            Self::DocumentUpload | Self::ContractUpload => settings.upload_ttl,
        }
    }

    /// Portal path for links of this scope.
    pub fn link_path(&self, token_value: &str) -> String {
        match self {
            Self::DocumentUpload => format!("/documents/upload/{}", token_value),
            Self::QuoteSubmission => format!("/quote/{}", token_value),
            Self::CohfSignature => format!("/cohf/sign/{}", token_value),
            Self::ContractSignature => format!("/contract/sign/{}", token_value),
            Self::ContractUpload => format!("/contract/upload/{}", token_value),
            Self::WorkOrderSignature => format!("/work-order/sign/{}", token_value),
        }
    }
}

/// Claims bound to a token at issuance, returned on successful consumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Case the token acts on.
    pub case_id: Uuid,
    /// Stage the token acts on.
    pub stage: StageKind,
    /// The one action the token authorizes.
    pub scope: TokenScope,
    /// For signature scopes, the role the signature is recorded under.
    pub signer_role: Option<SignerRole>,
}

/// Ledger row for one issued token. Retained after consumption,
/// invalidation, and expiry for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    /// SHA-256 digest of the raw token value.
    pub digest: String,
    /// Case the token acts on.
    pub case_id: Uuid,
    /// Stage the token acts on.
    pub stage: StageKind,
    /// Authorized action.
    pub scope: TokenScope,
    /// Signature role for signature scopes.
    pub signer_role: Option<SignerRole>,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token stops working.
    pub expires_at: DateTime<Utc>,
    /// When the token was consumed, if it was.
    pub consumed_at: Option<DateTime<Utc>>,
    /// When the token was invalidated by a reissue, if it was.
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// Claims carried by this record.
    pub fn claims(&self) -> TokenClaims {
        TokenClaims {
            case_id: self.case_id,
            stage: self.stage,
            scope: self.scope,
            signer_role: self.signer_role,
        }
    }
}

/// A freshly minted token: the raw value (returned exactly once) plus the
/// ledger row to persist.
#[derive(Debug, Clone)]
pub struct MintedToken {
    /// Raw URL-safe token value. Hand it to the external party and drop it.
    pub value: String,
    /// Ledger row for the commit batch.
    pub record: TokenRecord,
}

/// Digest a raw token value the way the ledger stores it.
pub fn digest(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(value.as_bytes()))
}

/// Issues and consumes capability tokens against the persistence ledger.
pub struct TokenService {
    persistence: Arc<dyn Persistence>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Create a token service over the given ledger and clock.
    pub fn new(persistence: Arc<dyn Persistence>, clock: Arc<dyn Clock>) -> Self {
        Self { persistence, clock }
    }

    /// Mint a token bound to `(case, stage, scope, role)`.
    ///
    /// Pure value construction: the ledger row is persisted by the commit
    /// batch that carries it, which also invalidates any previously active
    /// token for the stage.
    pub fn mint(
        &self,
        case_id: Uuid,
        stage: StageKind,
        scope: TokenScope,
        signer_role: Option<SignerRole>,
        ttl: Duration,
    ) -> MintedToken {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let value = URL_SAFE_NO_PAD.encode(bytes);

        let issued_at = self.clock.now();
        MintedToken {
            record: TokenRecord {
                digest: digest(&value),
                case_id,
                stage,
                scope,
                signer_role,
                issued_at,
                expires_at: issued_at + ttl,
                consumed_at: None,
                invalidated_at: None,
            },
            value,
        }
    }

    /// Consume a token: atomically mark it used and return its claims.
    ///
    /// At most one concurrent caller succeeds. Expiry is evaluated here
    /// against the injected clock; expired tokens stay unconsumed but inert.
    pub async fn consume(&self, token_value: &str) -> Result<TokenClaims> {
        let now = self.clock.now();
        self.persistence.consume_token(&digest(token_value), now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::MemoryPersistence;

    fn service_with_clock() -> (TokenService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = TokenService::new(
            Arc::new(MemoryPersistence::new()),
            clock.clone(),
        );
        (service, clock)
    }

    #[test]
    fn test_mint_produces_unique_urlsafe_values() {
        let (service, _clock) = service_with_clock();
        let a = service.mint(
            Uuid::new_v4(),
            StageKind::Documents,
            TokenScope::DocumentUpload,
            None,
            Duration::days(7),
        );
        let b = service.mint(
            Uuid::new_v4(),
            StageKind::Documents,
            TokenScope::DocumentUpload,
            None,
            Duration::days(7),
        );
        assert_ne!(a.value, b.value);
        assert_ne!(a.record.digest, b.record.digest);
        // 32 random bytes, base64 url-safe without padding
        assert_eq!(a.value.len(), 43);
        assert!(!a.value.contains('+') && !a.value.contains('/'));
        assert_eq!(a.record.digest, digest(&a.value));
    }

    #[test]
    fn test_mint_expiry_uses_clock() {
        let (service, clock) = service_with_clock();
        let minted = service.mint(
            Uuid::new_v4(),
            StageKind::ThirdPartyQuote,
            TokenScope::QuoteSubmission,
            None,
            Duration::days(30),
        );
        assert_eq!(minted.record.issued_at, clock.now());
        assert_eq!(minted.record.expires_at, clock.now() + Duration::days(30));
    }

    #[test]
    fn test_scope_ttls() {
        let settings = EngineSettings::default();
        assert_eq!(TokenScope::QuoteSubmission.ttl(&settings), Duration::days(30));
        assert_eq!(TokenScope::ContractSignature.ttl(&settings), Duration::hours(72));
        assert_eq!(TokenScope::CohfSignature.ttl(&settings), Duration::hours(72));
        assert_eq!(TokenScope::WorkOrderSignature.ttl(&settings), Duration::hours(72));
        assert_eq!(TokenScope::DocumentUpload.ttl(&settings), Duration::days(7));
        assert_eq!(TokenScope::ContractUpload.ttl(&settings), Duration::days(7));
    }

    #[test]
    fn test_link_paths() {
        assert_eq!(
            TokenScope::WorkOrderSignature.link_path("abc"),
            "/work-order/sign/abc"
        );
        assert_eq!(TokenScope::DocumentUpload.link_path("t"), "/documents/upload/t");
    }

    #[test]
    fn test_scope_round_trip() {
        for scope in [
            TokenScope::DocumentUpload,
            TokenScope::QuoteSubmission,
            TokenScope::CohfSignature,
            TokenScope::ContractSignature,
            TokenScope::ContractUpload,
            TokenScope::WorkOrderSignature,
        ] {
            assert_eq!(TokenScope::from_str(scope.as_str()), Some(scope));
        }
    }
}
