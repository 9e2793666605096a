//! Persistence interfaces and backends for placeflow-core.
//!
//! This module defines the persistence abstraction and backend
//! implementations. The engine funnels every transition through
//! [`Persistence::commit_transition`], which applies the whole
//! [`CommitBatch`] atomically or not at all; token consumption is the one
//! operation with its own compare-and-swap, independent of case-level
//! serialization.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryPersistence;
pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::case::{
    CaseDocument, CaseStatus, ContractorCase, SignatureEvent, StageKind, StageRecord, StageState,
};
use crate::error::EngineError;
use crate::token::{TokenClaims, TokenRecord};

/// One audit-trail entry to append with a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCaseEvent {
    /// Applied event identifier (or `case_created`, `link_reissued`).
    pub event_type: String,
    /// Acting internal user, or `external` for token-based actors.
    pub actor: Option<String>,
    /// Structured detail (from/to statuses, stage, reason).
    pub detail: Option<serde_json::Value>,
}

/// Audit-trail row from the persistence layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseEventRecord {
    /// Row identity, monotonic per store.
    pub id: i64,
    /// Case this entry belongs to.
    pub case_id: Uuid,
    /// Applied event identifier.
    pub event_type: String,
    /// Acting user, if recorded.
    pub actor: Option<String>,
    /// Structured detail.
    pub detail: Option<serde_json::Value>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// Everything one transition writes, applied atomically.
///
/// `expected_status` makes the status update a guarded compare-and-set: a
/// batch built against a stale case is refused in full rather than applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitBatch {
    /// Case the batch belongs to.
    pub case_id: Uuid,
    /// Status the case must still be in for the batch to apply.
    pub expected_status: CaseStatus,
    /// Status the case moves to (may equal `expected_status` for
    /// link-reissue commits).
    pub new_status: CaseStatus,
    /// `Some(value)` sets the rejection bookkeeping, `None` leaves it.
    pub rejected_from: Option<Option<CaseStatus>>,
    /// Commit timestamp; becomes the case's `updated_at`.
    pub updated_at: DateTime<Utc>,
    /// Stage progress updates.
    pub stage_states: Vec<(StageKind, StageState)>,
    /// Stage artifact updates.
    pub stage_artifacts: Vec<(StageKind, String)>,
    /// Documents to attach.
    pub documents: Vec<CaseDocument>,
    /// Signatures to append.
    pub signatures: Vec<(StageKind, SignatureEvent)>,
    /// Tokens to issue. Issuing implicitly invalidates any still-active
    /// token for the same stage.
    pub tokens_issued: Vec<TokenRecord>,
    /// Stages whose active token is withdrawn without replacement.
    pub tokens_invalidated: Vec<StageKind>,
    /// Audit entries to append.
    pub events: Vec<NewCaseEvent>,
}

impl CommitBatch {
    /// Empty batch for a case, keeping its status unchanged.
    pub fn for_case(case: &ContractorCase, updated_at: DateTime<Utc>) -> Self {
        Self {
            case_id: case.id,
            expected_status: case.status,
            new_status: case.status,
            rejected_from: None,
            updated_at,
            stage_states: Vec::new(),
            stage_artifacts: Vec::new(),
            documents: Vec::new(),
            signatures: Vec::new(),
            tokens_issued: Vec::new(),
            tokens_invalidated: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Persistence interface used by the workflow engine.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn insert_case(
        &self,
        case: &ContractorCase,
        stages: &[StageRecord],
        created: NewCaseEvent,
    ) -> Result<(), EngineError>;

    async fn get_case(&self, case_id: Uuid) -> Result<Option<ContractorCase>, EngineError>;

    /// Stage records for a case, in route order, signatures loaded.
    async fn get_stages(&self, case_id: Uuid) -> Result<Vec<StageRecord>, EngineError>;

    async fn get_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, EngineError>;

    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ContractorCase>, EngineError>;

    /// Apply a transition batch atomically.
    ///
    /// Returns `false` without writing anything if the case's status no
    /// longer matches `expected_status`.
    async fn commit_transition(&self, batch: &CommitBatch) -> Result<bool, EngineError>;

    /// Atomically consume the token with this digest.
    ///
    /// At most one concurrent caller succeeds; the rest observe
    /// `AlreadyConsumed`. Expiry is evaluated against `now`; expired tokens
    /// are left unconsumed but inert. Invalidated tokens report
    /// `AlreadyConsumed`.
    async fn consume_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, EngineError>;

    /// Token ledger lookup, for audit surfaces and tests.
    async fn get_token(&self, digest: &str) -> Result<Option<TokenRecord>, EngineError>;

    /// Append-only audit trail for a case, oldest first.
    async fn case_history(&self, case_id: Uuid) -> Result<Vec<CaseEventRecord>, EngineError>;

    async fn health_check(&self) -> Result<bool, EngineError>;
}
