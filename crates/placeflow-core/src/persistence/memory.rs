//! In-memory persistence implementation.
//!
//! Backs embedded engines and the test suite. A single mutex over the whole
//! store makes the token compare-and-swap trivially atomic; no lock is held
//! across an await point.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::case::{CaseDocument, CaseStatus, ContractorCase, StageRecord};
use crate::error::{EngineError, TokenError};
use crate::token::{TokenClaims, TokenRecord};

use super::{CaseEventRecord, CommitBatch, NewCaseEvent, Persistence};

#[derive(Default)]
struct Inner {
    cases: HashMap<Uuid, ContractorCase>,
    stages: HashMap<Uuid, Vec<StageRecord>>,
    documents: HashMap<Uuid, Vec<CaseDocument>>,
    tokens: HashMap<String, TokenRecord>,
    events: Vec<CaseEventRecord>,
    next_event_id: i64,
}

/// In-memory persistence provider.
#[derive(Default)]
pub struct MemoryPersistence {
    inner: Mutex<Inner>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, EngineError> {
        self.inner.lock().map_err(|_| EngineError::Database {
            operation: "lock".to_string(),
            details: "store poisoned".to_string(),
        })
    }
}

fn invalidate_active_tokens(
    inner: &mut Inner,
    case_id: Uuid,
    stage: crate::case::StageKind,
    at: DateTime<Utc>,
) {
    for token in inner.tokens.values_mut() {
        if token.case_id == case_id
            && token.stage == stage
            && token.consumed_at.is_none()
            && token.invalidated_at.is_none()
        {
            token.invalidated_at = Some(at);
        }
    }
}

fn push_event(inner: &mut Inner, case_id: Uuid, event: &NewCaseEvent, at: DateTime<Utc>) {
    inner.next_event_id += 1;
    let id = inner.next_event_id;
    inner.events.push(CaseEventRecord {
        id,
        case_id,
        event_type: event.event_type.clone(),
        actor: event.actor.clone(),
        detail: event.detail.clone(),
        created_at: at,
    });
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn insert_case(
        &self,
        case: &ContractorCase,
        stages: &[StageRecord],
        created: NewCaseEvent,
    ) -> Result<(), EngineError> {
        let mut inner = self.lock()?;
        if inner.cases.contains_key(&case.id) {
            return Err(EngineError::Database {
                operation: "insert_case".to_string(),
                details: format!("case '{}' already exists", case.id),
            });
        }
        inner.cases.insert(case.id, case.clone());
        inner.stages.insert(case.id, stages.to_vec());
        push_event(&mut inner, case.id, &created, case.created_at);
        Ok(())
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<ContractorCase>, EngineError> {
        Ok(self.lock()?.cases.get(&case_id).cloned())
    }

    async fn get_stages(&self, case_id: Uuid) -> Result<Vec<StageRecord>, EngineError> {
        Ok(self.lock()?.stages.get(&case_id).cloned().unwrap_or_default())
    }

    async fn get_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, EngineError> {
        Ok(self
            .lock()?
            .documents
            .get(&case_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ContractorCase>, EngineError> {
        let inner = self.lock()?;
        let mut cases: Vec<_> = inner
            .cases
            .values()
            .filter(|c| status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        cases.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        Ok(cases
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn commit_transition(&self, batch: &CommitBatch) -> Result<bool, EngineError> {
        let mut inner = self.lock()?;

        match inner.cases.get(&batch.case_id) {
            None => {
                return Err(EngineError::CaseNotFound {
                    case_id: batch.case_id,
                });
            }
            Some(case) if case.status != batch.expected_status => return Ok(false),
            Some(_) => {}
        }

        // Tokens first, so an issue for a stage supersedes its predecessor.
        for stage in &batch.tokens_invalidated {
            invalidate_active_tokens(&mut inner, batch.case_id, *stage, batch.updated_at);
        }
        for token in &batch.tokens_issued {
            invalidate_active_tokens(&mut inner, batch.case_id, token.stage, batch.updated_at);
            inner.tokens.insert(token.digest.clone(), token.clone());
        }

        {
            let stages = inner.stages.entry(batch.case_id).or_default();
            for (kind, state) in &batch.stage_states {
                if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == *kind) {
                    stage.state = *state;
                }
            }
            for (kind, artifact_ref) in &batch.stage_artifacts {
                if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == *kind) {
                    stage.artifact_ref = Some(artifact_ref.clone());
                }
            }
            for (kind, signature) in &batch.signatures {
                if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == *kind) {
                    stage.signatures.push(signature.clone());
                }
            }
            for stage in &batch.tokens_invalidated {
                if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == *stage) {
                    stage.token_digest = None;
                    stage.token_expiry = None;
                }
            }
            for token in &batch.tokens_issued {
                if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == token.stage) {
                    stage.token_digest = Some(token.digest.clone());
                    stage.token_expiry = Some(token.expires_at);
                }
            }
        }

        inner
            .documents
            .entry(batch.case_id)
            .or_default()
            .extend(batch.documents.iter().cloned());

        for event in &batch.events {
            push_event(&mut inner, batch.case_id, event, batch.updated_at);
        }

        let Some(case) = inner.cases.get_mut(&batch.case_id) else {
            return Err(EngineError::CaseNotFound {
                case_id: batch.case_id,
            });
        };
        case.status = batch.new_status;
        case.updated_at = batch.updated_at;
        if let Some(rejected_from) = batch.rejected_from {
            case.rejected_from = rejected_from;
        }

        Ok(true)
    }

    async fn consume_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, EngineError> {
        let mut inner = self.lock()?;
        let token = match inner.tokens.get_mut(digest) {
            None => return Err(TokenError::NotFound.into()),
            Some(token) => token,
        };
        if token.consumed_at.is_some() || token.invalidated_at.is_some() {
            return Err(TokenError::AlreadyConsumed.into());
        }
        if token.expires_at <= now {
            return Err(TokenError::Expired.into());
        }
        token.consumed_at = Some(now);
        Ok(token.claims())
    }

    async fn get_token(&self, digest: &str) -> Result<Option<TokenRecord>, EngineError> {
        Ok(self.lock()?.tokens.get(digest).cloned())
    }

    async fn case_history(&self, case_id: Uuid) -> Result<Vec<CaseEventRecord>, EngineError> {
        Ok(self
            .lock()?
            .events
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        Ok(true)
    }
}
