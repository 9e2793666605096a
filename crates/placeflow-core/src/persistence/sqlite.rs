//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use uuid::Uuid;

use crate::case::{
    CaseDocument, CaseStatus, ContractorCase, DocumentKind, OnboardingRoute, SignatureEvent,
    SignatureMethod, SignerRole, StageKind, StageRecord, StageState,
};
use crate::error::{EngineError, TokenError};
use crate::token::{TokenClaims, TokenRecord, TokenScope};

use super::{CaseEventRecord, CommitBatch, NewCaseEvent, Persistence};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Create a new SQLite persistence provider from an existing pool.
    ///
    /// The caller is responsible for running migrations.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite persistence from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::Database {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

fn decode_error(column: &str, value: &str) -> EngineError {
    EngineError::Database {
        operation: "decode".to_string(),
        details: format!("unexpected value '{}' in column '{}'", value, column),
    }
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(value).map_err(|_| decode_error(column, value))
}

fn case_from_row(row: &SqliteRow) -> Result<ContractorCase, EngineError> {
    let id: String = row.try_get("case_id")?;
    let route: String = row.try_get("onboarding_route")?;
    let status: String = row.try_get("status")?;
    let rejected_from: Option<String> = row.try_get("rejected_from")?;
    let attributes: String = row.try_get("attributes")?;

    Ok(ContractorCase {
        id: parse_uuid("case_id", &id)?,
        onboarding_route: OnboardingRoute::from_str(&route)
            .ok_or_else(|| decode_error("onboarding_route", &route))?,
        status: CaseStatus::from_str(&status).ok_or_else(|| decode_error("status", &status))?,
        rejected_from: rejected_from
            .map(|s| CaseStatus::from_str(&s).ok_or_else(|| decode_error("rejected_from", &s)))
            .transpose()?,
        attributes: serde_json::from_str(&attributes)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn token_from_row(row: &SqliteRow) -> Result<TokenRecord, EngineError> {
    let case_id: String = row.try_get("case_id")?;
    let stage: String = row.try_get("stage_kind")?;
    let scope: String = row.try_get("scope")?;
    let signer_role: Option<String> = row.try_get("signer_role")?;

    Ok(TokenRecord {
        digest: row.try_get("token_digest")?,
        case_id: parse_uuid("case_id", &case_id)?,
        stage: StageKind::from_str(&stage).ok_or_else(|| decode_error("stage_kind", &stage))?,
        scope: TokenScope::from_str(&scope).ok_or_else(|| decode_error("scope", &scope))?,
        signer_role: signer_role
            .map(|s| SignerRole::from_str(&s).ok_or_else(|| decode_error("signer_role", &s)))
            .transpose()?,
        issued_at: row.try_get("issued_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
        invalidated_at: row.try_get("invalidated_at")?,
    })
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_case(
        &self,
        case: &ContractorCase,
        stages: &[StageRecord],
        created: NewCaseEvent,
    ) -> Result<(), EngineError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO cases (case_id, onboarding_route, status, rejected_from, attributes, created_at, updated_at)
            VALUES (?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(case.id.to_string())
        .bind(case.onboarding_route.as_str())
        .bind(case.status.as_str())
        .bind(serde_json::to_string(&case.attributes)?)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut *tx)
        .await?;

        for (position, stage) in stages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO case_stages (case_id, stage_kind, position, state)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(case.id.to_string())
            .bind(stage.stage_kind.as_str())
            .bind(position as i64)
            .bind(stage.state.as_str())
            .execute(&mut *tx)
            .await?;
        }

        insert_event(&mut tx, case.id, &created, case.created_at).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<ContractorCase>, EngineError> {
        let row = sqlx::query("SELECT * FROM cases WHERE case_id = ?")
            .bind(case_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(case_from_row).transpose()
    }

    async fn get_stages(&self, case_id: Uuid) -> Result<Vec<StageRecord>, EngineError> {
        let rows = sqlx::query(
            "SELECT stage_kind, state, token_digest, token_expiry, artifact_ref \
             FROM case_stages WHERE case_id = ? ORDER BY position",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut stages = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("stage_kind")?;
            let state: String = row.try_get("state")?;
            stages.push(StageRecord {
                stage_kind: StageKind::from_str(&kind)
                    .ok_or_else(|| decode_error("stage_kind", &kind))?,
                state: StageState::from_str(&state)
                    .ok_or_else(|| decode_error("state", &state))?,
                token_digest: row.try_get("token_digest")?,
                token_expiry: row.try_get("token_expiry")?,
                artifact_ref: row.try_get("artifact_ref")?,
                signatures: Vec::new(),
            });
        }

        let rows = sqlx::query(
            "SELECT stage_kind, signer_role, method, payload_ref, signed_at \
             FROM stage_signatures WHERE case_id = ? ORDER BY id",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let kind: String = row.try_get("stage_kind")?;
            let role: String = row.try_get("signer_role")?;
            let method: String = row.try_get("method")?;
            let kind = StageKind::from_str(&kind)
                .ok_or_else(|| decode_error("stage_kind", &kind))?;
            let signature = SignatureEvent {
                signer_role: SignerRole::from_str(&role)
                    .ok_or_else(|| decode_error("signer_role", &role))?,
                method: SignatureMethod::from_str(&method)
                    .ok_or_else(|| decode_error("method", &method))?,
                payload_ref: row.try_get("payload_ref")?,
                signed_at: row.try_get("signed_at")?,
            };
            if let Some(stage) = stages.iter_mut().find(|s| s.stage_kind == kind) {
                stage.signatures.push(signature);
            }
        }

        Ok(stages)
    }

    async fn get_documents(&self, case_id: Uuid) -> Result<Vec<CaseDocument>, EngineError> {
        let rows = sqlx::query(
            "SELECT kind, doc_ref, uploaded_at FROM case_documents WHERE case_id = ? ORDER BY id",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            documents.push(CaseDocument {
                kind: DocumentKind::from_str(&kind)
                    .ok_or_else(|| decode_error("kind", &kind))?,
                doc_ref: row.try_get("doc_ref")?,
                uploaded_at: row.try_get("uploaded_at")?,
            });
        }
        Ok(documents)
    }

    async fn list_cases(
        &self,
        status: Option<CaseStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ContractorCase>, EngineError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM cases WHERE status = ? \
                     ORDER BY created_at DESC LIMIT ? OFFSET ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM cases ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(case_from_row).collect()
    }

    async fn commit_transition(&self, batch: &CommitBatch) -> Result<bool, EngineError> {
        let mut tx = self.pool.begin().await?;

        // Guarded status update: refuse the whole batch if the case moved.
        let result = match batch.rejected_from {
            Some(rejected_from) => {
                sqlx::query(
                    "UPDATE cases SET status = ?, rejected_from = ?, updated_at = ? \
                     WHERE case_id = ? AND status = ?",
                )
                .bind(batch.new_status.as_str())
                .bind(rejected_from.map(|s| s.as_str()))
                .bind(batch.updated_at)
                .bind(batch.case_id.to_string())
                .bind(batch.expected_status.as_str())
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    "UPDATE cases SET status = ?, updated_at = ? \
                     WHERE case_id = ? AND status = ?",
                )
                .bind(batch.new_status.as_str())
                .bind(batch.updated_at)
                .bind(batch.case_id.to_string())
                .bind(batch.expected_status.as_str())
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            let exists = self.get_case(batch.case_id).await?.is_some();
            if !exists {
                return Err(EngineError::CaseNotFound {
                    case_id: batch.case_id,
                });
            }
            return Ok(false);
        }

        for stage in &batch.tokens_invalidated {
            invalidate_active(&mut tx, batch.case_id, *stage, batch.updated_at).await?;
            sqlx::query(
                "UPDATE case_stages SET token_digest = NULL, token_expiry = NULL \
                 WHERE case_id = ? AND stage_kind = ?",
            )
            .bind(batch.case_id.to_string())
            .bind(stage.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for token in &batch.tokens_issued {
            invalidate_active(&mut tx, batch.case_id, token.stage, batch.updated_at).await?;
            sqlx::query(
                r#"
                INSERT INTO access_tokens
                    (token_digest, case_id, stage_kind, scope, signer_role, issued_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&token.digest)
            .bind(token.case_id.to_string())
            .bind(token.stage.as_str())
            .bind(token.scope.as_str())
            .bind(token.signer_role.map(|r| r.as_str()))
            .bind(token.issued_at)
            .bind(token.expires_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE case_stages SET token_digest = ?, token_expiry = ? \
                 WHERE case_id = ? AND stage_kind = ?",
            )
            .bind(&token.digest)
            .bind(token.expires_at)
            .bind(batch.case_id.to_string())
            .bind(token.stage.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for (stage, state) in &batch.stage_states {
            sqlx::query("UPDATE case_stages SET state = ? WHERE case_id = ? AND stage_kind = ?")
                .bind(state.as_str())
                .bind(batch.case_id.to_string())
                .bind(stage.as_str())
                .execute(&mut *tx)
                .await?;
        }

        for (stage, artifact_ref) in &batch.stage_artifacts {
            sqlx::query(
                "UPDATE case_stages SET artifact_ref = ? WHERE case_id = ? AND stage_kind = ?",
            )
            .bind(artifact_ref)
            .bind(batch.case_id.to_string())
            .bind(stage.as_str())
            .execute(&mut *tx)
            .await?;
        }

        for document in &batch.documents {
            sqlx::query(
                "INSERT INTO case_documents (case_id, kind, doc_ref, uploaded_at) VALUES (?, ?, ?, ?)",
            )
            .bind(batch.case_id.to_string())
            .bind(document.kind.as_str())
            .bind(&document.doc_ref)
            .bind(document.uploaded_at)
            .execute(&mut *tx)
            .await?;
        }

        for (stage, signature) in &batch.signatures {
            sqlx::query(
                r#"
                INSERT INTO stage_signatures (case_id, stage_kind, signer_role, method, payload_ref, signed_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(batch.case_id.to_string())
            .bind(stage.as_str())
            .bind(signature.signer_role.as_str())
            .bind(signature.method.as_str())
            .bind(&signature.payload_ref)
            .bind(signature.signed_at)
            .execute(&mut *tx)
            .await?;
        }

        for event in &batch.events {
            insert_event(&mut tx, batch.case_id, event, batch.updated_at).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn consume_token(
        &self,
        digest: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, EngineError> {
        // Compare-and-swap: only an unconsumed, uninvalidated, unexpired
        // token row can be marked consumed, and only by one caller.
        let result = sqlx::query(
            "UPDATE access_tokens SET consumed_at = ? \
             WHERE token_digest = ? AND consumed_at IS NULL \
               AND invalidated_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(digest)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            let record = self.get_token(digest).await?.ok_or(EngineError::Database {
                operation: "consume_token".to_string(),
                details: "consumed token row disappeared".to_string(),
            })?;
            return Ok(record.claims());
        }

        // Classify the failure without revealing more than the ledger knows.
        match self.get_token(digest).await? {
            None => Err(TokenError::NotFound.into()),
            Some(t) if t.consumed_at.is_some() || t.invalidated_at.is_some() => {
                Err(TokenError::AlreadyConsumed.into())
            }
            Some(_) => Err(TokenError::Expired.into()),
        }
    }

    async fn get_token(&self, digest: &str) -> Result<Option<TokenRecord>, EngineError> {
        let row = sqlx::query("SELECT * FROM access_tokens WHERE token_digest = ?")
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(token_from_row).transpose()
    }

    async fn case_history(&self, case_id: Uuid) -> Result<Vec<CaseEventRecord>, EngineError> {
        let rows = sqlx::query(
            "SELECT id, event_type, actor, detail, created_at \
             FROM case_events WHERE case_id = ? ORDER BY id",
        )
        .bind(case_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let detail: Option<String> = row.try_get("detail")?;
            events.push(CaseEventRecord {
                id: row.try_get("id")?,
                case_id,
                event_type: row.try_get("event_type")?,
                actor: row.try_get("actor")?,
                detail: detail.map(|d| serde_json::from_str(&d)).transpose()?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(events)
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(true)
    }
}

async fn invalidate_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    case_id: Uuid,
    stage: StageKind,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    sqlx::query(
        "UPDATE access_tokens SET invalidated_at = ? \
         WHERE case_id = ? AND stage_kind = ? \
           AND consumed_at IS NULL AND invalidated_at IS NULL",
    )
    .bind(at)
    .bind(case_id.to_string())
    .bind(stage.as_str())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    case_id: Uuid,
    event: &NewCaseEvent,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let detail = event
        .detail
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO case_events (case_id, event_type, actor, detail, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(case_id.to_string())
    .bind(&event.event_type)
    .bind(&event.actor)
    .bind(detail)
    .bind(at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
