use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::Row;

use assess_core::model::{CandidateEmail, ModuleKind, SessionId, VerticalId};

use super::SqliteSessionStore;
use crate::repository::{ModuleRecord, SessionRecord, SessionStore, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn vertical_to_i64(v: VerticalId) -> Result<i64, StorageError> {
    i64::try_from(v.value()).map_err(|_| StorageError::Serialization("vertical overflow".into()))
}

fn vertical_from_i64(v: i64) -> Result<VerticalId, StorageError> {
    u64::try_from(v)
        .map(VerticalId::new)
        .map_err(|_| StorageError::Serialization(format!("invalid vertical: {v}")))
}

fn map_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, StorageError> {
    let session_id: String = row.try_get("session_id").map_err(ser)?;
    let session_id: SessionId = session_id.parse().map_err(ser)?;
    let email: String = row.try_get("candidate_email").map_err(ser)?;
    let candidate_email = CandidateEmail::new(email).map_err(ser)?;
    let vertical = vertical_from_i64(row.try_get::<i64, _>("vertical").map_err(ser)?)?;
    let aborted = row.try_get::<i64, _>("aborted").map_err(ser)? != 0;
    let created_at = row.try_get("created_at").map_err(ser)?;
    let updated_at = row.try_get("updated_at").map_err(ser)?;

    Ok(SessionRecord {
        session_id,
        candidate_email,
        vertical,
        aborted,
        created_at,
        updated_at,
    })
}

fn map_module_row(row: &sqlx::sqlite::SqliteRow) -> Result<ModuleRecord, StorageError> {
    let kind: String = row.try_get("module").map_err(ser)?;
    let kind: ModuleKind = kind.parse().map_err(ser)?;
    let completed = row.try_get::<i64, _>("completed").map_err(ser)? != 0;
    let score: Option<f64> = row.try_get("score").map_err(ser)?;
    let feedback_report: Option<String> = row.try_get("feedback_report").map_err(ser)?;
    let cefr_level: Option<String> = row.try_get("cefr_level").map_err(ser)?;

    Ok(ModuleRecord {
        kind,
        completed,
        score,
        feedback_report,
        cefr_level,
    })
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, id: SessionId) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT session_id, candidate_email, vertical, aborted, created_at, updated_at
                FROM sessions
                WHERE session_id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(conn)?;

        row.as_ref().map(map_session_row).transpose()
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO sessions (
                    session_id, candidate_email, vertical, aborted, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (session_id) DO UPDATE SET
                    candidate_email = excluded.candidate_email,
                    vertical = excluded.vertical,
                    aborted = excluded.aborted,
                    updated_at = excluded.updated_at
            ",
        )
        .bind(record.session_id.to_string())
        .bind(record.candidate_email.as_str())
        .bind(vertical_to_i64(record.vertical)?)
        .bind(i64::from(record.aborted))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.pool())
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn load_modules(&self, id: SessionId) -> Result<Vec<ModuleRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT module, completed, score, feedback_report, cefr_level
                FROM session_modules
                WHERE session_id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(conn)?;

        let mut modules = rows
            .iter()
            .map(map_module_row)
            .collect::<Result<Vec<_>, _>>()?;
        modules.sort_by_key(|m| m.kind);
        Ok(modules)
    }

    async fn save_module(
        &self,
        id: SessionId,
        module: &ModuleRecord,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r"
                INSERT INTO session_modules (
                    session_id, module, completed, score, feedback_report, cefr_level
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (session_id, module) DO UPDATE SET
                    completed = excluded.completed,
                    score = excluded.score,
                    feedback_report = excluded.feedback_report,
                    cefr_level = excluded.cefr_level
            ",
        )
        .bind(id.to_string())
        .bind(module.kind.as_str())
        .bind(i64::from(module.completed))
        .bind(module.score)
        .bind(module.feedback_report.as_deref())
        .bind(module.cefr_level.as_deref())
        .execute(self.pool())
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn cache_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
        answers: &JsonValue,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(answers).map_err(ser)?;

        sqlx::query(
            r"
                INSERT INTO cached_answers (session_id, module, payload)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (session_id, module) DO UPDATE SET
                    payload = excluded.payload
            ",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(payload)
        .execute(self.pool())
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn load_answers(
        &self,
        id: SessionId,
        kind: ModuleKind,
    ) -> Result<Option<JsonValue>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT payload FROM cached_answers
                WHERE session_id = ?1 AND module = ?2
            ",
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .fetch_optional(self.pool())
        .await
        .map_err(conn)?;

        row.map(|row| {
            let payload: String = row.try_get("payload").map_err(ser)?;
            serde_json::from_str(&payload).map_err(ser)
        })
        .transpose()
    }

    async fn mark_aborted(&self, id: SessionId) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE sessions SET aborted = 1 WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn clear(&self, id: SessionId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM session_modules WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(conn)?;

        sqlx::query("DELETE FROM cached_answers WHERE session_id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await
            .map_err(conn)?;

        Ok(())
    }
}
