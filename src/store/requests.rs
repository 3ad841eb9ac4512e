//! Form request store: request state machine, progress log, and actions

use crate::agents::actions::GeneratedAction;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use tracing::debug;
use uuid::Uuid;

/// Status of a form analysis request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "processing_step_1")]
    ProcessingStep1,
    #[serde(rename = "processing_step_2")]
    ProcessingStep2,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::ProcessingStep1 => "processing_step_1",
            RequestStatus::ProcessingStep2 => "processing_step_2",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "processing" => Some(RequestStatus::Processing),
            "processing_step_1" => Some(RequestStatus::ProcessingStep1),
            "processing_step_2" => Some(RequestStatus::ProcessingStep2),
            "completed" => Some(RequestStatus::Completed),
            "failed" => Some(RequestStatus::Failed),
            _ => None,
        }
    }

    /// A request in any of these states blocks new admissions for its user
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }

    fn is_processing(self) -> bool {
        matches!(
            self,
            RequestStatus::Processing | RequestStatus::ProcessingStep1 | RequestStatus::ProcessingStep2
        )
    }
}

/// One form analysis request row
#[derive(Debug, Clone, Serialize)]
pub struct FormRequest {
    pub id: String,
    pub user_id: String,
    pub status: RequestStatus,
    pub fields_detected: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One append-only progress event
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub id: i64,
    pub request_id: String,
    pub stage: String,
    pub message: String,
    pub progress: Option<i64>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One persisted action row
#[derive(Debug, Clone, Serialize)]
pub struct StoredAction {
    pub action_type: String,
    pub selector: String,
    pub value: Option<Value>,
    pub label: Option<String>,
    pub question: Option<String>,
    pub order_index: i64,
}

/// SQLite-backed request store
#[derive(Clone)]
pub struct RequestStore {
    pool: SqlitePool,
}

impl RequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new pending request with its initial progress event
    pub async fn create(&self, user_id: &str) -> Result<FormRequest> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO form_requests (id, user_id, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.log_progress(
            &id,
            "queued",
            "Request received and queued for processing",
            Some(0),
            None,
        )
        .await?;

        Ok(FormRequest {
            id,
            user_id: user_id.to_string(),
            status: RequestStatus::Pending,
            fields_detected: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    /// Get a request, optionally checking ownership
    pub async fn get(&self, request_id: &str, user_id: Option<&str>) -> Result<Option<FormRequest>> {
        let row = match user_id {
            Some(user_id) => {
                sqlx::query("SELECT * FROM form_requests WHERE id = ?1 AND user_id = ?2")
                    .bind(request_id)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM form_requests WHERE id = ?1")
                    .bind(request_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        Ok(row.map(|row| Self::row_to_request(&row)))
    }

    /// Most recent request of the user still in a non-terminal state
    pub async fn get_active_for_user(&self, user_id: &str) -> Result<Option<FormRequest>> {
        let row = sqlx::query(
            "SELECT * FROM form_requests
             WHERE user_id = ?1
               AND status IN ('pending', 'processing', 'processing_step_1', 'processing_step_2')
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Self::row_to_request(&row)))
    }

    /// Update request status, enforcing the timestamp rules:
    /// `started_at` is stamped on the first transition into a processing
    /// state, `completed_at` on the transition into a terminal state.
    pub async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        fields_detected: Option<i64>,
        error_message: Option<&str>,
    ) -> Result<Option<FormRequest>> {
        let Some(current) = self.get(request_id, None).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let started_at = if status.is_processing() && current.started_at.is_none() {
            Some(now)
        } else {
            current.started_at
        };
        let completed_at = if status.is_terminal() && current.completed_at.is_none() {
            Some(now)
        } else {
            current.completed_at
        };

        sqlx::query(
            "UPDATE form_requests
             SET status = ?1,
                 started_at = ?2,
                 completed_at = ?3,
                 fields_detected = COALESCE(?4, fields_detected),
                 error_message = COALESCE(?5, error_message)
             WHERE id = ?6",
        )
        .bind(status.as_str())
        .bind(started_at.map(|t| t.to_rfc3339()))
        .bind(completed_at.map(|t| t.to_rfc3339()))
        .bind(fields_detected)
        .bind(error_message)
        .bind(request_id)
        .execute(&self.pool)
        .await?;

        debug!("Request {} -> {}", request_id, status.as_str());
        self.get(request_id, None).await
    }

    /// Append a progress event
    pub async fn log_progress(
        &self,
        request_id: &str,
        stage: &str,
        message: &str,
        progress: Option<i64>,
        payload: Option<Value>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO form_request_progress (request_id, stage, message, progress, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(request_id)
        .bind(stage)
        .bind(message)
        .bind(progress)
        .bind(payload.map(|p| p.to_string()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All progress events of a request, ordered by id
    pub async fn list_progress(&self, request_id: &str) -> Result<Vec<ProgressEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM form_request_progress WHERE request_id = ?1 ORDER BY id ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let payload: Option<String> = row.get("payload");
                let created_at: String = row.get("created_at");
                ProgressEvent {
                    id: row.get("id"),
                    request_id: row.get("request_id"),
                    stage: row.get("stage"),
                    message: row.get("message"),
                    progress: row.get("progress"),
                    payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                }
            })
            .collect())
    }

    /// Persist the final action list; order_index follows list position
    pub async fn insert_actions(&self, request_id: &str, actions: &[GeneratedAction]) -> Result<usize> {
        for (idx, action) in actions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO form_actions (request_id, action_type, selector, value, label, question, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(request_id)
            .bind(&action.action_type)
            .bind(&action.selector)
            .bind(action.value.as_ref().map(|v| v.to_string()))
            .bind(&action.label)
            .bind(&action.question)
            .bind(idx as i64)
            .execute(&self.pool)
            .await?;
        }

        Ok(actions.len())
    }

    /// Actions of a request, ordered by order_index
    pub async fn get_actions(&self, request_id: &str) -> Result<Vec<StoredAction>> {
        let rows = sqlx::query(
            "SELECT * FROM form_actions WHERE request_id = ?1 ORDER BY order_index ASC",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let value: Option<String> = row.get("value");
                StoredAction {
                    action_type: row.get("action_type"),
                    selector: row.get("selector"),
                    value: value.and_then(|v| serde_json::from_str(&v).ok()),
                    label: row.get("label"),
                    question: row.get("question"),
                    order_index: row.get("order_index"),
                }
            })
            .collect())
    }

    /// Delete a request; progress events and actions cascade.
    /// Returns false when the request does not exist or is not owned.
    pub async fn delete(&self, request_id: &str, user_id: Option<&str>) -> Result<bool> {
        let result = match user_id {
            Some(user_id) => {
                sqlx::query("DELETE FROM form_requests WHERE id = ?1 AND user_id = ?2")
                    .bind(request_id)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("DELETE FROM form_requests WHERE id = ?1")
                    .bind(request_id)
                    .execute(&self.pool)
                    .await?
            }
        };

        Ok(result.rows_affected() > 0)
    }

    /// Delete requests older than the threshold; returns the count removed
    pub async fn cleanup_old(&self, hours: u64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::hours(hours as i64);

        let result = sqlx::query("DELETE FROM form_requests WHERE created_at < ?1")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> FormRequest {
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");
        let started_at: Option<String> = row.get("started_at");
        let completed_at: Option<String> = row.get("completed_at");

        let parse_ts = |s: String| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        };

        FormRequest {
            id: row.get("id"),
            user_id: row.get("user_id"),
            status: RequestStatus::parse(&status).unwrap_or(RequestStatus::Failed),
            fields_detected: row.get("fields_detected"),
            error_message: row.get("error_message"),
            created_at: parse_ts(created_at).unwrap_or_else(Utc::now),
            started_at: started_at.and_then(parse_ts),
            completed_at: completed_at.and_then(parse_ts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&RequestStatus::ProcessingStep1).unwrap(),
            "\"processing_step_1\""
        );
        let parsed: RequestStatus = serde_json::from_str("\"processing_step_2\"").unwrap();
        assert_eq!(parsed, RequestStatus::ProcessingStep2);
        assert_eq!(RequestStatus::ProcessingStep2.as_str(), "processing_step_2");
    }

    #[tokio::test]
    async fn test_create_writes_queued_event() {
        let store = RequestStore::new(test_pool().await);

        let request = store.create("u1").await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        let events = store.list_progress(&request.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, "queued");
        assert_eq!(events[0].progress, Some(0));
    }

    #[tokio::test]
    async fn test_timestamp_rules() {
        let store = RequestStore::new(test_pool().await);
        let request = store.create("u1").await.unwrap();

        assert!(request.started_at.is_none());

        let updated = store
            .update_status(&request.id, RequestStatus::ProcessingStep1, None, None)
            .await
            .unwrap()
            .unwrap();
        let first_start = updated.started_at.unwrap();
        assert!(updated.completed_at.is_none());

        // started_at does not move on later processing transitions
        let updated = store
            .update_status(&request.id, RequestStatus::ProcessingStep2, None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.started_at.unwrap(), first_start);

        let done = store
            .update_status(&request.id, RequestStatus::Completed, Some(3), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.fields_detected, Some(3));
        let completed = done.completed_at.unwrap();
        assert!(done.started_at.unwrap() <= completed);
    }

    #[tokio::test]
    async fn test_active_lookup() {
        let store = RequestStore::new(test_pool().await);

        assert!(store.get_active_for_user("u1").await.unwrap().is_none());

        let request = store.create("u1").await.unwrap();
        let active = store.get_active_for_user("u1").await.unwrap().unwrap();
        assert_eq!(active.id, request.id);

        // Other users see nothing
        assert!(store.get_active_for_user("u2").await.unwrap().is_none());

        store
            .update_status(&request.id, RequestStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        assert!(store.get_active_for_user("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_ordering() {
        let store = RequestStore::new(test_pool().await);
        let request = store.create("u1").await.unwrap();

        for (stage, pct) in [("parser_started", 10), ("parser_completed", 40), ("completed", 100)] {
            store
                .log_progress(&request.id, stage, stage, Some(pct), Some(json!({"p": pct})))
                .await
                .unwrap();
        }

        let events = store.list_progress(&request.id).await.unwrap();
        assert_eq!(events.len(), 4);
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        for pair in events.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert_eq!(events[3].payload.as_ref().unwrap()["p"], 100);
    }

    #[tokio::test]
    async fn test_actions_roundtrip_and_cascade() {
        let store = RequestStore::new(test_pool().await);
        let request = store.create("u1").await.unwrap();

        let actions = vec![
            GeneratedAction {
                action_type: "fillText".to_string(),
                selector: "#a".to_string(),
                value: Some(json!("x")),
                label: Some("A".to_string()),
                question: Some("1) A?".to_string()),
            },
            GeneratedAction {
                action_type: "click".to_string(),
                selector: "#b".to_string(),
                value: None,
                ..Default::default()
            },
        ];
        store.insert_actions(&request.id, &actions).await.unwrap();

        let stored = store.get_actions(&request.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].order_index, 0);
        assert_eq!(stored[0].value, Some(json!("x")));
        assert_eq!(stored[1].order_index, 1);
        assert_eq!(stored[1].value, None);

        assert!(store.delete(&request.id, Some("u1")).await.unwrap());
        assert!(store.get_actions(&request.id).await.unwrap().is_empty());
        assert!(store.list_progress(&request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_checks_ownership() {
        let store = RequestStore::new(test_pool().await);
        let request = store.create("u1").await.unwrap();

        assert!(!store.delete(&request.id, Some("intruder")).await.unwrap());
        assert!(store.get(&request.id, None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cleanup_old() {
        let store = RequestStore::new(test_pool().await);
        let request = store.create("u1").await.unwrap();

        // Fresh requests survive
        assert_eq!(store.cleanup_old(24).await.unwrap(), 0);

        // Backdate and reap
        let old = (Utc::now() - Duration::hours(48)).to_rfc3339();
        sqlx::query("UPDATE form_requests SET created_at = ?1 WHERE id = ?2")
            .bind(&old)
            .bind(&request.id)
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.cleanup_old(24).await.unwrap(), 1);
        assert!(store.get(&request.id, None).await.unwrap().is_none());
    }
}
