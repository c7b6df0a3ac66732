//! Outbox and event-record operations.

use super::{map_event_record, map_outbox, Repository};
use crate::domain::{DomainEvent, EventRecord, OutboxMessage, TimeMs};
use sqlx::SqliteConnection;

/// Append events to the outbox inside an open transaction. The caller's
/// business mutation and these rows commit or roll back together.
pub(crate) async fn insert_outbox_tx(
    conn: &mut SqliteConnection,
    events: &[DomainEvent],
    now: TimeMs,
) -> Result<(), sqlx::Error> {
    for event in events {
        let payload = serde_json::to_string(event)
            .map_err(|e| sqlx::Error::Protocol(format!("event serialization failed: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (event_type, payload, retry_count, next_attempt_at, created_at)
            VALUES (?, ?, 0, 0, ?)
            "#,
        )
        .bind(event.event_type())
        .bind(payload)
        .bind(now.as_i64())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl Repository {
    /// Oldest unprocessed messages still within the retry budget and whose
    /// backoff has elapsed as of `now`.
    pub async fn fetch_pending_outbox(
        &self,
        limit: i64,
        max_retries: i32,
        now: TimeMs,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count <= ? AND next_attempt_at <= ?
            ORDER BY created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(max_retries)
        .bind(now.as_i64())
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_outbox).collect()
    }

    /// Mark a message delivered. Guarded on `processed_at IS NULL` so a
    /// concurrent poller cannot double-process.
    pub async fn mark_outbox_processed(
        &self,
        id: i64,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE outbox_messages SET processed_at = ? WHERE id = ? AND processed_at IS NULL",
        )
        .bind(now.as_i64())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a delivery failure: bump the retry count, stamp the earliest
    /// next attempt, and keep the error for manual inspection.
    pub async fn record_outbox_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET retry_count = retry_count + 1, last_error = ?, next_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(next_attempt_at.as_i64())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_outbox_message(
        &self,
        id: i64,
    ) -> Result<Option<OutboxMessage>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM outbox_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_outbox).transpose()
    }

    /// All messages that exhausted their retries; retained, never re-polled.
    pub async fn list_parked_outbox(
        &self,
        max_retries: i32,
    ) -> Result<Vec<OutboxMessage>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM outbox_messages
            WHERE processed_at IS NULL AND retry_count > ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(max_retries)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_outbox).collect()
    }

    /// Append an audit record for a successfully published event.
    pub async fn insert_event_record(
        &self,
        event: &DomainEvent,
        metadata: Option<&str>,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        let (aggregate_type, aggregate_id) = event.aggregate();
        let payload = serde_json::to_string(event)
            .map_err(|e| sqlx::Error::Protocol(format!("event serialization failed: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO event_records (event_type, aggregate_type, aggregate_id, payload, metadata, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_type())
        .bind(aggregate_type)
        .bind(aggregate_id)
        .bind(payload)
        .bind(metadata)
        .bind(now.as_i64())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_event_records(
        &self,
        aggregate_type: &str,
        aggregate_id: i64,
    ) -> Result<Vec<EventRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM event_records
            WHERE aggregate_type = ? AND aggregate_id = ?
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_event_record).collect()
    }

    pub async fn count_event_records(&self, event_type: &str) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_records WHERE event_type = ?")
                .bind(event_type)
                .fetch_one(self.pool())
                .await?;
        Ok(row.0)
    }

    /// Retention: delete processed messages older than the cutoff. Event
    /// records are deliberately untouched by this path.
    pub async fn delete_processed_outbox_before(
        &self,
        cutoff: TimeMs,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE processed_at IS NOT NULL AND processed_at < ?",
        )
        .bind(cutoff.as_i64())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }
}
