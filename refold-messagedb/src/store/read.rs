//! Row reads and decoding for the message-db schema.

use chrono::{DateTime, Utc};
use refold_core::TimelineEvent;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::Error;

/// One ascending page of a stream via `get_stream_messages`.
pub(crate) async fn read_page(
    pool: &PgPool,
    stream: &str,
    from: i64,
    limit: usize,
) -> Result<Vec<TimelineEvent>, Error> {
    let rows = sqlx::query(r"SELECT * FROM get_stream_messages($1, $2, $3)")
        .bind(stream)
        .bind(from)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(decode_row).collect()
}

/// The stream's newest message via `get_last_stream_message`, optionally
/// restricted to one event type.
pub(crate) async fn read_last(
    pool: &PgPool,
    stream: &str,
    event_type: Option<&str>,
) -> Result<Option<TimelineEvent>, Error> {
    let row = sqlx::query(r"SELECT * FROM get_last_stream_message($1, $2)")
        .bind(stream)
        .bind(event_type)
        .fetch_optional(pool)
        .await?;
    row.map(decode_row).transpose()
}

fn decode_row(row: PgRow) -> Result<TimelineEvent, Error> {
    let index: i64 = row.try_get("position")?;
    let event_type: String = row.try_get("type")?;
    let id: uuid::Uuid = row.try_get("id")?;
    let timestamp: DateTime<Utc> = row.try_get("time")?;
    let data: Option<sqlx::types::Json<serde_json::Value>> = row.try_get("data")?;
    let metadata: Option<sqlx::types::Json<serde_json::Value>> = row.try_get("metadata")?;

    let metadata = metadata.map(|m| m.0);
    let correlation_id = metadata_string(metadata.as_ref(), "$correlationId");
    let causation_id = metadata_string(metadata.as_ref(), "$causationId");

    Ok(TimelineEvent {
        index,
        event_type,
        data: body_bytes(data.map(|d| d.0)),
        meta: body_bytes(metadata),
        id,
        correlation_id,
        causation_id,
        timestamp,
        is_unfold: false,
    })
}

/// A missing or null `jsonb` body reads back as an empty byte slice.
fn body_bytes(value: Option<serde_json::Value>) -> Vec<u8> {
    match value {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(value) => serde_json::to_vec(&value).unwrap_or_default(),
    }
}

fn metadata_string(metadata: Option<&serde_json::Value>, key: &str) -> Option<String> {
    metadata?
        .as_object()?
        .get(key)?
        .as_str()
        .map(str::to_owned)
}
