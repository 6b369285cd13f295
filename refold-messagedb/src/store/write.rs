//! Append path: `write_message` calls inside one transaction.

use refold_core::EventData;
use sqlx::PgPool;

use crate::error::Error;

/// An event staged for `write_message`.
#[derive(Debug)]
pub(crate) struct PreparedMessage {
    pub id: uuid::Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
}

/// Parse event bodies into the JSON values `write_message` expects,
/// folding correlation/causation ids into the metadata document.
pub(crate) fn prepare(events: &[EventData]) -> Result<Vec<PreparedMessage>, Error> {
    events
        .iter()
        .map(|event| {
            let data = if event.data.is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_slice(&event.data).map_err(|_| Error::InvalidPayload {
                    event_type: event.event_type.clone(),
                })?
            };
            Ok(PreparedMessage {
                id: event.id,
                event_type: event.event_type.clone(),
                data,
                metadata: metadata_value(event)?,
            })
        })
        .collect()
}

fn metadata_value(event: &EventData) -> Result<Option<serde_json::Value>, Error> {
    let base = if event.meta.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice::<serde_json::Value>(&event.meta).map_err(|_| {
                Error::InvalidPayload {
                    event_type: event.event_type.clone(),
                }
            })?,
        )
    };
    if event.correlation_id.is_none() && event.causation_id.is_none() {
        return Ok(base);
    }
    let mut object = match base {
        Some(serde_json::Value::Object(map)) => map,
        None => serde_json::Map::new(),
        Some(other) => {
            tracing::warn!(
                event_type = %event.event_type,
                "non-object metadata cannot carry correlation ids"
            );
            return Ok(Some(other));
        }
    };
    if let Some(correlation_id) = &event.correlation_id {
        object.insert(
            "$correlationId".to_owned(),
            serde_json::Value::String(correlation_id.clone()),
        );
    }
    if let Some(causation_id) = &event.causation_id {
        object.insert(
            "$causationId".to_owned(),
            serde_json::Value::String(causation_id.clone()),
        );
    }
    Ok(Some(serde_json::Value::Object(object)))
}

/// Write every staged message atomically at the expected version.
///
/// Returns `Ok(Some(position))` of the last written message,
/// `Ok(None)` when `write_message` reports a version conflict (the
/// transaction is rolled back; nothing is persisted).
pub(crate) async fn append_once(
    pool: &PgPool,
    stream: &str,
    expected: Option<i64>,
    messages: &[PreparedMessage],
) -> Result<Option<i64>, Error> {
    let mut tx = pool.begin().await?;
    let mut last_position = -1;
    for (offset, message) in messages.iter().enumerate() {
        let expected_here = expected.map(|version| version + offset as i64);
        let written = sqlx::query_scalar::<_, i64>(
            r"SELECT write_message($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(stream)
        .bind(&message.event_type)
        .bind(sqlx::types::Json(&message.data))
        .bind(message.metadata.as_ref().map(sqlx::types::Json))
        .bind(expected_here)
        .fetch_one(&mut *tx)
        .await;

        match written {
            Ok(position) => last_position = position,
            Err(error) => {
                let error = Error::from(error);
                tx.rollback().await?;
                if error.is_wrong_expected_version() {
                    return Ok(None);
                }
                return Err(error);
            }
        }
    }
    tx.commit().await?;
    Ok(Some(last_position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(data: &[u8], meta: &[u8], correlation: Option<&str>) -> EventData {
        EventData {
            id: uuid::Uuid::new_v4(),
            event_type: "Added".into(),
            data: data.to_vec(),
            meta: meta.to_vec(),
            correlation_id: correlation.map(str::to_owned),
            causation_id: None,
        }
    }

    #[test]
    fn prepare_parses_json_bodies() {
        let prepared = prepare(&[event(br#"{"item":"a"}"#, b"", None)]).unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].data["item"], "a");
        assert!(prepared[0].metadata.is_none());
    }

    #[test]
    fn prepare_rejects_non_json_bodies() {
        let error = prepare(&[event(b"not json", b"", None)]).unwrap_err();
        assert!(matches!(error, Error::InvalidPayload { .. }));
    }

    #[test]
    fn empty_bodies_become_null() {
        let prepared = prepare(&[event(b"", b"", None)]).unwrap();
        assert!(prepared[0].data.is_null());
    }

    #[test]
    fn correlation_ids_are_folded_into_metadata() {
        let prepared = prepare(&[event(b"{}", br#"{"source":"test"}"#, Some("corr-9"))]).unwrap();
        let metadata = prepared[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["$correlationId"], "corr-9");
        assert_eq!(metadata["source"], "test");
    }

    #[test]
    fn correlation_ids_without_base_metadata_create_an_object() {
        let prepared = prepare(&[event(b"{}", b"", Some("corr-1"))]).unwrap();
        let metadata = prepared[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["$correlationId"], "corr-1");
    }
}
