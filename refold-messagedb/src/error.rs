/// Error type for message-db store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Query execution or transaction failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// An event body bound for a `jsonb` column is not valid JSON.
    #[error("event payload for `{event_type}` is not valid JSON")]
    InvalidPayload { event_type: String },
}

impl Error {
    /// Whether the adapter's bounded backoff should retry this failure.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
        )
    }

    /// The database signals an optimistic-concurrency loss by raising
    /// from `write_message`; the message text is the contract.
    pub(crate) fn is_wrong_expected_version(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => {
                db.message().contains("Wrong expected version")
            }
            _ => false,
        }
    }
}
