use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// A row of the append-only release message log.
///
/// `message` is the watch key whose state changed; `id` orders the log.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ReleaseMessage {
    pub id: i64,
    pub message: String,
    pub created_at: time::PrimitiveDateTime,
}

impl ReleaseMessage {
    pub fn new(id: i64, message: impl Into<String>) -> Self {
        let now = time::OffsetDateTime::now_utc();
        Self {
            id,
            message: message.into(),
            created_at: time::PrimitiveDateTime::new(now.date(), now.time()),
        }
    }
}

/// Rows with `id > after_id`, ascending, at most `limit` of them.
#[derive(Debug, Clone, Copy)]
pub struct FindReleaseMessagesAfter {
    pub after_id: i64,
    pub limit: i64,
}

impl Processor<FindReleaseMessagesAfter> for DatabaseProcessor {
    type Output = Vec<ReleaseMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindReleaseMessagesAfter")]
    async fn process(
        &self,
        query: FindReleaseMessagesAfter,
    ) -> Result<Vec<ReleaseMessage>, sqlx::Error> {
        sqlx::query_as::<_, ReleaseMessage>(
            r#"
            SELECT id, message, created_at
            FROM release_message
            WHERE id > $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(query.after_id)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}

/// Latest row for each of `keys`, matched case-insensitively. Keys without
/// any row are absent from the result.
#[derive(Debug, Clone)]
pub struct FindLatestReleaseMessages {
    pub keys: Vec<String>,
}

impl Processor<FindLatestReleaseMessages> for DatabaseProcessor {
    type Output = Vec<ReleaseMessage>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindLatestReleaseMessages")]
    async fn process(
        &self,
        query: FindLatestReleaseMessages,
    ) -> Result<Vec<ReleaseMessage>, sqlx::Error> {
        if query.keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = query.keys.iter().map(|k| k.to_lowercase()).collect();
        sqlx::query_as::<_, ReleaseMessage>(
            r#"
            SELECT DISTINCT ON (lower(message)) id, message, created_at
            FROM release_message
            WHERE lower(message) = ANY($1)
            ORDER BY lower(message), id DESC
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await
    }
}
