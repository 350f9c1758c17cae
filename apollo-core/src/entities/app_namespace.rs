use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// Namespace metadata: which app owns a namespace and whether other apps
/// may inherit it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AppNamespace {
    pub id: i64,
    pub app_id: String,
    pub name: String,
    pub format: String,
    pub is_public: bool,
}

impl AppNamespace {
    pub fn new(id: i64, app_id: impl Into<String>, name: impl Into<String>, is_public: bool) -> Self {
        Self {
            id,
            app_id: app_id.into(),
            name: name.into(),
            format: "properties".to_string(),
            is_public,
        }
    }
}

/// Live (not deleted) rows with `id > after_id`, ascending.
#[derive(Debug, Clone, Copy)]
pub struct FindAppNamespacesAfter {
    pub after_id: i64,
    pub limit: i64,
}

impl Processor<FindAppNamespacesAfter> for DatabaseProcessor {
    type Output = Vec<AppNamespace>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FindAppNamespacesAfter")]
    async fn process(&self, query: FindAppNamespacesAfter) -> Result<Vec<AppNamespace>, sqlx::Error> {
        sqlx::query_as::<_, AppNamespace>(
            r#"
            SELECT id, app_id, name, format, is_public
            FROM app_namespace
            WHERE id > $1 AND NOT is_deleted
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
