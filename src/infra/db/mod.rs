//! Postgres-backed document store.

mod documents;
mod util;

pub use util::map_sqlx_error;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::{
    Postgres, QueryBuilder,
    postgres::{PgPool, PgPoolOptions},
    query,
    types::Json,
};

use crate::application::query::{CompareOp, FieldPath, Predicate, SortDirection, SortKey};
use crate::application::repos::RepoError;

/// Documents live in one JSONB table keyed by `(collection, id)`.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    fn path_bind(field: &FieldPath) -> Vec<String> {
        field.segments().map(str::to_string).collect()
    }

    fn push_path<'q>(qb: &mut QueryBuilder<'q, Postgres>, segments: Vec<String>) {
        qb.push("(doc #> ");
        qb.push_bind(segments);
        qb.push("::text[])");
    }

    /// Numeric view of a path: the float value, or NULL for anything else.
    fn push_number<'q>(qb: &mut QueryBuilder<'q, Postgres>, segments: Vec<String>) {
        qb.push("(CASE WHEN jsonb_typeof(doc #> ");
        qb.push_bind(segments.clone());
        qb.push("::text[]) = 'number' THEN (doc #>> ");
        qb.push_bind(segments);
        qb.push("::text[])::float8 END)");
    }

    fn push_predicates<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &[Predicate]) {
        for predicate in filter {
            let path = Self::path_bind(&predicate.field);
            let value = Json(predicate.value.clone());
            qb.push(" AND ");
            match predicate.op {
                CompareOp::Eq => {
                    qb.push("(");
                    Self::push_path(qb, path.clone());
                    qb.push(" = ");
                    qb.push_bind(value.clone());
                    qb.push("::jsonb OR (jsonb_typeof(doc #> ");
                    qb.push_bind(path.clone());
                    qb.push("::text[]) = 'array' AND ");
                    Self::push_path(qb, path);
                    qb.push(" @> jsonb_build_array(");
                    qb.push_bind(value);
                    qb.push("::jsonb)))");
                }
                CompareOp::Ne => {
                    Self::push_path(qb, path);
                    qb.push(" IS DISTINCT FROM ");
                    qb.push_bind(value);
                    qb.push("::jsonb");
                }
                op => {
                    // Cross-type comparisons never match.
                    qb.push("(jsonb_typeof(doc #> ");
                    qb.push_bind(path.clone());
                    qb.push("::text[]) = jsonb_typeof(");
                    qb.push_bind(value.clone());
                    qb.push("::jsonb) AND ");
                    Self::push_path(qb, path);
                    qb.push(" ");
                    qb.push(op.sql());
                    qb.push(" ");
                    qb.push_bind(value);
                    qb.push("::jsonb)");
                }
            }
        }
    }

    fn push_order<'q>(qb: &mut QueryBuilder<'q, Postgres>, sort: &[SortKey]) {
        if sort.is_empty() {
            qb.push(" ORDER BY created_at, id");
            return;
        }
        qb.push(" ORDER BY ");
        let mut separated = false;
        for key in sort {
            if separated {
                qb.push(", ");
            }
            separated = true;
            Self::push_path(qb, Self::path_bind(&key.field));
            qb.push(match key.direction {
                SortDirection::Asc => " ASC NULLS FIRST",
                SortDirection::Desc => " DESC NULLS LAST",
            });
        }
    }

    fn convert_count(value: i64) -> Result<u64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
    }

    fn convert_offset(value: u64) -> Result<i64, RepoError> {
        value
            .try_into()
            .map_err(|_| RepoError::InvalidInput {
                message: "offset exceeds supported range".to_string(),
            })
    }

    fn with_id(id: uuid::Uuid, doc: Value) -> Result<Value, RepoError> {
        match doc {
            Value::Object(mut map) => {
                map.insert("id".to_string(), Value::String(id.to_string()));
                Ok(Value::Object(map))
            }
            _ => Err(RepoError::InvalidInput {
                message: "documents must be JSON objects".to_string(),
            }),
        }
    }
}
