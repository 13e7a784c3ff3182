use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Postgres, QueryBuilder, Row, types::Json};
use uuid::Uuid;

use crate::application::query::{Predicate, StoreQuery};
use crate::application::repos::{
    DocumentStore, FieldSummary, GeoHit, GeoQuery, GroupQuery, GroupSummary, RepoError,
};

use super::{PostgresDocumentStore, map_sqlx_error};

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn find_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        let row: Option<Json<Value>> =
            sqlx::query_scalar("SELECT doc FROM documents WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(self.pool())
                .await
                .map_err(map_sqlx_error)?;
        Ok(row.map(|Json(doc)| doc))
    }

    async fn find_many(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<Value>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT doc FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        Self::push_predicates(&mut qb, &query.filter);
        Self::push_order(&mut qb, &query.sort);
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ");
            qb.push_bind(Self::convert_offset(limit)?);
        }
        if query.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(Self::convert_offset(query.skip)?);
        }

        let rows: Vec<Json<Value>> = qb
            .build_query_scalar()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(|Json(doc)| doc).collect())
    }

    async fn count(&self, collection: &str, filter: &[Predicate]) -> Result<u64, RepoError> {
        let mut qb =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        Self::push_predicates(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Self::convert_count(count)
    }

    async fn insert(&self, collection: &str, id: Uuid, doc: Value) -> Result<Value, RepoError> {
        let doc = Self::with_id(id, doc)?;
        let Json(stored): Json<Value> = sqlx::query_scalar(
            "INSERT INTO documents (collection, id, doc) VALUES ($1, $2, $3) RETURNING doc",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(doc))
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(stored)
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: Uuid,
        changes: Map<String, Value>,
    ) -> Result<Option<Value>, RepoError> {
        let changes = Self::with_id(id, Value::Object(changes))?;
        let row: Option<Json<Value>> = sqlx::query_scalar(
            "UPDATE documents \
             SET doc = doc || $3, version = version + 1, updated_at = now() \
             WHERE collection = $1 AND id = $2 \
             RETURNING doc",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(changes))
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|Json(doc)| doc))
    }

    async fn delete_by_id(&self, collection: &str, id: Uuid) -> Result<Option<Value>, RepoError> {
        let row: Option<Json<Value>> = sqlx::query_scalar(
            "DELETE FROM documents WHERE collection = $1 AND id = $2 RETURNING doc",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|Json(doc)| doc))
    }

    async fn summarize(
        &self,
        collection: &str,
        query: &GroupQuery,
    ) -> Result<Vec<GroupSummary>, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        match &query.group_by {
            Some(field) => Self::push_path(&mut qb, Self::path_bind(field)),
            None => {
                qb.push("NULL::jsonb");
            }
        }
        qb.push(" AS group_key, COUNT(*) AS group_count");
        for field in &query.fields {
            let path = Self::path_bind(field);
            qb.push(", COUNT(");
            Self::push_number(&mut qb, path.clone());
            qb.push("), COALESCE(SUM(");
            Self::push_number(&mut qb, path.clone());
            qb.push("), 0), AVG(");
            Self::push_number(&mut qb, path.clone());
            qb.push("), MIN(");
            Self::push_number(&mut qb, path.clone());
            qb.push("), MAX(");
            Self::push_number(&mut qb, path);
            qb.push(")");
        }
        qb.push(" FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        Self::push_predicates(&mut qb, &query.filter);
        qb.push(" GROUP BY 1");

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                let key: Option<Json<Value>> = row.try_get(0).map_err(map_sqlx_error)?;
                let count: i64 = row.try_get(1).map_err(map_sqlx_error)?;
                let mut summary = GroupSummary {
                    key: query.group_by.as_ref().map(|_| {
                        key.map(|Json(value)| value).unwrap_or(Value::Null)
                    }),
                    count: Self::convert_count(count)?,
                    fields: Default::default(),
                };
                for (index, field) in query.fields.iter().enumerate() {
                    let base = 2 + index * 5;
                    let values: i64 = row.try_get(base).map_err(map_sqlx_error)?;
                    summary.fields.insert(
                        field.to_string(),
                        FieldSummary {
                            count: Self::convert_count(values)?,
                            sum: row.try_get(base + 1).map_err(map_sqlx_error)?,
                            avg: row.try_get(base + 2).map_err(map_sqlx_error)?,
                            min: row.try_get(base + 3).map_err(map_sqlx_error)?,
                            max: row.try_get(base + 4).map_err(map_sqlx_error)?,
                        },
                    );
                }
                Ok(summary)
            })
            .collect()
    }

    async fn geo_near(&self, collection: &str, query: &GeoQuery) -> Result<Vec<GeoHit>, RepoError> {
        let mut lng_path = Self::path_bind(&query.field);
        lng_path.extend(["coordinates".to_string(), "0".to_string()]);
        let mut lat_path = Self::path_bind(&query.field);
        lat_path.extend(["coordinates".to_string(), "1".to_string()]);
        let [center_lng, center_lat] = query.center;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT doc, angle FROM (SELECT doc, \
             2 * asin(least(1.0, sqrt(\
             power(sin(radians(lat - ",
        );
        qb.push_bind(center_lat);
        qb.push(") / 2), 2) + cos(radians(");
        qb.push_bind(center_lat);
        qb.push(")) * cos(radians(lat)) * power(sin(radians(lng - ");
        qb.push_bind(center_lng);
        qb.push(") / 2), 2)))) AS angle FROM (SELECT doc, ");
        Self::push_number(&mut qb, lng_path);
        qb.push(" AS lng, ");
        Self::push_number(&mut qb, lat_path);
        qb.push(" AS lat FROM documents WHERE collection = ");
        qb.push_bind(collection.to_string());
        Self::push_predicates(&mut qb, &query.filter);
        qb.push(") points WHERE lng IS NOT NULL AND lat IS NOT NULL) hits");
        if let Some(max_angle) = query.max_angle {
            qb.push(" WHERE angle <= ");
            qb.push_bind(max_angle);
        }
        qb.push(" ORDER BY angle");

        let rows = qb
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        rows.into_iter()
            .map(|row| {
                let Json(doc): Json<Value> = row.try_get("doc").map_err(map_sqlx_error)?;
                let angle: f64 = row.try_get("angle").map_err(map_sqlx_error)?;
                Ok(GeoHit { doc, angle })
            })
            .collect()
    }

    async fn purge(&self, collection: &str) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1")
            .bind(collection)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
