//! PostgreSQL data client.

use super::params::PgBindValue;
use super::query::{check_fields, check_filter, check_object, check_query, Delete, Filter, Insert, MutationResult, Query, Update};
use super::schema::Schema;
use super::sql::{self, QueryBuf};
use super::DataClient;
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::PgPool;

pub struct PgClient {
    pool: PgPool,
    schema: Schema,
}

impl PgClient {
    pub fn new(pool: PgPool, schema: Schema) -> Self {
        PgClient { pool, schema }
    }

    /// Connect a pool of at most `max_connections`.
    pub async fn connect(url: &str, max_connections: u32, schema: Schema) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(AppError::Db)?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_all<'c, E>(executor: E, q: &QueryBuf) -> Result<Vec<Value>, AppError>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from(p));
        }
        let rows = query.fetch_all(executor).await.map_err(AppError::from_db)?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl DataClient for PgClient {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn query(&self, q: &Query) -> Result<Vec<Value>, AppError> {
        check_query(&self.schema, q)?;
        let buf = sql::select(&self.schema, q)?;
        Self::fetch_all(&self.pool, &buf).await
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> Result<u64, AppError> {
        let t = self.schema.table(table)?;
        if let Some(f) = filter {
            check_filter(&self.schema, t, f)?;
        }
        let buf = sql::count(&self.schema, table, filter)?;
        let rows = Self::fetch_all(&self.pool, &buf).await?;
        let n = rows
            .first()
            .and_then(|r| r.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(n)
    }

    async fn insert(&self, m: &Insert) -> Result<MutationResult, AppError> {
        let t = self.schema.table(&m.table)?;
        check_fields(&self.schema, t, &m.returning)?;
        for o in &m.objects {
            check_object(t, o)?;
        }
        let mut out = MutationResult::default();
        let mut tx = self.pool.begin().await.map_err(AppError::Db)?;
        for o in &m.objects {
            let buf = sql::insert(&self.schema, &m.table, o, &m.returning)?;
            let rows = Self::fetch_all(&mut *tx, &buf).await?;
            out.affected_rows += rows.len() as u64;
            out.returning.extend(rows);
        }
        tx.commit().await.map_err(AppError::Db)?;
        Ok(out)
    }

    async fn update(&self, m: &Update) -> Result<MutationResult, AppError> {
        let t = self.schema.table(&m.table)?;
        check_object(t, &m.set)?;
        check_filter(&self.schema, t, &m.filter)?;
        check_fields(&self.schema, t, &m.returning)?;
        let buf = sql::update(&self.schema, m)?;
        let rows = Self::fetch_all(&self.pool, &buf).await?;
        Ok(MutationResult {
            affected_rows: rows.len() as u64,
            returning: rows,
        })
    }

    async fn delete(&self, m: &Delete) -> Result<MutationResult, AppError> {
        let t = self.schema.table(&m.table)?;
        check_filter(&self.schema, t, &m.filter)?;
        check_fields(&self.schema, t, &m.returning)?;
        let buf = sql::delete(&self.schema, m)?;
        let rows = Self::fetch_all(&self.pool, &buf).await?;
        Ok(MutationResult {
            affected_rows: rows.len() as u64,
            returning: rows,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(AppError::Db)?;
        Ok(())
    }
}

fn row_to_json(row: &PgRow) -> Value {
    use sqlx::Column;
    use sqlx::Row;
    let mut map = serde_json::Map::new();
    for col in row.columns() {
        let name = col.name();
        map.insert(name.to_string(), cell_to_value(row, name));
    }
    Value::Object(map)
}

fn cell_to_value(row: &PgRow, name: &str) -> Value {
    use sqlx::Row;
    if let Ok(Some(n)) = row.try_get::<Option<i64>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<i32>, _>(name) {
        return Value::Number(n.into());
    }
    if let Ok(Some(n)) = row.try_get::<Option<f64>, _>(name) {
        if let Some(n) = serde_json::Number::from_f64(n) {
            return Value::Number(n);
        }
    }
    if let Ok(Some(b)) = row.try_get::<Option<bool>, _>(name) {
        return Value::Bool(b);
    }
    if let Ok(Some(d)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(d.to_rfc3339_opts(chrono::SecondsFormat::Micros, true));
    }
    if let Ok(Some(s)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(s);
    }
    if let Ok(Some(j)) = row.try_get::<Option<Value>, _>(name) {
        return j;
    }
    Value::Null
}
