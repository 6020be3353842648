//! Data client adapter: typed queries and mutations over the relational model.

pub mod memory;
pub mod params;
pub mod pg;
pub mod query;
pub mod schema;
pub mod sql;

pub use memory::MemoryClient;
pub use pg::PgClient;
pub use query::{cols, Aggregate, Delete, Direction, Field, Filter, Insert, MutationResult, Paged, Query, Update};
pub use schema::Schema;

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait DataClient: Send + Sync {
    fn schema(&self) -> &Schema;

    /// Rows matching the query, shaped by its fields.
    async fn query(&self, q: &Query) -> Result<Vec<Value>, AppError>;

    async fn count(&self, table: &str, filter: Option<&Filter>) -> Result<u64, AppError>;

    async fn insert(&self, m: &Insert) -> Result<MutationResult, AppError>;

    /// Apply `set` to every matching row; `updated_at` is refreshed.
    async fn update(&self, m: &Update) -> Result<MutationResult, AppError>;

    async fn delete(&self, m: &Delete) -> Result<MutationResult, AppError>;

    async fn ping(&self) -> Result<(), AppError>;

    async fn query_first(&self, q: &Query) -> Result<Option<Value>, AppError> {
        let q = q.clone().limit(1);
        Ok(self.query(&q).await?.into_iter().next())
    }

    /// One page (1-indexed) plus the total count of matching rows.
    async fn find(&self, q: &Query, page_number: u64, page_size: u64) -> Result<Paged, AppError> {
        let page_number = page_number.max(1);
        // Offsets past bigint range cannot address any row; such pages are empty.
        let offset = (page_number - 1)
            .checked_mul(page_size)
            .filter(|n| *n <= i64::MAX as u64);
        let datas = match offset {
            Some(n) => self.query(&q.clone().limit(page_size).offset(n)).await?,
            None => Vec::new(),
        };
        let count = self.count(&q.table, q.filter.as_ref()).await?;
        Ok(Paged {
            datas,
            aggregate: Aggregate { count },
        })
    }
}
