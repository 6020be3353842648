//! In-process data client with the same query semantics as the Postgres backend.
//! Enforces unique columns and foreign keys (RESTRICT on delete). Used without a database and in tests.

use super::query::{check_fields, check_filter, check_object, check_query, effective_fields, Delete, Direction, Field, Filter, Insert, MutationResult, Query, Update};
use super::schema::{ColumnDef, ColumnDefault, ColumnType, RelationDef, RelationKind, Schema, TableDef, CREATED_AT, ID, UPDATED_AT};
use super::DataClient;
use crate::error::AppError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

type Row = Map<String, Value>;

#[derive(Clone, Debug, Default)]
struct MemTable {
    next_id: i64,
    /// Kept in id order.
    rows: Vec<Row>,
}

pub struct MemoryClient {
    schema: Schema,
    tables: Mutex<HashMap<String, MemTable>>,
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn row_id(row: &Row) -> Option<i64> {
    row.get(ID).and_then(Value::as_i64)
}

/// Normalize an input value to the representation stored for the column type.
fn coerce(col: &ColumnDef, v: &Value) -> Value {
    match (col.ty, v) {
        (ColumnType::BigInt | ColumnType::BigSerial, Value::String(s)) => {
            s.trim().parse::<i64>().map(Value::from).unwrap_or_else(|_| v.clone())
        }
        (ColumnType::Text, Value::Number(n)) => Value::String(n.to_string()),
        _ => v.clone(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// Total order used for sorting; NULL sorts after every value, as in Postgres ascending order.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// SQL LIKE matching with `%`, `_` and backslash escapes.
fn like_match(pattern: &str, text: &str, case_insensitive: bool) -> bool {
    enum Tok {
        Any,
        One,
        Lit(char),
    }
    let fold = |c: char| if case_insensitive { c.to_lowercase().next().unwrap_or(c) } else { c };
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '%' => Tok::Any,
            '_' => Tok::One,
            '\\' => Tok::Lit(fold(chars.next().unwrap_or('\\'))),
            c => Tok::Lit(fold(c)),
        });
    }
    let text: Vec<char> = text.chars().map(fold).collect();

    // dp[j]: toks[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for tok in &toks {
        let mut next = vec![false; text.len() + 1];
        match tok {
            Tok::Any => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            Tok::One => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            Tok::Lit(c) => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}

/// Read-only view over every table, used to evaluate filters and project relations.
struct View<'a> {
    schema: &'a Schema,
    tables: &'a HashMap<String, MemTable>,
}

impl<'a> View<'a> {
    fn rows(&self, table: &str) -> &'a [Row] {
        self.tables.get(table).map(|t| t.rows.as_slice()).unwrap_or(&[])
    }

    fn related_rows(&self, rel: &RelationDef, row: &Row) -> Vec<&'a Row> {
        match rel.kind {
            RelationKind::ToOne { column } => {
                let Some(fk) = row.get(column).filter(|v| !v.is_null()) else {
                    return Vec::new();
                };
                self.rows(rel.target)
                    .iter()
                    .filter(|r| r.get(ID).is_some_and(|id| values_equal(id, fk)))
                    .take(1)
                    .collect()
            }
            RelationKind::ToMany { foreign_column } => {
                let Some(id) = row.get(ID) else {
                    return Vec::new();
                };
                self.rows(rel.target)
                    .iter()
                    .filter(|r| r.get(foreign_column).is_some_and(|v| values_equal(v, id)))
                    .collect()
            }
        }
    }

    fn matches(&self, table: &TableDef, row: &Row, f: &Filter) -> Result<bool, AppError> {
        let cell = |c: &str| row.get(c).unwrap_or(&Value::Null);
        Ok(match f {
            Filter::Eq(c, v) => {
                let col = table.get_column(c)?;
                if v.is_null() {
                    cell(c).is_null()
                } else {
                    values_equal(cell(c), &coerce(col, v))
                }
            }
            Filter::In(c, values) => {
                let col = table.get_column(c)?;
                let actual = cell(c);
                !actual.is_null() && values.iter().any(|v| values_equal(actual, &coerce(col, v)))
            }
            Filter::Like(c, p) | Filter::ILike(c, p) => {
                table.get_column(c)?;
                let text = match cell(c) {
                    Value::Null => return Ok(false),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                like_match(p, &text, matches!(f, Filter::ILike(..)))
            }
            Filter::IsNull(c, is_null) => {
                table.get_column(c)?;
                cell(c).is_null() == *is_null
            }
            Filter::And(parts) => {
                for p in parts {
                    if !self.matches(table, row, p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Filter::Or(parts) => {
                for p in parts {
                    if self.matches(table, row, p)? {
                        return Ok(true);
                    }
                }
                false
            }
            Filter::Related { relation, filter } => {
                let rel = table.get_relation(relation)?;
                let target = self.schema.table(rel.target)?;
                for r in self.related_rows(rel, row) {
                    if self.matches(target, r, filter)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    fn select(&self, table: &TableDef, filter: Option<&Filter>) -> Result<Vec<&'a Row>, AppError> {
        let mut out = Vec::new();
        for r in self.rows(table.name) {
            let keep = match filter {
                Some(f) => self.matches(table, r, f)?,
                None => true,
            };
            if keep {
                out.push(r);
            }
        }
        Ok(out)
    }

    fn project(&self, table: &TableDef, row: &Row, fields: &[Field]) -> Result<Value, AppError> {
        let mut out = Map::new();
        for f in effective_fields(table, fields) {
            match f {
                Field::Column(c) => {
                    out.insert(c.clone(), row.get(&c).cloned().unwrap_or(Value::Null));
                }
                Field::Relation { name, fields } => {
                    let rel = table.get_relation(&name)?;
                    let target = self.schema.table(rel.target)?;
                    let related = self.related_rows(rel, row);
                    let v = match rel.kind {
                        RelationKind::ToOne { .. } => match related.first() {
                            Some(r) => self.project(target, r, &fields)?,
                            None => Value::Null,
                        },
                        RelationKind::ToMany { .. } => Value::Array(
                            related
                                .into_iter()
                                .map(|r| self.project(target, r, &fields))
                                .collect::<Result<Vec<_>, _>>()?,
                        ),
                    };
                    out.insert(name, v);
                }
            }
        }
        Ok(Value::Object(out))
    }
}

impl MemoryClient {
    pub fn new(schema: Schema) -> Self {
        let tables = schema
            .tables
            .iter()
            .map(|t| {
                (
                    t.name.to_string(),
                    MemTable {
                        next_id: 1,
                        rows: Vec::new(),
                    },
                )
            })
            .collect();
        MemoryClient {
            schema,
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemTable>>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("memory store lock poisoned".into()))
    }

    fn check_unique(table: &TableDef, rows: &[Row], candidate: &Row) -> Result<(), AppError> {
        let id = row_id(candidate);
        for c in table.columns.iter().filter(|c| c.unique) {
            let Some(v) = candidate.get(c.name).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = rows
                .iter()
                .filter(|r| row_id(r) != id)
                .any(|r| r.get(c.name).is_some_and(|o| values_equal(o, v)));
            if clash {
                return Err(AppError::Conflict("数据已存在".into()));
            }
        }
        Ok(())
    }

    fn check_foreign_keys(
        table: &TableDef,
        tables: &HashMap<String, MemTable>,
        pending: &[Row],
        candidate: &Row,
    ) -> Result<(), AppError> {
        for c in &table.columns {
            let (Some(target), Some(v)) = (c.references, candidate.get(c.name).filter(|v| !v.is_null())) else {
                continue;
            };
            let in_store = tables
                .get(target)
                .is_some_and(|t| t.rows.iter().any(|r| r.get(ID).is_some_and(|id| values_equal(id, v))));
            // Self references may point at rows of the same batch.
            let in_batch = target == table.name
                && pending.iter().any(|r| r.get(ID).is_some_and(|id| values_equal(id, v)));
            if !in_store && !in_batch {
                return Err(AppError::Conflict("存在关联数据，无法完成操作".into()));
            }
        }
        Ok(())
    }

    fn build_row(table: &TableDef, id: i64, object: &Map<String, Value>, now: &str) -> Result<Row, AppError> {
        let mut row = Row::new();
        for c in &table.columns {
            let v = if c.name == ID {
                Value::from(id)
            } else if c.name == CREATED_AT || c.name == UPDATED_AT {
                Value::String(now.to_string())
            } else if let Some(v) = object.get(c.name) {
                coerce(c, v)
            } else {
                match &c.default {
                    Some(ColumnDefault::Text(s)) => Value::String(s.to_string()),
                    Some(ColumnDefault::Int(n)) => Value::from(*n),
                    Some(ColumnDefault::EmptyArray) => Value::Array(Vec::new()),
                    Some(ColumnDefault::Now) => Value::String(now.to_string()),
                    None if c.nullable => Value::Null,
                    None => {
                        return Err(AppError::Query(format!(
                            "null value in column {}.{} violates not-null constraint",
                            table.name, c.name
                        )))
                    }
                }
            };
            if v.is_null() && !c.nullable {
                return Err(AppError::Query(format!(
                    "null value in column {}.{} violates not-null constraint",
                    table.name, c.name
                )));
            }
            row.insert(c.name.to_string(), v);
        }
        Ok(row)
    }
}

#[async_trait]
impl DataClient for MemoryClient {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn query(&self, q: &Query) -> Result<Vec<Value>, AppError> {
        check_query(&self.schema, q)?;
        let table = self.schema.table(&q.table)?;
        let guard = self.lock()?;
        let view = View {
            schema: &self.schema,
            tables: &*guard,
        };
        let mut rows = view.select(table, q.filter.as_ref())?;

        let tie = q.order_by.first().map(|o| o.direction).unwrap_or(Direction::Asc);
        rows.sort_by(|a, b| {
            for o in &q.order_by {
                let ord = compare_values(
                    a.get(&o.column).unwrap_or(&Value::Null),
                    b.get(&o.column).unwrap_or(&Value::Null),
                );
                let ord = if o.direction == Direction::Desc { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            let ord = row_id(a).cmp(&row_id(b));
            if tie == Direction::Desc {
                ord.reverse()
            } else {
                ord
            }
        });

        let offset = q.offset.unwrap_or(0) as usize;
        let limit = q.limit.map(|n| n as usize).unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|r| view.project(table, r, &q.fields))
            .collect()
    }

    async fn count(&self, table: &str, filter: Option<&Filter>) -> Result<u64, AppError> {
        let t = self.schema.table(table)?;
        if let Some(f) = filter {
            check_filter(&self.schema, t, f)?;
        }
        let guard = self.lock()?;
        let view = View {
            schema: &self.schema,
            tables: &*guard,
        };
        Ok(view.select(t, filter)?.len() as u64)
    }

    async fn insert(&self, m: &Insert) -> Result<MutationResult, AppError> {
        let table = self.schema.table(&m.table)?;
        check_fields(&self.schema, table, &m.returning)?;
        for o in &m.objects {
            check_object(table, o)?;
        }
        let mut guard = self.lock()?;
        let mut working = guard.get(table.name).cloned().unwrap_or_default();
        let now = now_string();
        let mut pending: Vec<Row> = Vec::with_capacity(m.objects.len());
        for o in &m.objects {
            let id = working.next_id.max(1);
            working.next_id = id + 1;
            let row = Self::build_row(table, id, o, &now)?;
            let mut existing = working.rows.clone();
            existing.extend(pending.iter().cloned());
            Self::check_unique(table, &existing, &row)?;
            pending.push(row);
        }
        for row in &pending {
            Self::check_foreign_keys(table, &guard, &pending, row)?;
        }
        let ids: HashSet<i64> = pending.iter().filter_map(row_id).collect();
        working.rows.extend(pending);
        guard.insert(table.name.to_string(), working);

        let view = View {
            schema: &self.schema,
            tables: &*guard,
        };
        let returning = view
            .rows(table.name)
            .iter()
            .filter(|r| row_id(r).is_some_and(|id| ids.contains(&id)))
            .map(|r| view.project(table, r, &m.returning))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MutationResult {
            affected_rows: returning.len() as u64,
            returning,
        })
    }

    async fn update(&self, m: &Update) -> Result<MutationResult, AppError> {
        let table = self.schema.table(&m.table)?;
        check_object(table, &m.set)?;
        check_filter(&self.schema, table, &m.filter)?;
        check_fields(&self.schema, table, &m.returning)?;
        let mut guard = self.lock()?;

        let ids: HashSet<i64> = {
            let view = View {
                schema: &self.schema,
                tables: &*guard,
            };
            view.select(table, Some(&m.filter))?.into_iter().filter_map(row_id).collect()
        };

        let mut working = guard.get(table.name).cloned().unwrap_or_default();
        let now = now_string();
        for row in working.rows.iter_mut().filter(|r| row_id(r).is_some_and(|id| ids.contains(&id))) {
            for c in &table.columns {
                if let Some(v) = m.set.get(c.name) {
                    let v = coerce(c, v);
                    if v.is_null() && !c.nullable {
                        return Err(AppError::Query(format!(
                            "null value in column {}.{} violates not-null constraint",
                            table.name, c.name
                        )));
                    }
                    row.insert(c.name.to_string(), v);
                }
            }
            row.insert(UPDATED_AT.to_string(), Value::String(now.clone()));
        }
        for row in working.rows.iter().filter(|r| row_id(r).is_some_and(|id| ids.contains(&id))) {
            Self::check_unique(table, &working.rows, row)?;
            Self::check_foreign_keys(table, &guard, &working.rows, row)?;
        }
        guard.insert(table.name.to_string(), working);

        let view = View {
            schema: &self.schema,
            tables: &*guard,
        };
        let returning = view
            .rows(table.name)
            .iter()
            .filter(|r| row_id(r).is_some_and(|id| ids.contains(&id)))
            .map(|r| view.project(table, r, &m.returning))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MutationResult {
            affected_rows: returning.len() as u64,
            returning,
        })
    }

    async fn delete(&self, m: &Delete) -> Result<MutationResult, AppError> {
        let table = self.schema.table(&m.table)?;
        check_filter(&self.schema, table, &m.filter)?;
        check_fields(&self.schema, table, &m.returning)?;
        let mut guard = self.lock()?;

        let (ids, returning) = {
            let view = View {
                schema: &self.schema,
                tables: &*guard,
            };
            let doomed = view.select(table, Some(&m.filter))?;
            let ids: HashSet<i64> = doomed.iter().filter_map(|r| row_id(r)).collect();
            let returning = doomed
                .into_iter()
                .map(|r| view.project(table, r, &m.returning))
                .collect::<Result<Vec<_>, _>>()?;
            (ids, returning)
        };

        for (holder, col) in self.schema.referencing(table.name) {
            let rows = guard.get(holder.name).map(|t| t.rows.as_slice()).unwrap_or(&[]);
            let still_referenced = rows.iter().any(|r| {
                let self_doomed = holder.name == table.name && row_id(r).is_some_and(|id| ids.contains(&id));
                !self_doomed
                    && r.get(col.name)
                        .and_then(Value::as_i64)
                        .is_some_and(|fk| ids.contains(&fk))
            });
            if still_referenced {
                return Err(AppError::Conflict("存在关联数据，无法完成操作".into()));
            }
        }

        if let Some(t) = guard.get_mut(table.name) {
            t.rows.retain(|r| !row_id(r).is_some_and(|id| ids.contains(&id)));
        }
        Ok(MutationResult {
            affected_rows: ids.len() as u64,
            returning,
        })
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::query::cols;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    async fn seeded() -> MemoryClient {
        let c = MemoryClient::new(Schema::campus());
        c.insert(&Insert::one("sites", obj(json!({"name": "Main"})))).await.unwrap();
        c.insert(&Insert::many(
            "users",
            vec![
                obj(json!({"mobile": "13800138000", "nickname": "alice", "current_site_site": 1})),
                obj(json!({"mobile": "13900139000", "nickname": "bob"})),
            ],
        ))
        .await
        .unwrap();
        c
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("%ru_t%", "I love rust!", false));
        assert!(!like_match("%RUST%", "rust", false));
        assert!(like_match("%RUST%", "rust", true));
        assert!(like_match("100\\%", "100%", false));
        assert!(!like_match("100\\%", "1000", false));
        assert!(like_match("%", "", false));
    }

    #[tokio::test]
    async fn insert_assigns_ids_defaults_and_timestamps() {
        let c = seeded().await;
        let rows = c.query(&Query::table("users").order_by("id", Direction::Asc)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));
        assert_eq!(rows[0]["role"], json!("user"));
        assert!(rows[0]["created_at"].is_string());
        assert!(rows[1]["current_site_site"].is_null());
    }

    #[tokio::test]
    async fn unique_and_foreign_keys_are_enforced() {
        let c = seeded().await;
        let dup = c.insert(&Insert::one("users", obj(json!({"mobile": "13800138000"})))).await;
        assert!(matches!(dup, Err(AppError::Conflict(_))));

        let dangling = c
            .insert(&Insert::one("posts", obj(json!({"content": "x", "author_user": 1, "site_site": 99}))))
            .await;
        assert!(matches!(dangling, Err(AppError::Conflict(_))));

        let in_use = c.delete(&Delete::new("sites", Filter::id(1))).await;
        assert!(matches!(in_use, Err(AppError::Conflict(_))));
        assert_eq!(c.count("sites", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_rows() {
        let c = seeded().await;
        let res = c
            .insert(&Insert::many(
                "topics",
                vec![obj(json!({"name": "a"})), obj(json!({"name": "a"}))],
            ))
            .await;
        assert!(res.is_err());
        assert_eq!(c.count("topics", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn relations_project_nested_rows() {
        let c = seeded().await;
        c.insert(&Insert::many("topics", vec![obj(json!({"name": "A"})), obj(json!({"name": "B"}))]))
            .await
            .unwrap();
        c.insert(&Insert::one("posts", obj(json!({"content": "hello", "author_user": 1, "site_site": 1}))))
            .await
            .unwrap();
        c.insert(&Insert::many(
            "post_topics",
            vec![
                obj(json!({"post_posts": 1, "topic_topics": 2})),
                obj(json!({"post_posts": 1, "topic_topics": 1})),
            ],
        ))
        .await
        .unwrap();

        let q = Query::table("posts")
            .filter(Filter::related("post_topics", Filter::eq("topic_topics", "2")))
            .fields(vec![
                Field::col("id"),
                Field::rel("author", cols(&["nickname"])),
                Field::rel("post_topics", vec![Field::rel("topic", cols(&["name"]))]),
            ]);
        let rows = c.query(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["author"], json!({"nickname": "alice"}));
        assert_eq!(
            rows[0]["post_topics"],
            json!([{"topic": {"name": "B"}}, {"topic": {"name": "A"}}])
        );
    }

    #[tokio::test]
    async fn update_refreshes_updated_at_and_reports_rows() {
        let c = seeded().await;
        let before = c.query_first(&Query::table("users").filter(Filter::id(2))).await.unwrap().unwrap();
        let res = c
            .update(
                &Update::new("users", Filter::eq("mobile", "13900139000"), obj(json!({"bio": "hi"})))
                    .returning(cols(&["id", "bio", "updated_at"])),
            )
            .await
            .unwrap();
        assert_eq!(res.affected_rows, 1);
        assert_eq!(res.returning[0]["bio"], json!("hi"));
        assert!(res.returning[0]["updated_at"].as_str() >= before["updated_at"].as_str());
    }

    #[tokio::test]
    async fn find_pages_and_counts() {
        let c = MemoryClient::new(Schema::campus());
        let topics = (1..=15).map(|i| obj(json!({"name": format!("t{i:02}")}))).collect();
        c.insert(&Insert::many("topics", topics)).await.unwrap();
        let page = c
            .find(&Query::table("topics").order_by("name", Direction::Asc), 2, 10)
            .await
            .unwrap();
        assert_eq!(page.aggregate.count, 15);
        assert_eq!(page.datas.len(), 5);
        assert_eq!(page.datas[0]["name"], json!("t11"));
    }

    #[tokio::test]
    async fn unreachable_pages_are_empty() {
        let c = MemoryClient::new(Schema::campus());
        c.insert(&Insert::one("topics", obj(json!({"name": "only"})))).await.unwrap();
        let page = c.find(&Query::table("topics"), u64::MAX, 100).await.unwrap();
        assert!(page.datas.is_empty());
        assert_eq!(page.aggregate.count, 1);
    }

    #[tokio::test]
    async fn self_referencing_rows_delete_together() {
        let c = seeded().await;
        c.insert(&Insert::one("posts", obj(json!({"content": "p", "author_user": 1, "site_site": 1}))))
            .await
            .unwrap();
        c.insert(&Insert::one("post_comments", obj(json!({"content": "root", "author_user": 1, "post_posts": 1}))))
            .await
            .unwrap();
        c.insert(&Insert::one(
            "post_comments",
            obj(json!({"content": "reply", "author_user": 2, "post_posts": 1, "parent_post_comments": 1})),
        ))
        .await
        .unwrap();

        let lone = c.delete(&Delete::new("post_comments", Filter::id(1))).await;
        assert!(matches!(lone, Err(AppError::Conflict(_))));

        let all = c.delete(&Delete::new("post_comments", Filter::eq("post_posts", 1))).await.unwrap();
        assert_eq!(all.affected_rows, 2);
    }
}
