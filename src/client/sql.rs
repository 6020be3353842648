//! Builds parameterized SELECT, COUNT, INSERT, UPDATE, DELETE from typed descriptors.
//! Identifiers come from the schema only; every value is a bound parameter with an explicit cast.

use super::query::{effective_fields, Delete, Field, Filter, Query, Update};
use super::schema::{ColumnDef, RelationDef, RelationKind, Schema, TableDef, ID, UPDATED_AT};
use crate::error::AppError;
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL.
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// Builder state shared across nested subqueries: one parameter list and a running alias counter.
struct Ctx<'a> {
    schema: &'a Schema,
    buf: QueryBuf,
    aliases: usize,
}

impl<'a> Ctx<'a> {
    fn new(schema: &'a Schema) -> Self {
        Ctx {
            schema,
            buf: QueryBuf::default(),
            aliases: 0,
        }
    }

    fn alias(&mut self) -> String {
        let a = format!("t{}", self.aliases);
        self.aliases += 1;
        a
    }

    fn placeholder(&mut self, col: &ColumnDef, v: &Value) -> String {
        let n = self.buf.push_param(v.clone());
        format!("${}::{}", n, col.ty.cast())
    }

    /// Correlation predicate between the owner row (`alias`) and the relation's target row (`sub`).
    fn join_condition(rel: &RelationDef, alias: &str, sub: &str) -> String {
        match rel.kind {
            RelationKind::ToOne { column } => format!("{}.{} = {}.{}", sub, quoted(ID), alias, quoted(column)),
            RelationKind::ToMany { foreign_column } => {
                format!("{}.{} = {}.{}", sub, quoted(foreign_column), alias, quoted(ID))
            }
        }
    }

    fn filter(&mut self, table: &TableDef, alias: &str, f: &Filter) -> Result<String, AppError> {
        Ok(match f {
            Filter::Eq(c, v) => {
                let col = table.get_column(c)?;
                if v.is_null() {
                    format!("{}.{} IS NULL", alias, quoted(c))
                } else {
                    let ph = self.placeholder(col, v);
                    format!("{}.{} = {}", alias, quoted(c), ph)
                }
            }
            Filter::In(c, values) => {
                let col = table.get_column(c)?;
                if values.is_empty() {
                    "FALSE".to_string()
                } else {
                    let phs: Vec<String> = values.iter().map(|v| self.placeholder(col, v)).collect();
                    format!("{}.{} IN ({})", alias, quoted(c), phs.join(", "))
                }
            }
            Filter::Like(c, pattern) | Filter::ILike(c, pattern) => {
                table.get_column(c)?;
                let n = self.buf.push_param(Value::String(pattern.clone()));
                let op = if matches!(f, Filter::Like(..)) { "LIKE" } else { "ILIKE" };
                format!("{}.{}::text {} ${}::text", alias, quoted(c), op, n)
            }
            Filter::IsNull(c, is_null) => {
                table.get_column(c)?;
                let not = if *is_null { "" } else { "NOT " };
                format!("{}.{} IS {}NULL", alias, quoted(c), not)
            }
            Filter::And(parts) | Filter::Or(parts) => {
                let is_and = matches!(f, Filter::And(_));
                if parts.is_empty() {
                    return Ok(if is_and { "TRUE" } else { "FALSE" }.to_string());
                }
                let mut out = Vec::with_capacity(parts.len());
                for p in parts {
                    out.push(self.filter(table, alias, p)?);
                }
                format!("({})", out.join(if is_and { " AND " } else { " OR " }))
            }
            Filter::Related { relation, filter } => {
                let rel = table.get_relation(relation)?;
                let target = self.schema.table(rel.target)?;
                let sub = self.alias();
                let inner = self.filter(target, &sub, filter)?;
                format!(
                    "EXISTS (SELECT 1 FROM {} AS {} WHERE {} AND {})",
                    quoted(target.name),
                    sub,
                    Self::join_condition(rel, alias, &sub),
                    inner
                )
            }
        })
    }

    /// SELECT list for `fields` of `table` read through `alias`. Relations become scalar subqueries.
    fn select_list(&mut self, table: &TableDef, alias: &str, fields: &[Field]) -> Result<String, AppError> {
        let fields = effective_fields(table, fields);
        let mut parts = Vec::with_capacity(fields.len());
        for f in &fields {
            match f {
                Field::Column(c) => {
                    table.get_column(c)?;
                    parts.push(format!("{}.{} AS {}", alias, quoted(c), quoted(c)));
                }
                Field::Relation { name, fields } => {
                    let rel = table.get_relation(name)?;
                    let sub = self.relation_subquery(rel, alias, fields)?;
                    parts.push(format!("{} AS {}", sub, quoted(name)));
                }
            }
        }
        Ok(parts.join(", "))
    }

    fn relation_subquery(&mut self, rel: &RelationDef, alias: &str, fields: &[Field]) -> Result<String, AppError> {
        let target = self.schema.table(rel.target)?;
        let sub = self.alias();
        let list = self.select_list(target, &sub, fields)?;
        let from = format!(
            "SELECT {} FROM {} AS {} WHERE {}",
            list,
            quoted(target.name),
            sub,
            Self::join_condition(rel, alias, &sub)
        );
        Ok(match rel.kind {
            RelationKind::ToOne { .. } => format!("(SELECT row_to_json(s_{sub}) FROM ({from}) s_{sub})"),
            RelationKind::ToMany { .. } => format!(
                "(SELECT COALESCE(json_agg(row_to_json(s_{sub})), '[]'::json) FROM ({from} ORDER BY {sub}.{id}) s_{sub})",
                id = quoted(ID)
            ),
        })
    }
}

/// SELECT with filter, ordering (id as final tie-break), limit and offset.
pub fn select(schema: &Schema, q: &Query) -> Result<QueryBuf, AppError> {
    let table = schema.table(&q.table)?;
    let mut ctx = Ctx::new(schema);
    let alias = ctx.alias();
    let list = ctx.select_list(table, &alias, &q.fields)?;
    let where_clause = match &q.filter {
        Some(f) => format!(" WHERE {}", ctx.filter(table, &alias, f)?),
        None => String::new(),
    };

    let mut order = Vec::new();
    for o in &q.order_by {
        table.get_column(&o.column)?;
        order.push(format!("{}.{} {}", alias, quoted(&o.column), o.direction.sql()));
    }
    if !q.order_by.iter().any(|o| o.column == ID) {
        let dir = q.order_by.first().map(|o| o.direction.sql()).unwrap_or("ASC");
        order.push(format!("{}.{} {}", alias, quoted(ID), dir));
    }
    let limit_clause = q.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = q.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();

    ctx.buf.sql = format!(
        "SELECT {} FROM {} AS {}{} ORDER BY {}{}{}",
        list,
        quoted(table.name),
        alias,
        where_clause,
        order.join(", "),
        limit_clause,
        offset_clause
    );
    Ok(ctx.buf)
}

pub fn count(schema: &Schema, table: &str, filter: Option<&Filter>) -> Result<QueryBuf, AppError> {
    let table = schema.table(table)?;
    let mut ctx = Ctx::new(schema);
    let alias = ctx.alias();
    let where_clause = match filter {
        Some(f) => format!(" WHERE {}", ctx.filter(table, &alias, f)?),
        None => String::new(),
    };
    ctx.buf.sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {} AS {}{}",
        quoted(table.name),
        alias,
        where_clause
    );
    Ok(ctx.buf)
}

/// INSERT one row. Columns follow table order; omitted columns take their DB default.
pub fn insert(
    schema: &Schema,
    table: &str,
    object: &Map<String, Value>,
    returning: &[Field],
) -> Result<QueryBuf, AppError> {
    let table = schema.table(table)?;
    let mut ctx = Ctx::new(schema);
    let alias = ctx.alias();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &table.columns {
        if let Some(v) = object.get(c.name) {
            cols.push(quoted(c.name));
            placeholders.push(ctx.placeholder(c, v));
        }
    }
    let values = if cols.is_empty() {
        " DEFAULT VALUES".to_string()
    } else {
        format!(" ({}) VALUES ({})", cols.join(", "), placeholders.join(", "))
    };
    let list = ctx.select_list(table, &alias, returning)?;
    ctx.buf.sql = format!(
        "INSERT INTO {} AS {}{} RETURNING {}",
        quoted(table.name),
        alias,
        values,
        list
    );
    Ok(ctx.buf)
}

/// UPDATE rows matching the filter; `updated_at` is always refreshed.
pub fn update(schema: &Schema, u: &Update) -> Result<QueryBuf, AppError> {
    let table = schema.table(&u.table)?;
    let mut ctx = Ctx::new(schema);
    let alias = ctx.alias();
    let mut sets = Vec::new();
    for c in &table.columns {
        if c.name == UPDATED_AT {
            continue;
        }
        if let Some(v) = u.set.get(c.name) {
            let ph = ctx.placeholder(c, v);
            sets.push(format!("{} = {}", quoted(c.name), ph));
        }
    }
    sets.push(format!("{} = NOW()", quoted(UPDATED_AT)));
    let where_clause = ctx.filter(table, &alias, &u.filter)?;
    let list = ctx.select_list(table, &alias, &u.returning)?;
    ctx.buf.sql = format!(
        "UPDATE {} AS {} SET {} WHERE {} RETURNING {}",
        quoted(table.name),
        alias,
        sets.join(", "),
        where_clause,
        list
    );
    Ok(ctx.buf)
}

pub fn delete(schema: &Schema, d: &Delete) -> Result<QueryBuf, AppError> {
    let table = schema.table(&d.table)?;
    let mut ctx = Ctx::new(schema);
    let alias = ctx.alias();
    let where_clause = ctx.filter(table, &alias, &d.filter)?;
    let list = ctx.select_list(table, &alias, &d.returning)?;
    ctx.buf.sql = format!(
        "DELETE FROM {} AS {} WHERE {} RETURNING {}",
        quoted(table.name),
        alias,
        where_clause,
        list
    );
    Ok(ctx.buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::query::{cols, Direction};
    use serde_json::json;

    #[test]
    fn select_with_filters_order_and_paging() {
        let schema = Schema::campus();
        let q = Query::table("users")
            .filter(Filter::And(vec![Filter::eq("mobile", "13800138000"), Filter::IsNull("password".to_string(), false)]))
            .order_by("created_at", Direction::Desc)
            .limit(10)
            .offset(20)
            .fields(cols(&["id", "mobile"]));
        let buf = select(&schema, &q).unwrap();
        assert_eq!(
            buf.sql,
            "SELECT t0.\"id\" AS \"id\", t0.\"mobile\" AS \"mobile\" FROM \"users\" AS t0 \
             WHERE (t0.\"mobile\" = $1::text AND t0.\"password\" IS NOT NULL) \
             ORDER BY t0.\"created_at\" DESC, t0.\"id\" DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(buf.params, vec![json!("13800138000")]);
    }

    #[test]
    fn relations_render_as_correlated_subqueries() {
        let schema = Schema::campus();
        let q = Query::table("posts").fields(vec![
            Field::col("id"),
            Field::rel("author", cols(&["id", "nickname"])),
            Field::rel("post_topics", vec![Field::col("id"), Field::rel("topic", cols(&["name"]))]),
        ]);
        let buf = select(&schema, &q).unwrap();
        assert!(buf.sql.contains(
            "(SELECT row_to_json(s_t1) FROM (SELECT t1.\"id\" AS \"id\", t1.\"nickname\" AS \"nickname\" \
             FROM \"users\" AS t1 WHERE t1.\"id\" = t0.\"author_user\") s_t1) AS \"author\""
        ));
        assert!(buf.sql.contains("COALESCE(json_agg(row_to_json(s_t2)), '[]'::json)"));
        assert!(buf.sql.contains("WHERE t2.\"post_posts\" = t0.\"id\" ORDER BY t2.\"id\""));
        assert!(buf.sql.contains("WHERE t3.\"id\" = t2.\"topic_topics\""));
        assert!(buf.params.is_empty());
    }

    #[test]
    fn related_filter_becomes_exists() {
        let schema = Schema::campus();
        let q = Query::table("posts")
            .filter(Filter::related("post_topics", Filter::eq("topic_topics", 7)))
            .fields(cols(&["id"]));
        let buf = select(&schema, &q).unwrap();
        assert!(buf.sql.contains(
            "WHERE EXISTS (SELECT 1 FROM \"post_topics\" AS t1 WHERE t1.\"post_posts\" = t0.\"id\" AND t1.\"topic_topics\" = $1::bigint)"
        ));
        assert_eq!(buf.params, vec![json!(7)]);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let schema = Schema::campus();
        let buf = count(&schema, "topics", Some(&Filter::any_of("name", vec![]))).unwrap();
        assert_eq!(buf.sql, "SELECT COUNT(*) AS \"count\" FROM \"topics\" AS t0 WHERE FALSE");
    }

    #[test]
    fn insert_update_delete_shapes() {
        let schema = Schema::campus();
        let mut obj = Map::new();
        obj.insert("name".into(), json!("rust"));
        let ins = insert(&schema, "topics", &obj, &cols(&["id"])).unwrap();
        assert_eq!(
            ins.sql,
            "INSERT INTO \"topics\" AS t0 (\"name\") VALUES ($1::text) RETURNING t0.\"id\" AS \"id\""
        );

        let upd = update(&schema, &Update::new("topics", Filter::id(3), obj).returning(cols(&["id"]))).unwrap();
        assert_eq!(
            upd.sql,
            "UPDATE \"topics\" AS t0 SET \"name\" = $1::text, \"updated_at\" = NOW() WHERE t0.\"id\" = $2::bigint RETURNING t0.\"id\" AS \"id\""
        );
        assert_eq!(upd.params, vec![json!("rust"), json!(3)]);

        let del = delete(&schema, &Delete::new("post_topics", Filter::eq("post_posts", 9)).returning(cols(&["id"]))).unwrap();
        assert_eq!(
            del.sql,
            "DELETE FROM \"post_topics\" AS t0 WHERE t0.\"post_posts\" = $1::bigint RETURNING t0.\"id\" AS \"id\""
        );
    }

    #[test]
    fn null_equality_uses_is_null() {
        let schema = Schema::campus();
        let buf = count(&schema, "post_comments", Some(&Filter::eq("parent_post_comments", Value::Null))).unwrap();
        assert!(buf.sql.ends_with("WHERE t0.\"parent_post_comments\" IS NULL"));
        assert!(buf.params.is_empty());
    }
}
