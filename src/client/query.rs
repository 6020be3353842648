//! Typed query and mutation descriptors accepted by every data client backend.

use super::schema::{Schema, TableDef, CREATED_AT, ID, UPDATED_AT};
use crate::error::AppError;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// SQL LIKE pattern (`%`, `_`, backslash escape).
    Like(String, String),
    ILike(String, String),
    /// `true` matches NULL, `false` matches NOT NULL.
    IsNull(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// At least one row reachable through `relation` matches `filter`.
    Related { relation: String, filter: Box<Filter> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn id(id: i64) -> Self {
        Filter::eq(ID, id)
    }

    pub fn any_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In(column.into(), values)
    }

    pub fn ilike(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Filter::ILike(column.into(), pattern.into())
    }

    pub fn related(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::Related {
            relation: relation.into(),
            filter: Box::new(filter),
        }
    }

    /// Combine optional conjuncts; `None` when nothing is left.
    pub fn all(parts: Vec<Filter>) -> Option<Filter> {
        match parts.len() {
            0 => None,
            1 => parts.into_iter().next(),
            _ => Some(Filter::And(parts)),
        }
    }
}

/// Escape `%`, `_` and `\` so user input matches literally inside a LIKE pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `%input%` with the input escaped.
pub fn contains_pattern(s: &str) -> String {
    format!("%{}%", escape_like(s))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Selected output: a column, or a relation rendered with its own nested fields.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Column(String),
    Relation { name: String, fields: Vec<Field> },
}

impl Field {
    pub fn col(name: impl Into<String>) -> Self {
        Field::Column(name.into())
    }

    pub fn rel(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Field::Relation {
            name: name.into(),
            fields,
        }
    }
}

/// Column fields from a list of names.
pub fn cols(names: &[&str]) -> Vec<Field> {
    names.iter().map(|n| Field::col(*n)).collect()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Empty selects every column of the table.
    pub fields: Vec<Field>,
}

impl Query {
    pub fn table(name: impl Into<String>) -> Self {
        Query {
            table: name.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            fields: Vec::new(),
        }
    }

    pub fn filter(mut self, f: Filter) -> Self {
        self.filter = Some(f);
        self
    }

    pub fn maybe_filter(mut self, f: Option<Filter>) -> Self {
        self.filter = f;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn fields(mut self, fields: Vec<Field>) -> Self {
        self.fields = fields;
        self
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Aggregate {
    pub count: u64,
}

/// Paged result: one page of rows plus the total matching count.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Paged {
    pub datas: Vec<Value>,
    pub aggregate: Aggregate,
}

#[derive(Clone, Debug)]
pub struct Insert {
    pub table: String,
    pub objects: Vec<Map<String, Value>>,
    pub returning: Vec<Field>,
}

impl Insert {
    pub fn one(table: impl Into<String>, object: Map<String, Value>) -> Self {
        Insert {
            table: table.into(),
            objects: vec![object],
            returning: Vec::new(),
        }
    }

    pub fn many(table: impl Into<String>, objects: Vec<Map<String, Value>>) -> Self {
        Insert {
            table: table.into(),
            objects,
            returning: Vec::new(),
        }
    }

    pub fn returning(mut self, fields: Vec<Field>) -> Self {
        self.returning = fields;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Update {
    pub table: String,
    pub filter: Filter,
    pub set: Map<String, Value>,
    pub returning: Vec<Field>,
}

impl Update {
    pub fn new(table: impl Into<String>, filter: Filter, set: Map<String, Value>) -> Self {
        Update {
            table: table.into(),
            filter,
            set,
            returning: Vec::new(),
        }
    }

    pub fn returning(mut self, fields: Vec<Field>) -> Self {
        self.returning = fields;
        self
    }
}

#[derive(Clone, Debug)]
pub struct Delete {
    pub table: String,
    pub filter: Filter,
    pub returning: Vec<Field>,
}

impl Delete {
    pub fn new(table: impl Into<String>, filter: Filter) -> Self {
        Delete {
            table: table.into(),
            filter,
            returning: Vec::new(),
        }
    }

    pub fn returning(mut self, fields: Vec<Field>) -> Self {
        self.returning = fields;
        self
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct MutationResult {
    pub affected_rows: u64,
    pub returning: Vec<Value>,
}

impl MutationResult {
    pub fn first(self) -> Option<Value> {
        self.returning.into_iter().next()
    }
}

pub fn check_filter(schema: &Schema, table: &TableDef, filter: &Filter) -> Result<(), AppError> {
    match filter {
        Filter::Eq(c, _) | Filter::In(c, _) | Filter::Like(c, _) | Filter::ILike(c, _) | Filter::IsNull(c, _) => {
            table.get_column(c).map(|_| ())
        }
        Filter::And(parts) | Filter::Or(parts) => parts.iter().try_for_each(|f| check_filter(schema, table, f)),
        Filter::Related { relation, filter } => {
            let rel = table.get_relation(relation)?;
            check_filter(schema, schema.table(rel.target)?, filter)
        }
    }
}

pub fn check_fields(schema: &Schema, table: &TableDef, fields: &[Field]) -> Result<(), AppError> {
    for f in fields {
        match f {
            Field::Column(c) => {
                table.get_column(c)?;
            }
            Field::Relation { name, fields } => {
                let rel = table.get_relation(name)?;
                check_fields(schema, schema.table(rel.target)?, fields)?;
            }
        }
    }
    Ok(())
}

/// Reject unknown tables, columns and relations before a query reaches a backend.
pub fn check_query(schema: &Schema, q: &Query) -> Result<(), AppError> {
    let table = schema.table(&q.table)?;
    if let Some(f) = &q.filter {
        check_filter(schema, table, f)?;
    }
    for o in &q.order_by {
        table.get_column(&o.column)?;
    }
    check_fields(schema, table, &q.fields)
}

/// Writable columns only: identity and timestamps are managed by the backend.
pub fn check_object(table: &TableDef, object: &Map<String, Value>) -> Result<(), AppError> {
    for key in object.keys() {
        if key == ID || key == CREATED_AT || key == UPDATED_AT {
            return Err(AppError::Query(format!("column {}.{} is not writable", table.name, key)));
        }
        table.get_column(key)?;
    }
    Ok(())
}

/// Fields to render: the requested ones, or every column.
pub fn effective_fields(table: &TableDef, fields: &[Field]) -> Vec<Field> {
    if fields.is_empty() {
        table.columns.iter().map(|c| Field::col(c.name)).collect()
    } else {
        fields.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(contains_pattern("ab"), "%ab%");
    }

    #[test]
    fn query_checks_reach_into_relations() {
        let schema = Schema::campus();
        let ok = Query::table("posts")
            .filter(Filter::related("post_topics", Filter::eq("topic_topics", 3)))
            .fields(vec![Field::col("id"), Field::rel("author", cols(&["id", "nickname"]))]);
        check_query(&schema, &ok).unwrap();

        let bad = Query::table("posts").fields(vec![Field::rel("author", cols(&["nope"]))]);
        assert!(matches!(check_query(&schema, &bad), Err(AppError::Query(_))));

        let bad_order = Query::table("posts").order_by("nope", Direction::Asc);
        assert!(check_query(&schema, &bad_order).is_err());
    }

    #[test]
    fn managed_columns_are_not_writable() {
        let schema = Schema::campus();
        let users = schema.table("users").unwrap();
        let mut obj = Map::new();
        obj.insert("mobile".into(), json!("13800138000"));
        check_object(users, &obj).unwrap();
        obj.insert("id".into(), json!(5));
        assert!(check_object(users, &obj).is_err());
    }

    #[test]
    fn all_collapses_trivial_conjunctions() {
        assert_eq!(Filter::all(vec![]), None);
        assert_eq!(Filter::all(vec![Filter::id(1)]), Some(Filter::id(1)));
        assert!(matches!(Filter::all(vec![Filter::id(1), Filter::id(2)]), Some(Filter::And(_))));
    }
}
