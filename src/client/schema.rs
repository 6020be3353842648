//! Static relational model the data client works against.

use crate::error::{AppError, ConfigError};
use std::collections::HashSet;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    BigSerial,
    BigInt,
    Text,
    Jsonb,
    Timestamptz,
}

impl ColumnType {
    /// Type used in DDL.
    pub fn ddl(self) -> &'static str {
        match self {
            ColumnType::BigSerial => "BIGSERIAL",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Text => "TEXT",
            ColumnType::Jsonb => "JSONB",
            ColumnType::Timestamptz => "TIMESTAMPTZ",
        }
    }

    /// Type used when casting bound parameters.
    pub fn cast(self) -> &'static str {
        match self {
            ColumnType::BigSerial | ColumnType::BigInt => "bigint",
            ColumnType::Text => "text",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Timestamptz => "timestamptz",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnDefault {
    Text(&'static str),
    Int(i64),
    EmptyArray,
    Now,
}

impl ColumnDefault {
    pub fn ddl(&self) -> String {
        match self {
            ColumnDefault::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ColumnDefault::Int(n) => n.to_string(),
            ColumnDefault::EmptyArray => "'[]'::jsonb".to_string(),
            ColumnDefault::Now => "NOW()".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<ColumnDefault>,
    /// Target table when this column is a foreign key to that table's `id`.
    pub references: Option<&'static str>,
}

impl ColumnDef {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        ColumnDef {
            name,
            ty,
            nullable: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, d: ColumnDefault) -> Self {
        self.default = Some(d);
        self
    }

    pub fn references(mut self, table: &'static str) -> Self {
        self.references = Some(table);
        self
    }

    /// True when an insert may omit the column.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.ty == ColumnType::BigSerial
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// We hold `column` pointing at the target's id.
    ToOne { column: &'static str },
    /// The target holds `foreign_column` pointing at our id.
    ToMany { foreign_column: &'static str },
}

#[derive(Clone, Debug)]
pub struct RelationDef {
    pub name: &'static str,
    pub target: &'static str,
    pub kind: RelationKind,
}

#[derive(Clone, Debug)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub relations: Vec<RelationDef>,
}

impl TableDef {
    /// New table with the `id`, `created_at` and `updated_at` columns every table carries.
    pub fn new(name: &'static str) -> Self {
        TableDef {
            name,
            columns: vec![
                ColumnDef::new(ID, ColumnType::BigSerial),
                ColumnDef::new(CREATED_AT, ColumnType::Timestamptz).default(ColumnDefault::Now),
                ColumnDef::new(UPDATED_AT, ColumnType::Timestamptz).default(ColumnDefault::Now),
            ],
            relations: Vec::new(),
        }
    }

    pub fn column(mut self, c: ColumnDef) -> Self {
        self.columns.push(c);
        self
    }

    pub fn to_one(mut self, name: &'static str, target: &'static str, column: &'static str) -> Self {
        self.relations.push(RelationDef {
            name,
            target,
            kind: RelationKind::ToOne { column },
        });
        self
    }

    pub fn to_many(mut self, name: &'static str, target: &'static str, foreign_column: &'static str) -> Self {
        self.relations.push(RelationDef {
            name,
            target,
            kind: RelationKind::ToMany { foreign_column },
        });
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_column(&self, name: &str) -> Result<&ColumnDef, AppError> {
        self.find_column(name)
            .ok_or_else(|| AppError::Query(format!("unknown column {}.{}", self.name, name)))
    }

    pub fn get_relation(&self, name: &str) -> Result<&RelationDef, AppError> {
        self.find_relation(name)
            .ok_or_else(|| AppError::Query(format!("unknown relation {}.{}", self.name, name)))
    }
}

/// Ordered set of tables; a table may only reference itself or tables listed before it.
#[derive(Clone, Debug)]
pub struct Schema {
    pub tables: Vec<TableDef>,
}

impl Schema {
    pub fn new(tables: Vec<TableDef>) -> Result<Self, ConfigError> {
        let schema = Schema { tables };
        schema.validate()?;
        Ok(schema)
    }

    pub fn find_table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table(&self, name: &str) -> Result<&TableDef, AppError> {
        self.find_table(name)
            .ok_or_else(|| AppError::Query(format!("unknown table {}", name)))
    }

    /// Every (table, column) pair whose column references `target`.
    pub fn referencing(&self, target: &str) -> Vec<(&TableDef, &ColumnDef)> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter().map(move |c| (t, c)))
            .filter(|(_, c)| c.references == Some(target))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for t in &self.tables {
            if !seen.insert(t.name) {
                return Err(ConfigError::Validation(format!("duplicate table {}", t.name)));
            }
            let mut names = HashSet::new();
            for c in &t.columns {
                if !names.insert(c.name) {
                    return Err(ConfigError::Validation(format!("duplicate column {}.{}", t.name, c.name)));
                }
                if let Some(target) = c.references {
                    if target != t.name && !seen.contains(target) {
                        return Err(if self.find_table(target).is_some() {
                            ConfigError::ForwardReference {
                                table: t.name.to_string(),
                                target: target.to_string(),
                            }
                        } else {
                            ConfigError::MissingReference {
                                kind: "table",
                                id: target.to_string(),
                            }
                        });
                    }
                }
            }
        }

        for t in &self.tables {
            for r in &t.relations {
                let target = self.find_table(r.target).ok_or_else(|| ConfigError::MissingReference {
                    kind: "table",
                    id: r.target.to_string(),
                })?;
                let (holder, column) = match r.kind {
                    RelationKind::ToOne { column } => (t, column),
                    RelationKind::ToMany { foreign_column } => (target, foreign_column),
                };
                let pointee = match r.kind {
                    RelationKind::ToOne { .. } => target.name,
                    RelationKind::ToMany { .. } => t.name,
                };
                let col = holder.find_column(column).ok_or_else(|| ConfigError::MissingReference {
                    kind: "column",
                    id: format!("{}.{}", holder.name, column),
                })?;
                if col.references != Some(pointee) {
                    return Err(ConfigError::Validation(format!(
                        "relation {}.{}: column {}.{} does not reference {}",
                        t.name, r.name, holder.name, column, pointee
                    )));
                }
            }
        }
        Ok(())
    }

    /// The campus portal model.
    pub fn campus() -> Self {
        use ColumnType::*;
        let tables = vec![
            TableDef::new("sites")
                .column(ColumnDef::new("name", Text))
                .column(ColumnDef::new("icon_url", Text).nullable())
                .to_many("site_banners", "site_banners", "site_site")
                .to_many("site_quicklinks", "site_quicklinks", "site_site"),
            TableDef::new("site_banners")
                .column(ColumnDef::new("name", Text))
                .column(ColumnDef::new("image_url", Text))
                .column(ColumnDef::new("link", Text).nullable())
                .column(ColumnDef::new("sort", BigInt).default(ColumnDefault::Int(0)))
                .column(ColumnDef::new("site_site", BigInt).references("sites"))
                .to_one("site", "sites", "site_site"),
            TableDef::new("site_quicklinks")
                .column(ColumnDef::new("name", Text))
                .column(ColumnDef::new("icon_url", Text).nullable())
                .column(ColumnDef::new("link", Text).nullable())
                .column(ColumnDef::new("sort", BigInt).default(ColumnDefault::Int(0)))
                .column(ColumnDef::new("site_site", BigInt).references("sites"))
                .to_one("site", "sites", "site_site"),
            TableDef::new("users")
                .column(ColumnDef::new("mobile", Text).unique())
                .column(ColumnDef::new("password", Text).nullable())
                .column(ColumnDef::new("nickname", Text).nullable())
                .column(ColumnDef::new("bio", Text).nullable())
                .column(ColumnDef::new("avatar_url", Text).nullable())
                .column(ColumnDef::new("role", Text).default(ColumnDefault::Text("user")))
                .column(ColumnDef::new("last_login_at", Timestamptz).nullable())
                .column(ColumnDef::new("current_site_site", BigInt).nullable().references("sites"))
                .to_one("current_site", "sites", "current_site_site")
                .to_many("posts", "posts", "author_user"),
            TableDef::new("topics")
                .column(ColumnDef::new("name", Text).unique())
                .to_many("post_topics", "post_topics", "topic_topics"),
            TableDef::new("posts")
                .column(ColumnDef::new("content", Text))
                .column(ColumnDef::new("media_data", Jsonb).default(ColumnDefault::EmptyArray))
                .column(ColumnDef::new("author_user", BigInt).references("users"))
                .column(ColumnDef::new("site_site", BigInt).references("sites"))
                .to_one("author", "users", "author_user")
                .to_one("site", "sites", "site_site")
                .to_many("post_topics", "post_topics", "post_posts")
                .to_many("post_comments", "post_comments", "post_posts"),
            TableDef::new("post_topics")
                .column(ColumnDef::new("post_posts", BigInt).references("posts"))
                .column(ColumnDef::new("topic_topics", BigInt).references("topics"))
                .to_one("post", "posts", "post_posts")
                .to_one("topic", "topics", "topic_topics"),
            TableDef::new("post_comments")
                .column(ColumnDef::new("content", Text))
                .column(ColumnDef::new("media_data", Jsonb).default(ColumnDefault::EmptyArray))
                .column(ColumnDef::new("author_user", BigInt).references("users"))
                .column(ColumnDef::new("post_posts", BigInt).references("posts"))
                .column(
                    ColumnDef::new("parent_post_comments", BigInt)
                        .nullable()
                        .references("post_comments"),
                )
                .to_one("author", "users", "author_user")
                .to_one("post", "posts", "post_posts")
                .to_one("parent", "post_comments", "parent_post_comments")
                .to_many("replies", "post_comments", "parent_post_comments"),
        ];
        Schema { tables }
    }
}
