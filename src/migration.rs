//! Apply the relational model to the database: tables, foreign keys and indexes.
//! Tables are created in model order, so every referenced table already exists.

use crate::client::schema::{ColumnType, Schema, ID};
use crate::error::AppError;
use sqlx::PgPool;

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// DDL for the whole model, in execution order. Every statement is idempotent.
pub fn ddl_statements(schema: &Schema) -> Vec<String> {
    let mut out = Vec::new();
    for t in &schema.tables {
        let mut col_defs: Vec<String> = Vec::new();
        for c in &t.columns {
            let mut def = format!("{} {}", quote(c.name), c.ty.ddl());
            if c.name == ID {
                def.push_str(" PRIMARY KEY");
            } else if !c.nullable && c.ty != ColumnType::BigSerial {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                def.push_str(&d.ddl());
            }
            if c.unique {
                def.push_str(" UNIQUE");
            }
            if let Some(target) = c.references {
                def.push_str(&format!(" REFERENCES {} ({})", quote(target), quote(ID)));
            }
            col_defs.push(def);
        }
        out.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quote(t.name),
            col_defs.join(",\n  ")
        ));

        for c in t.columns.iter().filter(|c| c.references.is_some()) {
            out.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("idx_{}_{}", t.name, c.name)),
                quote(t.name),
                quote(c.name)
            ));
        }
    }
    out
}

/// Validate the model, then create whatever is missing.
pub async fn apply_migrations(pool: &PgPool, schema: &Schema) -> Result<(), AppError> {
    schema.validate()?;
    for sql in ddl_statements(schema) {
        tracing::debug!(sql = %sql, "migration");
        sqlx::query(&sql).execute(pool).await?;
    }
    tracing::info!(tables = schema.tables.len(), "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_come_with_keys_defaults_and_references() {
        let ddl = ddl_statements(&Schema::campus());
        let users = ddl
            .iter()
            .find(|s| s.starts_with("CREATE TABLE IF NOT EXISTS \"users\""))
            .unwrap();
        assert!(users.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(users.contains("\"mobile\" TEXT NOT NULL UNIQUE"));
        assert!(users.contains("\"role\" TEXT NOT NULL DEFAULT 'user'"));
        assert!(users.contains("\"current_site_site\" BIGINT REFERENCES \"sites\" (\"id\")"));
        assert!(users.contains("\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT NOW()"));

        let posts = ddl.iter().find(|s| s.contains("TABLE IF NOT EXISTS \"posts\"")).unwrap();
        assert!(posts.contains("\"media_data\" JSONB NOT NULL DEFAULT '[]'::jsonb"));
        assert!(ddl.contains(
            &"CREATE INDEX IF NOT EXISTS \"idx_post_topics_post_posts\" ON \"post_topics\" (\"post_posts\")".to_string()
        ));
    }

    #[test]
    fn referenced_tables_are_created_first() {
        let ddl = ddl_statements(&Schema::campus());
        let pos = |name: &str| {
            ddl.iter()
                .position(|s| s.starts_with(&format!("CREATE TABLE IF NOT EXISTS \"{}\"", name)))
                .unwrap()
        };
        assert!(pos("sites") < pos("users"));
        assert!(pos("users") < pos("posts"));
        assert!(pos("topics") < pos("post_topics"));
        assert!(pos("posts") < pos("post_comments"));
    }
}
