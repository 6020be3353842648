//! Postgres bootstrap: create the campus database before the pool connects.

use crate::error::AppError;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::str::FromStr;

/// Where to connect to create a database, and which one.
#[derive(Debug, PartialEq)]
struct BootstrapTarget {
    maintenance_url: String,
    database: String,
}

impl BootstrapTarget {
    /// Swaps the URL path for the `postgres` maintenance database, keeping any query string.
    fn parse(url: &str) -> Result<Self, AppError> {
        let authority = url.find("://").map_or(0, |i| i + 3);
        let slash = url[authority..]
            .find('/')
            .map(|i| authority + i)
            .ok_or_else(|| AppError::Internal("DATABASE_URL has no database path".into()))?;
        let (path, query) = match url[slash + 1..].split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (&url[slash + 1..], None),
        };
        let mut maintenance_url = format!("{}/postgres", &url[..slash]);
        if let Some(q) = query {
            maintenance_url.push('?');
            maintenance_url.push_str(q);
        }
        Ok(BootstrapTarget {
            maintenance_url,
            database: path.trim().to_string(),
        })
    }
}

pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let target = BootstrapTarget::parse(database_url)?;
    if target.database.is_empty() || target.database == "postgres" {
        return Ok(());
    }
    let options = PgConnectOptions::from_str(&target.maintenance_url)
        .map_err(|e| AppError::Internal(format!("DATABASE_URL is not a postgres url: {}", e)))?;
    let mut conn: PgConnection = options.connect().await.map_err(AppError::Db)?;

    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(&target.database)
        .fetch_optional(&mut conn)
        .await
        .map_err(AppError::Db)?;
    if found.is_none() {
        tracing::info!(database = %target.database, "database missing; creating it");
        let ddl = format!("CREATE DATABASE \"{}\"", target.database.replace('"', "\"\""));
        sqlx::query(&ddl).execute(&mut conn).await.map_err(AppError::Db)?;
    }
    conn.close().await.map_err(AppError::Db)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_the_maintenance_database() {
        let t = BootstrapTarget::parse("postgres://u:p@localhost:5432/campus?sslmode=disable").unwrap();
        assert_eq!(t.database, "campus");
        assert_eq!(t.maintenance_url, "postgres://u:p@localhost:5432/postgres?sslmode=disable");

        let plain = BootstrapTarget::parse("postgres://localhost/campus").unwrap();
        assert_eq!(plain.maintenance_url, "postgres://localhost/postgres");
    }

    #[test]
    fn url_without_path_is_rejected() {
        assert!(BootstrapTarget::parse("postgres://localhost").is_err());
    }
}
