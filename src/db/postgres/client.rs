use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::{info, warn};
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;
use crate::error::StorageError;

const SCHEMA_SQL: &str = include_str!("../../../schema/postgres.sql");

const MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Split a SQL script into statements on `;`, ignoring separators that sit
/// inside single-quoted literals, `$$` bodies or `--` comments.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut in_dollar = false;
    let mut in_comment = false;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        match c {
            '-' if !in_quote && !in_dollar && matches!(chars.peek(), Some((_, '-'))) => {
                in_comment = true;
            },
            '\'' if !in_dollar => in_quote = !in_quote,
            '$' if !in_quote && matches!(chars.peek(), Some((_, '$'))) => {
                chars.next();
                in_dollar = !in_dollar;
            },
            ';' if !in_quote && !in_dollar => {
                let stmt = &sql[start..i];
                if has_code(stmt) {
                    statements.push(stmt);
                }
                start = i + 1;
            },
            _ => {},
        }
    }

    let tail = &sql[start..];
    if has_code(tail) {
        statements.push(tail);
    }

    statements
}

/// True when a chunk has something other than whitespace and comment lines
fn has_code(chunk: &str) -> bool {
    chunk
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("--"))
}

/// Only plain lowercase identifiers may be spliced into DDL and queries
fn is_valid_schema_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

/// PostgreSQL client with connection pooling.
///
/// Owns the snapshot table inside one schema. Uses `deadpool-postgres` so each
/// operation checks out a connection and returns it on every exit path.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
    schema: String,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> Result<Self, StorageError> {
        if !is_valid_schema_name(&settings.schema) {
            return Err(StorageError::Migration(format!(
                "invalid schema name '{}'",
                settings.schema
            )));
        }

        info!(
            "Connecting to PostgreSQL at {}:{} (schema {})",
            settings.host, settings.port, settings.schema
        );

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .map_err(|e| StorageError::Migration(format!("failed to build pool: {}", e)))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self {
                        pool,
                        schema: settings.schema,
                    });
                },
                Err(e) if attempt < MAX_CONNECT_ATTEMPTS => {
                    let delay = Duration::from_millis(100 * 2_u64.pow(attempt));
                    warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt, MAX_CONNECT_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(StorageError::Pool(e)),
            }
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Fully qualified snapshot table name
    pub fn table(&self) -> String {
        format!("{}.crypto_snapshots", self.schema)
    }

    /// Health check - verify connection is still alive
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let client = self.pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Apply the embedded DDL. Every statement is idempotent.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        info!("Running PostgreSQL migrations for schema {}", self.schema);
        let client = self.pool.get().await?;

        let script = SCHEMA_SQL.replace("{schema}", &self.schema);
        for stmt in split_sql_statements(&script) {
            client.execute(stmt, &[]).await.map_err(|e| {
                StorageError::Migration(format!("{} while executing: {}", e, stmt.trim()))
            })?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple_statements() {
        let stmts = split_sql_statements("SELECT 1; SELECT 2;\n");
        assert_eq!(stmts, vec!["SELECT 1", " SELECT 2"]);
    }

    #[test]
    fn test_split_ignores_quoted_and_commented_semicolons() {
        let sql = "-- note; not a split\nINSERT INTO t VALUES ('a;b');\n\
                   CREATE FUNCTION f() RETURNS int AS $$ SELECT 1; $$ LANGUAGE sql;";
        let stmts = split_sql_statements(sql);

        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("'a;b'"));
        assert!(stmts[1].contains("SELECT 1; $$"));
    }

    #[test]
    fn test_split_drops_comment_only_chunks() {
        let stmts = split_sql_statements("SELECT 1;\n-- trailing comment\n");
        assert_eq!(stmts, vec!["SELECT 1"]);
    }

    #[test]
    fn test_embedded_schema_splits_into_ddl() {
        let script = SCHEMA_SQL.replace("{schema}", "market");
        let stmts = split_sql_statements(&script);

        assert_eq!(stmts.len(), 5);
        assert!(stmts[0].contains("CREATE SCHEMA IF NOT EXISTS market"));
        assert!(stmts[1].contains("UNIQUE (coin_id, collected_at)"));
        assert!(stmts.iter().all(|s| !s.contains("{schema}")));
    }

    #[test]
    fn test_schema_name_validation() {
        assert!(is_valid_schema_name("market"));
        assert!(is_valid_schema_name("test_run_42"));
        assert!(!is_valid_schema_name("Market"));
        assert!(!is_valid_schema_name("1market"));
        assert!(!is_valid_schema_name("market; DROP TABLE x"));
        assert!(!is_valid_schema_name(""));
    }
}
