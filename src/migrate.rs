use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_ms;
use tracing::{error, info};

static ADD_COLUMN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)")
        .expect("add column pattern to compile")
});

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let head: String = trimmed.chars().take(160).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

pub static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202601050900_initial.sql",
        include_str!("../migrations/202601050900_initial.sql"),
    ),
    (
        "202601051000_geodata.sql",
        include_str!("../migrations/202601051000_geodata.sql"),
    ),
    (
        "202601121200_household_order.sql",
        include_str!("../migrations/202601121200_household_order.sql"),
    ),
];

fn clean(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    pub version: String,
    pub applied: bool,
}

async fn ensure_table(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;
    Ok(())
}

async fn applied_checksums(pool: &SqlitePool) -> anyhow::Result<HashMap<String, String>> {
    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }
    Ok(applied)
}

pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<Vec<MigrationState>> {
    ensure_table(pool).await?;
    let applied = applied_checksums(pool).await?;
    Ok(MIGRATIONS
        .iter()
        .map(|(filename, _)| MigrationState {
            version: (*filename).to_string(),
            applied: applied.contains_key(*filename),
        })
        .collect())
}

pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    ensure_table(pool).await?;
    let applied = applied_checksums(pool).await?;

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = clean(raw_sql);
        let checksum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &checksum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "kinledger", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            if let Some(caps) = ADD_COLUMN.captures(s) {
                let (Some(table), Some(col)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let exists: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
                )
                .bind(table.as_str())
                .bind(col.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                if exists.is_some() {
                    info!(target: "kinledger", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                    continue;
                }
            }
            info!(target: "kinledger", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "kinledger", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&checksum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "kinledger", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_comments_and_blank_lines() {
        let cleaned = clean("-- header\n\nCREATE TABLE t (a INTEGER);\n  -- trailing\n");
        assert_eq!(cleaned, "CREATE TABLE t (a INTEGER);");
    }

    #[test]
    fn checksum_ignores_comment_edits() {
        let a = checksum(&clean("-- one\nCREATE TABLE t (a INTEGER);"));
        let b = checksum(&clean("-- two\n\nCREATE TABLE t (a INTEGER);"));
        assert_eq!(a, b);
    }

    #[test]
    fn migration_files_have_no_embedded_semicolons_in_statements() {
        for (name, raw) in MIGRATIONS {
            for stmt in clean(raw).split(';') {
                let s = stmt.trim();
                assert!(
                    s.is_empty() || !s.to_ascii_uppercase().contains("BEGIN\n"),
                    "{name} contains a compound statement"
                );
            }
        }
    }
}
