mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Current time in the canonical storage format
pub fn now() -> String {
    timestamp(Utc::now())
}

/// RFC 3339 with millisecond precision and a `Z` suffix, so stored values
/// order correctly as plain strings
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp; `None` for malformed values
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Execute a SQL migration file, properly handling comments.
///
/// Comments are stripped first, then statements are split on ';'. A
/// `CREATE TRIGGER` body keeps its inner semicolons and runs as one
/// statement up to its closing `END`.
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in split_statements(sql) {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

/// Drop `--` comments through end of line, leaving string literals intact
fn strip_comments(sql: &str) -> String {
    let mut cleaned = String::with_capacity(sql.len());
    for line in sql.lines() {
        let mut in_string = false;
        let mut end = line.len();
        let bytes = line.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            match b {
                b'\'' => in_string = !in_string,
                b'-' if !in_string && bytes.get(i + 1) == Some(&b'-') => {
                    end = i;
                    break;
                }
                _ => {}
            }
        }
        cleaned.push_str(&line[..end]);
        cleaned.push('\n');
    }
    cleaned
}

fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut trigger: Option<String> = None;

    for chunk in strip_comments(sql).split(';') {
        let trimmed = chunk.trim();

        if let Some(mut body) = trigger.take() {
            body.push_str(";\n");
            body.push_str(trimmed);
            if trimmed.eq_ignore_ascii_case("END") {
                statements.push(body);
            } else {
                trigger = Some(body);
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }
        if trimmed.to_ascii_uppercase().starts_with("CREATE TRIGGER") {
            trigger = Some(trimmed.to_string());
        } else {
            statements.push(trimmed.to_string());
        }
    }

    statements
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("tenfis.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, name: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Accounts, sessions, profiles
    execute_sql(pool, include_str!("../../migrations/001_initial.sql")).await?;

    // Migration 002: Appointments and chat
    if !table_exists(pool, "chat_rooms").await? {
        execute_sql(pool, include_str!("../../migrations/002_appointments_chat.sql")).await?;
    }

    // Migration 003: Feed, ratings, audit log
    if !table_exists(pool, "audit_logs").await? {
        execute_sql(pool, include_str!("../../migrations/003_feed_ratings_audit.sql")).await?;
    }

    Ok(())
}

/// Fresh in-memory database with the full schema applied.
///
/// A single connection keeps every query on the same in-memory database.
#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}
