//! User/preferences and article storage.
//!
//! The digest pipeline only reads through [`DigestStore`]. [`SqliteStore`]
//! also carries the few write helpers ingestion and tests need.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::models::{Article, Recipient, ThreatLevel, User};

/// Which eligible users a run should target.
///
/// `limit_to` restricts the run to the listed addresses, `exclude` removes
/// addresses from it. Both still go through the verified + opted-in gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipientFilter {
    pub limit_to: Option<Vec<String>>,
    pub exclude: Vec<String>,
}

impl RecipientFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn limit_to<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            limit_to: Some(emails.into_iter().map(Into::into).collect()),
            exclude: Vec::new(),
        }
    }

    pub fn excluding<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            limit_to: None,
            exclude: emails.into_iter().map(Into::into).collect(),
        }
    }
}

/// Read-only view of the stores the digest pipeline consumes.
pub trait DigestStore {
    /// Users with a verified email and the weekly digest preference switched on.
    fn eligible_recipients(&self, filter: &RecipientFilter) -> Result<Vec<Recipient>>;

    /// Articles published at or after `since`, most severe first, newest first within a severity.
    fn articles_published_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Article>>;
}

struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL DEFAULT '',
                email_verified INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );
            CREATE TABLE user_preferences (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                email_weekly_digest INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
            );
            CREATE TABLE articles (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                summary TEXT,
                url TEXT NOT NULL,
                source TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                threat_level TEXT,
                read_time INTEGER
            );
            CREATE INDEX idx_articles_published_at ON articles(published_at);",
    },
];

const SEVERITY_ORDER_SQL: &str = "CASE upper(threat_level)
        WHEN 'CRITICAL' THEN 1
        WHEN 'HIGH' THEN 2
        WHEN 'MEDIUM' THEN 3
        ELSE 4
    END";

fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// SQLite-backed store. The connection sits behind a mutex so the store can
/// be shared with async handlers; no lock is held across an await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        info!(path = %path.display(), "opened sqlite store");
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::bootstrap(conn)
    }

    fn bootstrap(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.conn()?;
        current_user_version(&conn)
    }

    /// Inserts a user and returns its row id.
    pub fn insert_user(&self, email: &str, name: &str, email_verified: bool) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (email, name, email_verified) VALUES (?1, ?2, ?3)",
            params![email, name, email_verified],
        )
        .with_context(|| format!("Failed to insert user {email}"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_user(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, email, name, email_verified FROM users WHERE lower(email) = lower(?1)",
                [email],
                |row| {
                    Ok(User {
                        id: row.get("id")?,
                        email: row.get("email")?,
                        name: row.get("name")?,
                        email_verified: row.get("email_verified")?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    /// Creates or updates the user's one-to-one preferences row.
    pub fn set_digest_preference(&self, user_id: i64, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_preferences (user_id, email_weekly_digest) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                email_weekly_digest = excluded.email_weekly_digest,
                updated_at = (strftime('%s', 'now') * 1000)",
            params![user_id, enabled],
        )
        .with_context(|| format!("Failed to save preferences for user {user_id}"))?;
        Ok(())
    }

    pub fn insert_article(&self, article: &Article) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO articles (id, title, summary, url, source, published_at, threat_level, read_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                article.id,
                article.title,
                article.summary,
                article.url,
                article.source,
                article.published_at.timestamp_millis(),
                article.threat_level.map(|level| level.as_str()),
                article.read_time,
            ],
        )
        .with_context(|| format!("Failed to insert article {}", article.id))?;
        Ok(())
    }
}

impl DigestStore for SqliteStore {
    fn eligible_recipients(&self, filter: &RecipientFilter) -> Result<Vec<Recipient>> {
        let mut sql = String::from(
            "SELECT u.email, u.name
             FROM users u
             INNER JOIN user_preferences p ON p.user_id = u.id
             WHERE p.email_weekly_digest = 1
               AND u.email_verified = 1",
        );
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(limit_to) = &filter.limit_to {
            if limit_to.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(
                " AND lower(u.email) IN ({})",
                placeholders(limit_to.len())
            ));
            bind_values.extend(
                limit_to
                    .iter()
                    .map(|email| Value::Text(email.to_ascii_lowercase())),
            );
        }

        if !filter.exclude.is_empty() {
            sql.push_str(&format!(
                " AND lower(u.email) NOT IN ({})",
                placeholders(filter.exclude.len())
            ));
            bind_values.extend(
                filter
                    .exclude
                    .iter()
                    .map(|email| Value::Text(email.to_ascii_lowercase())),
            );
        }

        sql.push_str(" ORDER BY u.id ASC");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query(params_from_iter(bind_values))
            .context("Failed to query digest recipients")?;

        let mut recipients = Vec::new();
        while let Some(row) = rows.next()? {
            recipients.push(Recipient {
                email: row.get("email")?,
                name: row.get("name")?,
            });
        }

        debug!(count = recipients.len(), "loaded eligible recipients");
        Ok(recipients)
    }

    fn articles_published_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<Article>> {
        let sql = format!(
            "SELECT id, title, summary, url, source, published_at, threat_level, read_time
             FROM articles
             WHERE published_at >= ?1
             ORDER BY {SEVERITY_ORDER_SQL}, published_at DESC
             LIMIT ?2"
        );

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt
            .query(params![since.timestamp_millis(), limit])
            .context("Failed to query recent articles")?;

        let mut articles = Vec::new();
        while let Some(row) = rows.next()? {
            articles.push(parse_article_row(row)?);
        }

        debug!(count = articles.len(), since = %since, "loaded candidate articles");
        Ok(articles)
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_article_row(row: &Row<'_>) -> Result<Article> {
    let published_ms: i64 = row.get("published_at")?;
    let published_at = Utc
        .timestamp_millis_opt(published_ms)
        .single()
        .ok_or_else(|| anyhow!("invalid published_at value `{published_ms}` in articles"))?;

    let threat_level = row
        .get::<_, Option<String>>("threat_level")?
        .as_deref()
        .and_then(ThreatLevel::parse);

    Ok(Article {
        id: row.get("id")?,
        title: row.get("title")?,
        summary: row.get("summary")?,
        url: row.get("url")?,
        source: row.get("source")?,
        published_at,
        threat_level,
        read_time: row.get("read_time")?,
    })
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current = current_user_version(conn)?;
    let latest = latest_version();

    if current > latest {
        bail!("Database schema version {current} is newer than supported {latest}");
    }
    if current == latest {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(migration.sql)
            .with_context(|| format!("Failed to apply migration {}", migration.version))?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", migration.version))?;
    }
    tx.commit()?;

    info!(from = current, to = latest, "applied schema migrations");
    Ok(())
}

fn current_user_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}
