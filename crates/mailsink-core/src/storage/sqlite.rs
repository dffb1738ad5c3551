//! `SQLite` storage.

use super::{MailStorage, Page, SearchCriteria, fold};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mailsink_smtp::{MailBody, MailItem};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

const COLUMNS: &str = "id, from_address, to_addresses, subject, headers, body_text, body_html, \
                       attachments, received_at, size";

/// Lowercased copies of the searchable columns. `SQLite` only folds ASCII
/// case, so searches compare these against a needle folded the same way.
const FOLD_COLUMNS: [&str; 5] = [
    "fold_from TEXT NOT NULL DEFAULT ''",
    "fold_to TEXT NOT NULL DEFAULT '[]'",
    "fold_subject TEXT NOT NULL DEFAULT ''",
    "fold_body_text TEXT",
    "fold_body_html TEXT",
];

/// Stores items in a `SQLite` database.
///
/// Recipients, headers and attachments are JSON columns; attachment
/// payloads are base64 inside that JSON.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Opens (creating if needed) the database at `database_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn open(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let storage = Self { pool };
        storage.initialize().await?;
        Ok(storage)
    }

    /// Create an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.initialize().await?;
        Ok(storage)
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS mail_items (
                id TEXT PRIMARY KEY NOT NULL,
                from_address TEXT NOT NULL DEFAULT '',
                to_addresses TEXT NOT NULL DEFAULT '[]',
                subject TEXT NOT NULL DEFAULT '',
                headers TEXT NOT NULL DEFAULT '[]',
                body_text TEXT,
                body_html TEXT,
                attachments TEXT NOT NULL DEFAULT '[]',
                received_at TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        self.add_fold_columns().await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_mail_items_received
            ON mail_items(received_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Brings a database created without the folded columns up to date.
    async fn add_fold_columns(&self) -> Result<()> {
        let present: Option<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_table_info('mail_items') WHERE name = 'fold_subject'",
        )
        .fetch_optional(&self.pool)
        .await?;
        if present.is_some() {
            return Ok(());
        }

        for column in FOLD_COLUMNS {
            sqlx::query(&format!("ALTER TABLE mail_items ADD COLUMN {column}"))
                .execute(&self.pool)
                .await?;
        }

        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM mail_items"))
            .fetch_all(&self.pool)
            .await?;
        for row in &rows {
            self.save(&row_to_item(row)?).await?;
        }
        Ok(())
    }
}

/// Fixed-width UTC timestamps so text comparison orders by time.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, criteria: &SearchCriteria) {
    query.push(" WHERE 1 = 1");

    if let Some(text) = criteria.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let needle = fold(text);
        query
            .push(" AND (instr(fold_subject, ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(fold_body_text, ")
            .push_bind(needle.clone())
            .push(") > 0 OR instr(fold_body_html, ")
            .push_bind(needle)
            .push(") > 0)");
    }
    if let Some(from) = criteria.from.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
        query
            .push(" AND instr(fold_from, ")
            .push_bind(fold(from))
            .push(") > 0");
    }
    if let Some(to) = criteria.to.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        query
            .push(" AND EXISTS (SELECT 1 FROM json_each(mail_items.fold_to) WHERE instr(value, ")
            .push_bind(fold(to))
            .push(") > 0)");
    }
    if let Some(since) = &criteria.since {
        query.push(" AND received_at >= ").push_bind(timestamp(since));
    }
    if let Some(until) = &criteria.until {
        query.push(" AND received_at <= ").push_bind(timestamp(until));
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn row_to_item(row: &SqliteRow) -> Result<MailItem> {
    let received_at: String = row.try_get("received_at")?;
    let received_at = DateTime::parse_from_rfc3339(&received_at)
        .map_err(|e| Error::Database(sqlx::Error::Decode(Box::new(e))))?
        .with_timezone(&Utc);

    Ok(MailItem {
        id: row.try_get("id")?,
        from_address: row.try_get("from_address")?,
        to_addresses: serde_json::from_str(row.try_get("to_addresses")?)?,
        subject: row.try_get("subject")?,
        headers: serde_json::from_str(row.try_get("headers")?)?,
        body: MailBody {
            text: row.try_get("body_text")?,
            html: row.try_get("body_html")?,
        },
        attachments: serde_json::from_str(row.try_get("attachments")?)?,
        received_at,
        size: usize::try_from(row.try_get::<i64, _>("size")?).unwrap_or_default(),
    })
}

#[async_trait]
impl MailStorage for SqliteStorage {
    async fn save(&self, item: &MailItem) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO mail_items
                (id, from_address, to_addresses, subject, headers, body_text, body_html,
                 attachments, received_at, size,
                 fold_from, fold_to, fold_subject, fold_body_text, fold_body_html)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                from_address = excluded.from_address,
                to_addresses = excluded.to_addresses,
                subject = excluded.subject,
                headers = excluded.headers,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                attachments = excluded.attachments,
                received_at = excluded.received_at,
                size = excluded.size,
                fold_from = excluded.fold_from,
                fold_to = excluded.fold_to,
                fold_subject = excluded.fold_subject,
                fold_body_text = excluded.fold_body_text,
                fold_body_html = excluded.fold_body_html
            ",
        )
        .bind(&item.id)
        .bind(&item.from_address)
        .bind(serde_json::to_string(&item.to_addresses)?)
        .bind(&item.subject)
        .bind(serde_json::to_string(&item.headers)?)
        .bind(&item.body.text)
        .bind(&item.body.html)
        .bind(serde_json::to_string(&item.attachments)?)
        .bind(timestamp(&item.received_at))
        .bind(to_i64(item.size))
        .bind(fold(&item.from_address))
        .bind(serde_json::to_string(
            &item.to_addresses.iter().map(|rcpt| fold(rcpt)).collect::<Vec<_>>(),
        )?)
        .bind(fold(&item.subject))
        .bind(item.body.text.as_deref().map(fold))
        .bind(item.body.html.as_deref().map(fold))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<MailItem> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM mail_items WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        row_to_item(&row)
    }

    async fn search(&self, criteria: &SearchCriteria, page: Page) -> Result<Vec<MailItem>> {
        let mut query = QueryBuilder::new(format!("SELECT {COLUMNS} FROM mail_items"));
        push_filters(&mut query, criteria);
        query
            .push(" ORDER BY received_at DESC, rowid DESC LIMIT ")
            .push_bind(to_i64(page.limit))
            .push(" OFFSET ")
            .push_bind(to_i64(page.offset));

        let rows = query.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn count(&self, criteria: &SearchCriteria) -> Result<usize> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) FROM mail_items");
        push_filters(&mut query, criteria);

        let count: i64 = query.build().fetch_one(&self.pool).await?.try_get(0)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM mail_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn purge(&self, before: Option<DateTime<Utc>>) -> Result<u64> {
        let result = match before {
            Some(cutoff) => {
                sqlx::query("DELETE FROM mail_items WHERE received_at < ?")
                    .bind(timestamp(&cutoff))
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM mail_items").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }
}
