//! SQLite-backed record store for the local backend.
//!
//! One table (named by `TABLE_NAME`) keyed by `image_id`, with an index on
//! `(user_id, created_at)` standing in for the owner secondary index. Tags
//! are stored as a JSON array in a TEXT column.

use super::{RecordStore, StoreError, StoreResult};
use crate::models::image::ImageRecord;
use async_trait::async_trait;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tracing::debug;

const MAX_TABLE_NAME_LEN: usize = 255;

#[derive(FromRow)]
struct ImageRow {
    image_id: String,
    user_id: String,
    s3_key: String,
    filename: String,
    content_type: String,
    tags: String,
    description: String,
    created_at: i64,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = StoreError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let tags: Vec<String> = serde_json::from_str(&row.tags).map_err(|err| {
            StoreError::MalformedRecord(format!("tags of `{}`: {}", row.image_id, err))
        })?;
        Ok(ImageRecord {
            image_id: row.image_id,
            user_id: row.user_id,
            s3_key: row.s3_key,
            filename: row.filename,
            content_type: row.content_type,
            tags,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    table: String,
}

impl SqliteRecordStore {
    /// Wrap an existing pool. The table name is validated here because it
    /// is interpolated (quoted) into every statement.
    pub fn new(db: Arc<SqlitePool>, table: &str) -> StoreResult<Self> {
        ensure_table_name_safe(table)?;
        Ok(Self {
            db,
            table: table.to_string(),
        })
    }

    /// Open a pool for `database_url` and make sure the schema exists.
    ///
    /// `sqlite::memory:` gets a single never-recycled connection so the
    /// database lives as long as the store.
    pub async fn connect(database_url: &str, table: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self::new(Arc::new(pool), table)?;
        store.migrate().await?;
        Ok(store)
    }

    /// Create the table and owner index if they are missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = [
            format!(
                r#"CREATE TABLE IF NOT EXISTS "{table}" (
                    image_id     TEXT PRIMARY KEY NOT NULL,
                    user_id      TEXT NOT NULL,
                    s3_key       TEXT NOT NULL,
                    filename     TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    tags         TEXT NOT NULL DEFAULT '[]',
                    description  TEXT NOT NULL DEFAULT '',
                    created_at   INTEGER NOT NULL
                )"#,
                table = self.table
            ),
            format!(
                r#"CREATE INDEX IF NOT EXISTS "{table}_user_id" ON "{table}" (user_id, created_at)"#,
                table = self.table
            ),
        ];

        for stmt in &statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn select_columns(&self) -> String {
        format!(
            r#"SELECT image_id, user_id, s3_key, filename, content_type, tags, description, created_at
               FROM "{}""#,
            self.table
        )
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, record: &ImageRecord) -> StoreResult<()> {
        let tags = serde_json::to_string(&record.tags)?;
        sqlx::query(&format!(
            r#"INSERT OR REPLACE INTO "{}" (
                image_id, user_id, s3_key, filename, content_type, tags, description, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            self.table
        ))
        .bind(&record.image_id)
        .bind(&record.user_id)
        .bind(&record.s3_key)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(tags)
        .bind(&record.description)
        .bind(record.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get(&self, image_id: &str) -> StoreResult<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRow>(&format!(
            "{} WHERE image_id = ?",
            self.select_columns()
        ))
        .bind(image_id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(ImageRecord::try_from).transpose()
    }

    async fn delete(&self, image_id: &str) -> StoreResult<()> {
        sqlx::query(&format!(r#"DELETE FROM "{}" WHERE image_id = ?"#, self.table))
            .bind(image_id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn query_by_user(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            "{} WHERE user_id = ? ORDER BY created_at ASC, rowid ASC LIMIT ?",
            self.select_columns()
        ))
        .bind(user_id)
        .bind(sql_limit(limit))
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(ImageRecord::try_from).collect()
    }

    async fn scan(&self, limit: usize) -> StoreResult<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(&format!(
            "{} ORDER BY rowid ASC LIMIT ?",
            self.select_columns()
        ))
        .bind(sql_limit(limit))
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(ImageRecord::try_from).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?
        {
            1 => Ok(()),
            other => Err(StoreError::Backend(format!("unexpected result: {other}"))),
        }
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Table names are quoted identifiers: letters, digits, `_`, `-` and `.`.
fn ensure_table_name_safe(name: &str) -> StoreResult<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_TABLE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}
