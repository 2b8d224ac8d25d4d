//! SQLite storage for annotation records
//!
//! Provides CRUD, filtered queries and per-status counts. Every write is a
//! single statement or a single transaction, so a half-applied update is
//! never visible to another caller.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::create_pool;
use crate::annotations::{
    AnnotationFilter, AnnotationPatch, AnnotationRecord, AnnotationStatus, BoundingRect,
    NewAnnotation, PageMetadata, StoreStats, TextContext,
};
use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};

const SELECT_COLUMNS: &str = r#"
    SELECT id, url, domain, selector, original_text, text_hash, annotation_type,
           color, summary, user_comment, timestamp, last_modified, position_json,
           context_before, context_after, status, page_title, page_url, user_id
    FROM annotations
"#;

/// Durable annotation store. Cheap to clone; clones share one pool.
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Open the database and set up the schema.
    ///
    /// Any failure here is reported as `AppError::Initialization`.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config)
            .await
            .map_err(|e| AppError::Initialization(e.to_string()))?;

        tracing::info!(url = %config.url, "Annotation store opened");
        Ok(Self { pool })
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        super::initialize_schema(&pool)
            .await
            .map_err(|e| AppError::Initialization(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Insert a new record, generating id and timestamps
    pub async fn create(&self, data: NewAnnotation) -> Result<AnnotationRecord> {
        data.validate()?;

        let id = data
            .id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = data.created_at.map(|t| from_micros(t.timestamp_micros()));
        let record = NewAnnotation { created_at, ..data }.into_record(id, now_micros());
        let position_json = record
            .position
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO annotations (
                id, url, domain, selector, original_text, text_hash, annotation_type,
                color, summary, user_comment, timestamp, last_modified, position_json,
                context_before, context_after, status, page_title, page_url, user_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.domain)
        .bind(&record.selector)
        .bind(&record.original_text)
        .bind(&record.text_hash)
        .bind(record.annotation_type.as_str())
        .bind(&record.color)
        .bind(&record.summary)
        .bind(&record.user_comment)
        .bind(record.timestamp.timestamp_micros())
        .bind(record.last_modified.timestamp_micros())
        .bind(&position_json)
        .bind(&record.context.before)
        .bind(&record.context.after)
        .bind(record.status.as_str())
        .bind(&record.metadata.page_title)
        .bind(&record.metadata.page_url)
        .bind(&record.metadata.user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(AppError::Conflict(format!(
                    "Annotation already exists: {}",
                    record.id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(id = %record.id, url = %record.url, "Annotation created");

        self.get(&record.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Annotation vanished after insert: {}", record.id)))
    }

    /// Get an annotation by ID
    pub async fn get(&self, id: &str) -> Result<Option<AnnotationRecord>> {
        let row = sqlx::query_as::<_, AnnotationRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_record()).transpose()
    }

    /// Apply a patch inside one transaction and return the updated record
    pub async fn update(&self, id: &str, patch: AnnotationPatch) -> Result<AnnotationRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AnnotationRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;

        let mut record = match row {
            Some(row) => row.into_record()?,
            None => return Err(AppError::NotFound(format!("Annotation not found: {}", id))),
        };

        record.apply_patch(patch, now_micros())?;

        let position_json = record
            .position
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            UPDATE annotations SET
                selector = ?,
                original_text = ?,
                text_hash = ?,
                color = ?,
                summary = ?,
                user_comment = ?,
                last_modified = ?,
                position_json = ?,
                context_before = ?,
                context_after = ?,
                status = ?,
                page_title = ?,
                page_url = ?,
                user_id = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.selector)
        .bind(&record.original_text)
        .bind(&record.text_hash)
        .bind(&record.color)
        .bind(&record.summary)
        .bind(&record.user_comment)
        .bind(record.last_modified.timestamp_micros())
        .bind(&position_json)
        .bind(&record.context.before)
        .bind(&record.context.after)
        .bind(record.status.as_str())
        .bind(&record.metadata.page_title)
        .bind(&record.metadata.page_url)
        .bind(&record.metadata.user_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(id, status = %record.status, "Annotation updated");
        Ok(record)
    }

    /// Remove a record permanently
    pub async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM annotations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Annotation not found: {}", id)));
        }

        tracing::debug!(id, "Annotation deleted");
        Ok(())
    }

    /// List annotations matching a filter, newest first.
    ///
    /// Filtering and ordering happen over the whole table before
    /// `limit`/`offset` are applied.
    pub async fn query(&self, filter: &AnnotationFilter) -> Result<Vec<AnnotationRecord>> {
        let mut sql = String::from(SELECT_COLUMNS);
        sql.push_str(" WHERE 1=1");
        push_conditions(&mut sql, filter);

        sql.push_str(" ORDER BY timestamp DESC, rowid DESC");

        match (filter.limit, filter.offset) {
            (Some(_), _) => sql.push_str(" LIMIT ? OFFSET ?"),
            (None, Some(_)) => sql.push_str(" LIMIT -1 OFFSET ?"),
            (None, None) => {}
        }

        let mut q = sqlx::query_as::<_, AnnotationRow>(&sql);

        if let Some(ref url) = filter.url {
            q = q.bind(url);
        }
        if let Some(ref domain) = filter.domain {
            q = q.bind(domain.to_ascii_lowercase());
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref needle) = filter.text_contains {
            let pattern = like_pattern(needle);
            q = q.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                q = q.bind(i64::from(limit)).bind(i64::from(offset.unwrap_or(0)));
            }
            (None, Some(offset)) => {
                q = q.bind(i64::from(offset));
            }
            (None, None) => {}
        }

        let rows = q.fetch_all(&self.pool).await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// Count all records matching a filter, ignoring pagination
    pub async fn count(&self, filter: &AnnotationFilter) -> Result<u64> {
        let mut sql = String::from("SELECT COUNT(*) FROM annotations WHERE 1=1");
        push_conditions(&mut sql, filter);

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);

        if let Some(ref url) = filter.url {
            q = q.bind(url);
        }
        if let Some(ref domain) = filter.domain {
            q = q.bind(domain.to_ascii_lowercase());
        }
        if let Some(status) = filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref needle) = filter.text_contains {
            let pattern = like_pattern(needle);
            q = q.bind(pattern.clone()).bind(pattern.clone()).bind(pattern);
        }

        let (count,) = q.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Record counts per status
    pub async fn stats(&self) -> Result<StoreStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM annotations GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = StoreStats::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            stats.total += count;
            match status.parse::<AnnotationStatus>() {
                Ok(AnnotationStatus::Active) => stats.active += count,
                Ok(AnnotationStatus::Archived) => stats.archived += count,
                Ok(AnnotationStatus::Deleted) => stats.deleted += count,
                Err(_) => tracing::warn!(status = %status, count, "Unknown status in store"),
            }
        }

        Ok(stats)
    }
}

fn push_conditions(sql: &mut String, filter: &AnnotationFilter) {
    if filter.url.is_some() {
        sql.push_str(" AND url = ?");
    }
    if filter.domain.is_some() {
        sql.push_str(" AND domain = ?");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.text_contains.is_some() {
        sql.push_str(
            r" AND (original_text LIKE ? ESCAPE '\' OR summary LIKE ? ESCAPE '\' OR user_comment LIKE ? ESCAPE '\')",
        );
    }
}

/// `%needle%` with LIKE wildcards in the needle escaped
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Current time truncated to the stored precision
fn now_micros() -> DateTime<Utc> {
    from_micros(Utc::now().timestamp_micros())
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Internal row type for SQLite queries
#[derive(sqlx::FromRow)]
struct AnnotationRow {
    id: String,
    url: String,
    domain: String,
    selector: String,
    original_text: String,
    text_hash: String,
    annotation_type: String,
    color: Option<String>,
    summary: Option<String>,
    user_comment: Option<String>,
    timestamp: i64,
    last_modified: i64,
    position_json: Option<String>,
    context_before: String,
    context_after: String,
    status: String,
    page_title: String,
    page_url: String,
    user_id: Option<String>,
}

impl AnnotationRow {
    fn into_record(self) -> Result<AnnotationRecord> {
        let position: Option<BoundingRect> = self
            .position_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(AnnotationRecord {
            id: self.id,
            url: self.url,
            domain: self.domain,
            selector: self.selector,
            original_text: self.original_text,
            text_hash: self.text_hash,
            annotation_type: self.annotation_type.parse()?,
            color: self.color,
            summary: self.summary,
            user_comment: self.user_comment,
            timestamp: from_micros(self.timestamp),
            last_modified: from_micros(self.last_modified),
            position,
            context: TextContext {
                before: self.context_before,
                after: self.context_after,
            },
            status: self.status.parse()?,
            metadata: PageMetadata {
                page_title: self.page_title,
                page_url: self.page_url,
                user_id: self.user_id,
            },
        })
    }
}
