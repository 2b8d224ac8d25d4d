//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Annotation records (highlights and notes)
CREATE TABLE IF NOT EXISTS annotations (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    domain TEXT NOT NULL DEFAULT '',
    -- Structural path at creation, advisory only
    selector TEXT NOT NULL DEFAULT '',
    original_text TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    -- 'highlight' or 'note'
    annotation_type TEXT NOT NULL DEFAULT 'highlight',
    color TEXT,
    summary TEXT,
    user_comment TEXT,
    -- Microseconds since the Unix epoch
    timestamp INTEGER NOT NULL,
    last_modified INTEGER NOT NULL,
    -- Bounding rect at creation (JSON object)
    position_json TEXT,
    -- Text quote context for re-anchoring
    context_before TEXT NOT NULL DEFAULT '',
    context_after TEXT NOT NULL DEFAULT '',
    -- 'active', 'archived' or 'deleted'
    status TEXT NOT NULL DEFAULT 'active',
    page_title TEXT NOT NULL DEFAULT '',
    page_url TEXT NOT NULL DEFAULT '',
    user_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_annotations_url ON annotations(url);
CREATE INDEX IF NOT EXISTS idx_annotations_domain ON annotations(domain);
CREATE INDEX IF NOT EXISTS idx_annotations_status ON annotations(status);
CREATE INDEX IF NOT EXISTS idx_annotations_timestamp ON annotations(timestamp);
"#;
