//! SQLite schema definition.

/// Complete database schema for the document store.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Documents
-- ============================================================================

-- One row per stored document; collections partition patients and
-- clinical records.
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body TEXT NOT NULL,                          -- JSON object
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, id),
    CHECK (json_valid(body) AND json_type(body) = 'object'),
    CHECK (length(id) > 0)
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_active
    ON documents(collection, json_extract(body, '$.active'));
"#;
