//! SQL migration definitions for the per-knowledge-base vector database.
//!
//! Migrations are applied in order on open. Each migration has a version
//! number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: documents with embedded vectors",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per indexed document; vector holds libSQL vector32 data
CREATE TABLE IF NOT EXISTS documents (
    id            TEXT PRIMARY KEY,
    content       TEXT NOT NULL,
    title         TEXT NOT NULL,
    source_url    TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    dims          INTEGER NOT NULL,
    vector        BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_source_url ON documents(source_url);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
