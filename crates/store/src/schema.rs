//! SQLite schema for the knowledge store.

use crate::error::{Result, StoreError};
use rusqlite::Connection;
use std::path::Path;

pub const SCHEMA_VERSION: i64 = 1;

pub fn open_or_create(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    init(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS nodes (
            id TEXT PRIMARY KEY,
            node_type TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT NOT NULL,
            content TEXT NOT NULL,
            evidence TEXT NOT NULL DEFAULT '[]',
            source_agent TEXT NOT NULL DEFAULT '',
            workspace TEXT NOT NULL DEFAULT '',
            confidence REAL NOT NULL DEFAULT 0.5,
            debt_score REAL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(node_type);
        CREATE INDEX IF NOT EXISTS idx_nodes_agent ON nodes(source_agent);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_summary_key
            ON nodes(summary, node_type, workspace);

        CREATE TABLE IF NOT EXISTS node_edges (
            from_node TEXT NOT NULL,
            to_node TEXT NOT NULL,
            relation TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 0.5,
            properties TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (from_node, to_node, relation),
            CHECK (from_node <> to_node)
        );

        CREATE INDEX IF NOT EXISTS idx_edges_from ON node_edges(from_node);

        CREATE TABLE IF NOT EXISTS node_embeddings (
            node_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
            dim INTEGER NOT NULL,
            vector BLOB NOT NULL
        );

        -- Paths referenced by a node's evidence, for file-scoped deletes.
        CREATE TABLE IF NOT EXISTS node_files (
            node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
            file_path TEXT NOT NULL,
            PRIMARY KEY (node_id, file_path)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
            node_id UNINDEXED,
            title,
            summary,
            content
        );
        ",
    )?;

    let current: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();
    match current {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }
        Some(v) if v == SCHEMA_VERSION => {}
        Some(v) => {
            return Err(StoreError::SchemaVersion {
                found: v,
                expected: SCHEMA_VERSION,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_fresh_schema() {
        let conn = open_in_memory().unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn rejects_future_schema() {
        let conn = open_in_memory().unwrap();
        conn.execute("UPDATE schema_version SET version = 99", []).unwrap();
        let err = init(&conn).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersion { found: 99, .. }));
    }
}
