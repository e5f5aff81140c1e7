use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("self-edges are not allowed: {0}")]
    SelfEdge(String),

    #[error("unsupported schema version {found}; expected {expected}")]
    SchemaVersion { found: i64, expected: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
