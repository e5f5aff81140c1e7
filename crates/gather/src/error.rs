use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatherError>;

#[derive(Error, Debug)]
pub enum GatherError {
    #[error("context budget exceeded: requested {requested} tokens, {remaining} remaining")]
    BudgetExceeded { requested: usize, remaining: usize },

    #[error("no context budget supplied for gather over {0}")]
    MissingBudget(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("symbol index error: {0}")]
    SymbolIndex(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}
