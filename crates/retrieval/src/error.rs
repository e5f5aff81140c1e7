use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Store(#[from] taskwing_store::StoreError),

    #[error(transparent)]
    Llm(#[from] taskwing_llm::LlmError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
