#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("invalid query: {0}")]
    QueryInvalid(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal index error: {0}")]
    Internal(String),
}
