#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("llm provider error: {0}")]
    Llm(#[from] crate::llm::LlmError),
    #[error("maximum conversation turns reached")]
    MaxTurnsReached,
    #[error("cancelled")]
    Cancelled,
}
