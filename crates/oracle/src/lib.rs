//! The Oracle tool-calling agent loop (C9) and its Librarian summarisation
//! subagent (C10). Both sit behind the [`llm::LlmClient`] trait boundary so
//! the actual provider integration lives in `vault-server`.

mod citations;
mod error;
pub mod librarian;
pub mod llm;
mod oracle;
mod xml_fallback;

pub use citations::{extract_citations, Citation};
pub use error::OracleError;
pub use librarian::{Librarian, LibrarianChunk, SummariseInput};
pub use llm::{LlmClient, LlmError, LlmOptions, LlmResponse, Message, MockLlmClient, ToolCallRequest};
pub use oracle::{CancelHandle, Chunk, Oracle, OracleQuery, MAX_TURNS};
pub use xml_fallback::extract_xml_tool_calls;
