//! Core data models used throughout the engine.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the indexing and answering pipeline.

use std::path::PathBuf;

/// File format a document was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Txt,
    Docx,
}

impl SourceFormat {
    /// Map a lowercase file extension to a format. `None` means the file
    /// is not ingested.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "pdf" => Some(SourceFormat::Pdf),
            "txt" => Some(SourceFormat::Txt),
            "doc" | "docx" => Some(SourceFormat::Docx),
            _ => None,
        }
    }
}

/// Raw text of one loaded file. Produced by the loader, consumed by the
/// chunker, not persisted.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub source_path: PathBuf,
    pub format: SourceFormat,
}

/// A bounded segment of a document's text, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_path: String,
    pub chunk_index: i64,
    /// Byte offset of this chunk's start in the source document text.
    pub offset: usize,
    pub text: String,
    pub hash: String,
}

/// A chunk ranked by similarity to a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// One role-tagged message of a chat conversation.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// How a query is answered.
///
/// `Retrieve` runs the retrieval chain (RAG); `Generate` continues the
/// session's single-shot generation context; `Chat` continues the session's
/// message history. All three stream through the same controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Retrieve,
    Generate,
    Chat,
}
