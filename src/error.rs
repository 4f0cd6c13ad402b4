//! Typed errors for the store and index layers.
//!
//! Failures are caught at the smallest enclosing operation, converted to one
//! of these kinds, and returned as data. Callers branch on the kind rather
//! than parsing message text; generation failures never appear here — they
//! surface as terminal stream items (see [`crate::query`]).

/// Vector store lifecycle errors (open/create/add/search).
#[derive(Debug)]
pub enum StoreError {
    /// No persistent index exists at the given path; recoverable by creation.
    NotFound,
    /// The existing index was built under a different embedding backend.
    /// Treated as `NotFound` for recovery purposes, never fatal on its own.
    Incompatible { stored: String, configured: String },
    /// Creating a fresh store failed; no partial store is left behind.
    CreateFailed(String),
    /// Appending to an open store failed; pre-add content is intact.
    AddFailed(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "no vector store found"),
            StoreError::Incompatible { stored, configured } => write!(
                f,
                "index is incompatible with the configured embedding backend \
                 (stored: {}, configured: {})",
                stored, configured
            ),
            StoreError::CreateFailed(cause) => {
                write!(f, "failed to create vector store: {}", cause)
            }
            StoreError::AddFailed(cause) => {
                write!(f, "failed to add chunks to vector store: {}", cause)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Whether recovery is "pretend the store does not exist": both
    /// `NotFound` and `Incompatible` recover by creating a fresh store.
    pub fn is_recoverable_as_missing(&self) -> bool {
        matches!(self, StoreError::NotFound | StoreError::Incompatible { .. })
    }
}

/// Rebuild-level errors reported by the index manager.
#[derive(Debug)]
pub enum IndexError {
    /// No documents to index and no existing store to reuse. Fatal for the
    /// rebuild attempt only; the process keeps running.
    NoDataAvailable,
    /// An existing index was refused because `index.protect_on_mismatch` is
    /// set and the embedding backend changed.
    IncompatibleIndex(String),
    /// Store creation failed.
    CreateFailed(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::NoDataAvailable => {
                write!(f, "no documents to load and no existing vector store")
            }
            IndexError::IncompatibleIndex(detail) => write!(
                f,
                "existing index rejected (protect_on_mismatch is set): {}",
                detail
            ),
            IndexError::CreateFailed(cause) => {
                write!(f, "could not create vector store: {}", cause)
            }
        }
    }
}

impl std::error::Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incompatible_recovers_as_missing() {
        let err = StoreError::Incompatible {
            stored: "nomic-embed-text".to_string(),
            configured: "mxbai-embed-large".to_string(),
        };
        assert!(err.is_recoverable_as_missing());
        assert!(StoreError::NotFound.is_recoverable_as_missing());
        assert!(!StoreError::AddFailed("io".to_string()).is_recoverable_as_missing());
    }

    #[test]
    fn display_carries_cause() {
        let err = StoreError::CreateFailed("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
        let err = IndexError::NoDataAvailable;
        assert!(err.to_string().contains("no documents"));
    }
}
