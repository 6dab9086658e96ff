//! Error taxonomy shared by every component.
//!
//! Component boundaries return [`RagError`]. Collaborator implementations
//! (HTTP clients, extractors, the SQL executor) use `anyhow` internally and
//! are converted into the matching variant where they cross into a component.
//!
//! | Variant | Severity |
//! |---------|----------|
//! | [`RagError::Configuration`] | fatal, propagated immediately |
//! | [`RagError::Ingestion`] | recoverable, one per failed source |
//! | [`RagError::Retrieval`] | recoverable, absorbed by the fusion engine |
//! | [`RagError::AgentExhausted`] | recoverable, reported as text |
//! | [`RagError::Persistence`] | fatal for the triggering call |
//! | [`RagError::CorruptedStore`] | degraded load, reported not raised |
//! | [`RagError::Embedding`] | recoverable, the embedding service failed |

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which retrieval path produced a [`RagError::Retrieval`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Vector,
    Structured,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Vector => write!(f, "vector"),
            Backend::Structured => write!(f, "structured"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("ingestion failed for {source_ref}: {message}")]
    Ingestion { source_ref: String, message: String },

    #[error("{backend} retrieval failed: {message}")]
    Retrieval { backend: Backend, message: String },

    #[error("structured query agent gave up after {iterations} iterations")]
    AgentExhausted {
        iterations: usize,
        last_observation: Option<String>,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted store: {0}")]
    CorruptedStore(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("generation failed: {0}")]
    Generation(String),
}

impl RagError {
    pub fn config(msg: impl Into<String>) -> Self {
        RagError::Configuration(msg.into())
    }

    pub fn ingestion(source_ref: impl Into<String>, err: impl fmt::Display) -> Self {
        RagError::Ingestion {
            source_ref: source_ref.into(),
            message: err.to_string(),
        }
    }

    pub fn retrieval(backend: Backend, err: impl fmt::Display) -> Self {
        RagError::Retrieval {
            backend,
            message: err.to_string(),
        }
    }

    /// Fatal errors abort the surrounding batch or query instead of
    /// degrading to a partial result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::Configuration(_) | RagError::Persistence { .. }
        )
    }
}

pub type RagResult<T> = std::result::Result<T, RagError>;
