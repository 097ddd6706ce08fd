//! ragsh-core: retrieval-augmented question answering over local documents
//!
//! This library loads documents from a directory, splits them into
//! overlapping chunks, embeds the chunks into a flat on-disk vector index and
//! answers questions by retrieving the nearest chunks and handing them to a
//! chat-completion model.

pub mod app;
pub mod chunk;
pub mod config;
pub mod consts;
pub mod discover;
pub mod embed;
pub mod generate;
pub mod index;
pub mod load;
mod openai;

use std::path::PathBuf;

pub use app::{BuildStats, ProgressCallback, ProgressEvent, RagApp, Reply};
pub use chunk::{Chunk, TextSplitter};
pub use config::Config;
pub use consts::*;
pub use discover::find_project_root;
pub use embed::{Embedder, create_embedder};
pub use generate::{AnswerGenerator, build_prompt};
pub use index::{IndexStore, SearchHit, VectorIndex};

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Not in a ragsh project (no .ragsh folder found)")]
    NotInProject,

    #[error("Already initialized: {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to read {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    #[error("Embedding service error: {0}")]
    EmbeddingService(String),

    #[error("Index not found at {0} (run 'ragsh index' to build it)")]
    IndexNotFound(PathBuf),

    #[error("Index at {path} is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Generation service error: {0}")]
    GenerationService(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RagError>;
