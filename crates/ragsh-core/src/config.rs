//! Configuration handling for .ragsh/config.json

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_OVERLAP,
    DEFAULT_CHUNK_SIZE, DEFAULT_DOCUMENTS_DIR, DEFAULT_EMBEDDING_MODEL, DEFAULT_INDEX_NAME,
    DEFAULT_LOG_FILE, DEFAULT_MAX_FILE_SIZE, DEFAULT_SYSTEM_PROMPT, DEFAULT_TOP_K, RagError,
    Result, discover,
};

/// Configuration stored in .ragsh/config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the documents, relative to the project root
    #[serde(default = "default_documents_dir")]
    pub documents_dir: PathBuf,

    /// Chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunk overlap in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Maximum document size to load (bytes)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Number of chunks retrieved per question
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Name the index is persisted under
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Log file, relative to the .ragsh folder
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Environment variable holding the API credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Which embedding backend to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"local"`
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Texts sent per request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Chat-completion settings for answering questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DOCUMENTS_DIR)
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_index_name() -> String {
    DEFAULT_INDEX_NAME.to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    1
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            system_prompt: default_system_prompt(),
            base_url: default_base_url(),
            timeout_secs: default_generation_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            documents_dir: default_documents_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            top_k: default_top_k(),
            index_name: default_index_name(),
            log_file: default_log_file(),
            api_key_env: default_api_key_env(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the .ragsh directory.
    pub fn load(root: &Path) -> Result<Self> {
        let path = discover::config_path(root);
        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save config to the .ragsh directory.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = discover::config_path(root);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be positive".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be positive".to_string()));
        }
        if self.embedding.batch_size == 0 {
            return Err(RagError::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }
        if self.index_name.is_empty() || self.index_name.contains(['/', '\\']) {
            return Err(RagError::Config(format!(
                "invalid index_name: {:?}",
                self.index_name
            )));
        }
        Ok(())
    }

    /// Absolute path of the documents directory.
    pub fn documents_path(&self, root: &Path) -> PathBuf {
        root.join(&self.documents_dir)
    }

    /// Absolute path of the log file.
    pub fn log_path(&self, root: &Path) -> PathBuf {
        discover::project_dir(root).join(&self.log_file)
    }

    /// Read the API credential from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .map_err(|_| RagError::Config(format!("{} environment variable not set", self.api_key_env)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.top_k, 2);
        assert_eq!(config.index_name, "genai-rag-shell-index");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"chunk_size": 800, "embedding": {"provider": "local"}}"#)
                .unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, DEFAULT_CHUNK_OVERLAP);
        assert_eq!(config.embedding.provider, "local");
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.generation.model, DEFAULT_CHAT_MODEL);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let config = Config {
            chunk_size: 100,
            chunk_overlap: 100,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(discover::project_dir(temp.path())).unwrap();

        let config = Config {
            top_k: 5,
            ..Config::default()
        };
        config.save(temp.path()).unwrap();

        let loaded = Config::load(temp.path()).unwrap();
        assert_eq!(loaded.top_k, 5);
        assert_eq!(loaded.documents_path(temp.path()), temp.path().join("documents"));
    }
}
