/// The name of the project folder (like .git)
pub const RAGSH_DIR: &str = ".ragsh";

/// Name the persisted index is stored under
pub const DEFAULT_INDEX_NAME: &str = "genai-rag-shell-index";

/// Directory scanned for documents, relative to the project root
pub const DEFAULT_DOCUMENTS_DIR: &str = "documents";

/// Log file, relative to the .ragsh folder
pub const DEFAULT_LOG_FILE: &str = "logfile.log";

/// Environment variable holding the API credential
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default OpenAI-compatible API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

/// Default chat model used to answer questions
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// System instruction sent with every question
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Default chunk size in characters
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default chunk overlap in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

/// Number of chunks retrieved per question
pub const DEFAULT_TOP_K: usize = 2;

/// Default max document size (50MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Shown instead of querying when the question is empty
pub const EMPTY_QUESTION_MESSAGE: &str = "Please enter a question.";
