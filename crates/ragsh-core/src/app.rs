//! The question-answering pipeline: load, chunk, embed, index, retrieve, answer

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::generate::OpenAiChat;
use crate::load::{self, LoadStats};
use crate::{
    AnswerGenerator, Config, EMPTY_QUESTION_MESSAGE, Embedder, IndexStore, Result, SearchHit,
    TextSplitter, VectorIndex, create_embedder, discover,
};

/// Progress events emitted while building the index.
#[derive(Debug, Clone)]
pub enum ProgressEvent<'a> {
    /// Scanning the documents directory.
    Scanning { count: usize },
    /// Loading a specific document.
    Loading {
        current: usize,
        total: usize,
        path: &'a Path,
    },
    /// Generating embeddings.
    Embedding { current: usize, total: usize },
}

/// Type alias for progress callback.
pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send>;

/// Outcome of a question.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// The question was empty; nothing was searched or generated.
    NeedQuestion,
    /// The generated answer and the chunks it was grounded on.
    Answer { text: String, sources: Vec<SearchHit> },
}

impl Reply {
    /// Text to show the user.
    pub fn message(&self) -> &str {
        match self {
            Reply::NeedQuestion => EMPTY_QUESTION_MESSAGE,
            Reply::Answer { text, .. } => text,
        }
    }
}

/// Stats from an index build.
#[derive(Debug, Default)]
pub struct BuildStats {
    pub load: LoadStats,
    pub corpus_chars: usize,
    pub chunks_created: usize,
}

/// A project's pipeline: its config, the services it calls and its index.
pub struct RagApp {
    root: PathBuf,
    config: Config,
    embedder: Box<dyn Embedder>,
    generator: Box<dyn AnswerGenerator>,
    store: IndexStore,
    progress_callback: Option<ProgressCallback>,
}

impl RagApp {
    pub fn new(
        root: PathBuf,
        config: Config,
        embedder: Box<dyn Embedder>,
        generator: Box<dyn AnswerGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let store = IndexStore::new(discover::index_dir(&root), config.index_name.clone());

        Ok(Self {
            root,
            config,
            embedder,
            generator,
            store,
            progress_callback: None,
        })
    }

    /// Open the project at `root` with the services named in its config.
    pub fn open(root: PathBuf) -> Result<Self> {
        let config = Config::load(&root)?;
        Self::from_config(root, config)
    }

    /// Build the services named in `config` for the project at `root`.
    pub fn from_config(root: PathBuf, config: Config) -> Result<Self> {
        let embedder = create_embedder(&config)?;
        let generator = Box::new(OpenAiChat::new(&config)?);
        Self::new(root, config, embedder, generator)
    }

    /// Set a callback to receive progress updates during index builds.
    pub fn set_progress_callback(&mut self, callback: ProgressCallback) {
        self.progress_callback = Some(callback);
    }

    /// Emit a progress event if a callback is registered.
    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(ref callback) = self.progress_callback {
            callback(event);
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Rebuild the index from every document in the documents directory.
    ///
    /// The previous index stays in place until the new one is fully embedded
    /// and written.
    pub fn build_index(&self) -> Result<BuildStats> {
        let progress: &dyn Fn(ProgressEvent) = &|event| self.emit_progress(event);
        let documents = self.config.documents_path(&self.root);

        let corpus = load::load_corpus(&documents, &self.config, progress)?;
        if corpus.text.is_empty() {
            tracing::warn!("No document text found in {}", documents.display());
        }

        let splitter = TextSplitter::from_config(&self.config)?;
        let chunks = splitter.split(&corpus.text);
        tracing::info!(
            "Chunking done: {} chunks from {} documents",
            chunks.len(),
            corpus.stats.files_loaded
        );

        let index = self.store.build(&chunks, self.embedder.as_ref(), progress)?;
        tracing::info!(
            "Embedding done: index '{}' holds {} vectors of dimension {}",
            self.store.name(),
            index.len(),
            index.dimension()
        );

        Ok(BuildStats {
            corpus_chars: corpus.text.chars().count(),
            chunks_created: chunks.len(),
            load: corpus.stats,
        })
    }

    /// Load the persisted index into memory.
    pub fn load_index(&self) -> Result<Arc<VectorIndex>> {
        self.store.load()
    }

    /// The `top_k` chunks nearest to `question`.
    pub fn retrieve(&self, question: &str) -> Result<Vec<SearchHit>> {
        self.store
            .search(question, self.embedder.as_ref(), self.config.top_k)
    }

    /// Answer a question from the indexed documents.
    pub fn ask(&self, question: &str) -> Result<Reply> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(Reply::NeedQuestion);
        }

        tracing::info!("Query received: {}", question);

        let sources = self.retrieve(question)?;
        tracing::info!(
            "Search results: {:?}",
            sources
                .iter()
                .map(|hit| (hit.position, hit.score))
                .collect::<Vec<_>>()
        );

        let context: Vec<&str> = sources.iter().map(|hit| hit.text.as_str()).collect();
        let answer = self.generator.generate(question, &context)?;
        let text = answer.trim().to_string();
        tracing::info!("Response: {}", text);

        Ok(Reply::Answer { text, sources })
    }
}
