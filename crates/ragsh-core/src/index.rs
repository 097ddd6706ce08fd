//! Flat vector index: exact cosine search over every entry, persisted as one file.
//!
//! File layout: magic `RAGX` | format version (u32 LE) | blake3 of body (32
//! bytes) | body (bincode). Saves write a temporary file next to the target and
//! rename it into place, so a failed build leaves the previous index intact.
//! Saves hold an exclusive advisory lock on `<name>.lock`, loads a shared one.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::app::ProgressEvent;
use crate::{Chunk, Embedder, RagError, Result};

const MAGIC: &[u8; 4] = b"RAGX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + blake3::OUT_LEN;

/// A chunk's text paired with its (normalized) embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub text: String,
    pub vector: Vec<f32>,
}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Position of the entry in the index (chunk order)
    pub position: usize,
    /// Cosine similarity to the query
    pub score: f32,
    pub text: String,
}

/// In-memory index over all entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorIndex {
    model: String,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Embed every chunk and index the results.
    pub fn build(chunks: &[Chunk], embedder: &dyn Embedder) -> Result<Self> {
        Self::build_with_progress(chunks, embedder, &|_| {})
    }

    pub fn build_with_progress(
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        progress: &dyn Fn(ProgressEvent),
    ) -> Result<Self> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(embedder.batch_size().max(1)) {
            let embedded = embedder.embed_batch(batch)?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingService(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
            progress(ProgressEvent::Embedding {
                current: vectors.len(),
                total: texts.len(),
            });
        }

        Self::from_parts(
            embedder.model_name(),
            texts.into_iter().map(String::from).zip(vectors),
        )
    }

    /// Index precomputed vectors. All vectors must share one dimension.
    pub fn from_parts(
        model: &str,
        items: impl IntoIterator<Item = (String, Vec<f32>)>,
    ) -> Result<Self> {
        let mut dimension = None;
        let mut entries = Vec::new();

        for (text, mut vector) in items {
            let expected = *dimension.get_or_insert(vector.len());
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(RagError::EmbeddingService(format!(
                    "embedding for entry {} has non-finite components",
                    entries.len()
                )));
            }
            normalize(&mut vector);
            entries.push(IndexEntry { text, vector });
        }

        Ok(Self {
            model: model.to_string(),
            dimension: dimension.unwrap_or(0),
            entries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the `k` entries most similar to `query`, best first. Equal
    /// scores are ordered by position.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if query.iter().any(|x| !x.is_finite()) {
            return Err(RagError::EmbeddingService(
                "query embedding has non-finite components".to_string(),
            ));
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for (position, entry) in self.entries.iter().enumerate() {
            heap.push(Candidate {
                score: dot(&query, &entry.vector),
                position,
            });
            if heap.len() > k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| SearchHit {
                position: c.position,
                score: c.score,
                text: self.entries[c.position].text.clone(),
            })
            .collect())
    }

    /// Write the index to `path`, replacing any existing file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = bincode::serialize(self).map_err(std::io::Error::other)?;
        let checksum = blake3::hash(&body);

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = dir.join(format!(".{}.tmp-{}", file_name, std::process::id()));

        let version = FORMAT_VERSION.to_le_bytes();
        let parts: [&[u8]; 4] = [MAGIC, &version, checksum.as_bytes(), &body];
        let written = write_synced(&tmp, &parts)
            .and_then(|()| fs::rename(&tmp, path))
            .and_then(|()| sync_dir(dir));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    /// Read an index written by [`VectorIndex::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::IndexNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        decode(&bytes).map_err(|reason| RagError::IndexCorrupt {
            path: path.to_path_buf(),
            reason,
        })
    }
}

fn decode(bytes: &[u8]) -> std::result::Result<VectorIndex, String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("file too small ({} bytes)", bytes.len()));
    }
    if &bytes[..4] != MAGIC {
        return Err("bad magic".to_string());
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {version}"));
    }

    let body = &bytes[HEADER_LEN..];
    if blake3::hash(body).as_bytes()[..] != bytes[8..HEADER_LEN] {
        return Err("checksum mismatch".to_string());
    }

    let index: VectorIndex =
        bincode::deserialize(body).map_err(|e| format!("undecodable body: {e}"))?;
    if index
        .entries
        .iter()
        .any(|e| e.vector.iter().any(|x| !x.is_finite()))
    {
        return Err("entry has non-finite vector components".to_string());
    }
    if let Some(entry) = index.entries.iter().find(|e| e.vector.len() != index.dimension) {
        return Err(format!(
            "entry has dimension {}, index declares {}",
            entry.vector.len(),
            index.dimension
        ));
    }
    Ok(index)
}

fn write_synced(path: &Path, parts: &[&[u8]]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    for part in parts {
        file.write_all(part)?;
    }
    file.sync_all()
}

/// Flush a directory entry change (the rename) to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// L2 normalize a vector in place; zero vectors are left alone.
fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Heap entry ordered so the worst candidate is the maximum: lower score, then
/// higher position.
#[derive(Debug)]
struct Candidate {
    score: f32,
    position: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.position.cmp(&other.position))
    }
}

/// The persisted index under a fixed name, plus the copy resident in memory.
pub struct IndexStore {
    dir: PathBuf,
    name: String,
    resident: RwLock<Option<Arc<VectorIndex>>>,
    build_lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            resident: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the index file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.idx", self.name))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.name))
    }

    /// Rebuild from scratch: embed every chunk, persist, then make the new
    /// index resident.
    pub fn build(
        &self,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
        progress: &dyn Fn(ProgressEvent),
    ) -> Result<Arc<VectorIndex>> {
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let index = VectorIndex::build_with_progress(chunks, embedder, progress)?;
        self.persist(index)
    }

    /// Persist an already built index under this store's name.
    pub fn save(&self, index: VectorIndex) -> Result<Arc<VectorIndex>> {
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.persist(index)
    }

    fn persist(&self, index: VectorIndex) -> Result<Arc<VectorIndex>> {
        fs::create_dir_all(&self.dir)?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock.lock_exclusive()?;

        let saved = index.save(&self.path());
        let _ = lock.unlock();
        saved?;

        tracing::debug!(
            "Saved index '{}' ({} entries) to {}",
            self.name,
            index.len(),
            self.path().display()
        );

        let index = Arc::new(index);
        *self.resident.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        Ok(index)
    }

    /// Read the persisted index from disk and make it resident.
    pub fn load(&self) -> Result<Arc<VectorIndex>> {
        let lock = match File::open(self.lock_path()) {
            Ok(file) => {
                file.lock_shared()?;
                Some(file)
            }
            Err(_) => None,
        };

        let loaded = VectorIndex::load(&self.path());
        if let Some(lock) = lock {
            let _ = lock.unlock();
        }

        let index = Arc::new(loaded?);
        *self.resident.write().unwrap_or_else(PoisonError::into_inner) = Some(index.clone());
        Ok(index)
    }

    /// The resident index, if one has been built or loaded.
    pub fn resident(&self) -> Option<Arc<VectorIndex>> {
        self.resident
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The resident index, loading it from disk first if needed.
    pub fn get(&self) -> Result<Arc<VectorIndex>> {
        match self.resident() {
            Some(index) => Ok(index),
            None => self.load(),
        }
    }

    /// Embed `query` and return the `k` nearest entries.
    pub fn search(&self, query: &str, embedder: &dyn Embedder, k: usize) -> Result<Vec<SearchHit>> {
        let index = self.get()?;
        if !index.is_empty() && index.model() != embedder.model_name() {
            return Err(RagError::Config(format!(
                "index '{}' was built with model '{}' but queries use '{}'; rebuild the index",
                self.name,
                index.model(),
                embedder.model_name()
            )));
        }

        let vector = embedder.embed(query)?;
        index.search_vector(&vector, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TextSplitter;
    use crate::embed::test_support::WordEmbedder;

    const CORPUS: &str = "Paris is the capital of France.\n\nBerlin is the capital of Germany.";

    fn sample_index() -> VectorIndex {
        VectorIndex::from_parts(
            "test",
            vec![
                ("east".to_string(), vec![1.0, 0.0]),
                ("north".to_string(), vec![0.0, 2.0]),
                ("north-east".to_string(), vec![1.0, 1.0]),
                ("also east".to_string(), vec![3.0, 0.0]),
            ],
        )
        .unwrap()
    }

    fn texts(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.text.as_str()).collect()
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let hits = index.search_vector(&[0.1, 1.0], 2).unwrap();
        assert_eq!(texts(&hits), vec!["north", "north-east"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_ties_broken_by_position() {
        let index = sample_index();
        let hits = index.search_vector(&[5.0, 0.0], 2).unwrap();
        assert_eq!(texts(&hits), vec!["east", "also east"]);
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_k_larger_than_index_returns_everything() {
        let index = sample_index();
        let hits = index.search_vector(&[1.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_k_zero_and_empty_index() {
        assert!(sample_index().search_vector(&[1.0, 0.0], 0).unwrap().is_empty());

        let empty = VectorIndex::from_parts("test", Vec::new()).unwrap();
        assert!(empty.search_vector(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = sample_index();
        let result = index.search_vector(&[1.0, 0.0, 0.0], 1);
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));

        let mixed = VectorIndex::from_parts(
            "test",
            vec![("a".to_string(), vec![1.0]), ("b".to_string(), vec![1.0, 2.0])],
        );
        assert!(matches!(mixed, Err(RagError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_non_finite_vectors_are_rejected() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let result = VectorIndex::from_parts(
                "test",
                vec![
                    ("fine".to_string(), vec![1.0, 0.0]),
                    ("broken".to_string(), vec![bad, 1.0]),
                ],
            );
            assert!(matches!(result, Err(RagError::EmbeddingService(_))));

            let result = sample_index().search_vector(&[bad, 0.0], 2);
            assert!(matches!(result, Err(RagError::EmbeddingService(_))));
        }
    }

    #[test]
    fn test_save_creates_parent_dirs_and_syncs_them() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("a").join("b").join("test.idx");
        sample_index().save(&nested).unwrap();
        assert_eq!(VectorIndex::load(&nested).unwrap(), sample_index());

        sync_dir(temp.path()).unwrap();
        #[cfg(unix)]
        assert!(sync_dir(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_load_rejects_non_finite_vectors() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("nan.idx");
        let mut index = sample_index();
        index.entries[0].vector[0] = f32::NAN;
        index.save(&path).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn test_save_load_preserves_search() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("idx").join("test.idx");
        let index = sample_index();

        index.save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();

        assert_eq!(loaded, index);
        for query in [[1.0, 0.0], [0.3, 0.7], [-1.0, 0.5]] {
            assert_eq!(
                loaded.search_vector(&query, 3).unwrap(),
                index.search_vector(&query, 3).unwrap()
            );
        }
    }

    #[test]
    fn test_load_missing_index() {
        let temp = tempfile::tempdir().unwrap();
        let result = VectorIndex::load(&temp.path().join("never-saved.idx"));
        assert!(matches!(result, Err(RagError::IndexNotFound(_))));
    }

    #[test]
    fn test_load_corrupt_index() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("test.idx");
        sample_index().save(&path).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::IndexCorrupt { .. })
        ));

        fs::write(&path, b"RAG").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::IndexCorrupt { .. })
        ));

        fs::write(&path, vec![0u8; 64]).unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(RagError::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("test.idx");
        sample_index().save(&path).unwrap();
        sample_index().save(&path).unwrap();

        let names: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["test.idx".to_string()]);
    }

    #[test]
    fn test_build_embeds_in_batches() {
        let splitter = TextSplitter::new(40, 0).unwrap();
        let chunks = splitter.split(CORPUS);
        assert_eq!(chunks.len(), 2);

        let embedder = WordEmbedder::default();
        let events = Mutex::new(Vec::new());
        let index = VectorIndex::build_with_progress(&chunks, &embedder, &|event| {
            if let ProgressEvent::Embedding { current, total } = event {
                events.lock().unwrap().push((current, total));
            }
        })
        .unwrap();

        assert_eq!(index.len(), 2);
        assert_eq!(index.model(), "test-words");
        assert_eq!(index.entries()[1].text, chunks[1].text);
        assert_eq!(*events.lock().unwrap(), vec![(2, 2)]);
    }

    #[test]
    fn test_store_search_finds_berlin() {
        let temp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(temp.path(), "test-index");
        let embedder = WordEmbedder::default();

        let chunks = TextSplitter::new(40, 0).unwrap().split(CORPUS);
        store.build(&chunks, &embedder, &|_| {}).unwrap();

        let hits = store
            .search("What is the capital of Germany?", &embedder, 1)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("Berlin"));
    }

    #[test]
    fn test_default_settings_keep_corpus_whole() {
        let temp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(temp.path(), crate::DEFAULT_INDEX_NAME);
        let embedder = WordEmbedder::default();

        let chunks = TextSplitter::from_config(&crate::Config::default())
            .unwrap()
            .split(CORPUS);
        assert_eq!(chunks.len(), 1);
        store.build(&chunks, &embedder, &|_| {}).unwrap();

        let hits = store
            .search("What is the capital of Germany?", &embedder, crate::DEFAULT_TOP_K)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, CORPUS);
        assert!(store.path().ends_with("genai-rag-shell-index.idx"));
    }

    #[test]
    fn test_store_loads_from_disk_when_not_resident() {
        let temp = tempfile::tempdir().unwrap();
        let embedder = WordEmbedder::default();
        let chunks = TextSplitter::new(40, 0).unwrap().split(CORPUS);

        let writer = IndexStore::new(temp.path(), "shared");
        writer.build(&chunks, &embedder, &|_| {}).unwrap();

        let reader = IndexStore::new(temp.path(), "shared");
        assert!(reader.resident().is_none());
        let hits = reader.search("France", &embedder, 2).unwrap();
        assert!(reader.resident().is_some());
        assert_eq!(
            hits,
            writer.search("France", &embedder, 2).unwrap()
        );
        assert!(hits[0].text.contains("Paris"));
    }

    #[test]
    fn test_store_missing_index_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(temp.path().join("index"), "missing");
        let embedder = WordEmbedder::default();

        let result = store.search("anything", &embedder, 2);
        assert!(matches!(result, Err(RagError::IndexNotFound(_))));
        assert_eq!(embedder.calls(), 0);
    }

    #[test]
    fn test_store_rejects_other_model() {
        let temp = tempfile::tempdir().unwrap();
        let store = IndexStore::new(temp.path(), "other");
        store
            .save(VectorIndex::from_parts("some-other-model", vec![("x".to_string(), vec![1.0])]).unwrap())
            .unwrap();

        let result = store.search("x", &WordEmbedder::default(), 1);
        assert!(matches!(result, Err(RagError::Config(_))));
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let embedder = WordEmbedder::default();
        let chunks = TextSplitter::new(40, 10).unwrap().split(CORPUS);

        let first = IndexStore::new(temp.path(), "a");
        let second = IndexStore::new(temp.path(), "b");
        first.build(&chunks, &embedder, &|_| {}).unwrap();
        second.build(&chunks, &embedder, &|_| {}).unwrap();
        first.build(&chunks, &embedder, &|_| {}).unwrap();

        for query in ["capital", "Germany", "Paris France"] {
            assert_eq!(
                first.search(query, &embedder, 2).unwrap(),
                second.search(query, &embedder, 2).unwrap()
            );
        }
    }
}
