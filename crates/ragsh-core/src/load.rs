//! Document loading: find supported files in a directory and extract their text
//!
//! Plain text is read as UTF-8, PDFs go through pdf-extract and Word files are
//! read straight out of `word/document.xml`. A file that fails to extract is
//! logged and skipped; the rest of the directory still loads.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use quick_xml::events::Event;

use crate::app::ProgressEvent;
use crate::{Config, RagError, Result};

/// Separator placed between documents in the corpus.
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// Maximum decompressed size read from `word/document.xml` (zip-bomb guard).
const MAX_DOCX_XML_BYTES: u64 = 64 * 1024 * 1024;

/// The document formats that can be loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Pdf,
    Word,
}

impl DocumentKind {
    /// Detect the kind from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(Self::PlainText),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Word),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Extract the textual content of a file of this kind.
    pub fn extract_text(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path).map_err(|e| file_error(path, e))?;
        let text = match self {
            Self::PlainText => String::from_utf8(bytes).map_err(|e| e.to_string()),
            Self::Pdf => extract_pdf(&bytes),
            Self::Word => extract_docx(&bytes),
        };
        text.map_err(|reason| file_error(path, reason))
    }
}

/// A loaded document.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub text: String,
}

impl Document {
    /// Load a single file, or `None` if its extension is not supported.
    pub fn load(path: &Path) -> Option<Result<Self>> {
        let kind = DocumentKind::from_path(path)?;
        Some(kind.extract_text(path).map(|text| Self {
            path: path.to_path_buf(),
            kind,
            text,
        }))
    }
}

/// Stats from loading a directory.
#[derive(Debug, Default)]
pub struct LoadStats {
    pub files_scanned: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    /// Files that had a supported extension but could not be read
    pub failures: Vec<RagError>,
}

/// All documents of a directory joined into one text.
#[derive(Debug, Default)]
pub struct Corpus {
    pub text: String,
    pub stats: LoadStats,
}

/// List the files directly inside `dir`, sorted by file name, hidden files excluded.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(file_error(dir, "not a directory"));
    }

    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .hidden(true)
        .max_depth(Some(1))
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_some_and(|t| t.is_file()) => {
                files.push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e),
        }
    }
    Ok(files)
}

/// Load every supported document in `dir` and join them into a corpus.
pub fn load_corpus(
    dir: &Path,
    config: &Config,
    progress: &dyn Fn(ProgressEvent),
) -> Result<Corpus> {
    let files = list_files(dir)?;
    let mut stats = LoadStats::default();
    let mut candidates = Vec::new();

    for path in files {
        stats.files_scanned += 1;
        progress(ProgressEvent::Scanning {
            count: stats.files_scanned,
        });

        if DocumentKind::from_path(&path).is_none() {
            stats.files_skipped += 1;
            continue;
        }

        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        if size > config.max_file_size {
            tracing::warn!(
                "Skipping {}: {} bytes exceeds max_file_size",
                path.display(),
                size
            );
            stats.files_skipped += 1;
            continue;
        }

        candidates.push(path);
    }

    let total = candidates.len();
    let mut texts = Vec::with_capacity(total);
    for (i, path) in candidates.iter().enumerate() {
        progress(ProgressEvent::Loading {
            current: i + 1,
            total,
            path,
        });

        match Document::load(path) {
            Some(Ok(document)) => {
                tracing::debug!(
                    "Loaded {} ({:?}, {} chars)",
                    path.display(),
                    document.kind,
                    document.text.chars().count()
                );
                stats.files_loaded += 1;
                texts.push(document.text);
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to load {}: {}", path.display(), e);
                stats.files_skipped += 1;
                stats.failures.push(e);
            }
            None => stats.files_skipped += 1,
        }
    }

    Ok(Corpus {
        text: texts.join(DOCUMENT_SEPARATOR),
        stats,
    })
}

fn file_error(path: &Path, reason: impl ToString) -> RagError {
    RagError::FileRead {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

fn extract_pdf(bytes: &[u8]) -> std::result::Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| format!("PDF extraction failed: {e}"))
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("not a Word file: {e}"))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| format!("word/document.xml: {e}"))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCX_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| format!("word/document.xml: {e}"))?;
    if xml.len() as u64 >= MAX_DOCX_XML_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }

    paragraph_text(&xml)
}

/// Collect the text runs of every `<w:p>`, ending each paragraph with a newline.
fn paragraph_text(xml: &[u8]) -> std::result::Result<String, String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" | b"br" | b"cr" => out.push('\n'),
                b"tab" => out.push('\t'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("malformed document.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
