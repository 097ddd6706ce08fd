//! End-to-end runs of the pipeline against a scratch project directory.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ragsh_core::{
    AnswerGenerator, Config, Embedder, RagApp, RagError, Reply, Result, build_prompt, discover,
};

const DIM: usize = 4096;

/// Hashes each lowercase word into one of `DIM` buckets.
struct HashingEmbedder;

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; DIM];
                for word in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| !w.is_empty())
                {
                    let hash = blake3::hash(word.to_lowercase().as_bytes());
                    let mut bucket = [0u8; 4];
                    bucket.copy_from_slice(&hash.as_bytes()[..4]);
                    vector[u32::from_le_bytes(bucket) as usize % DIM] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Echoes the prompt it would have sent, so tests can inspect it.
#[derive(Default)]
struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
}

impl AnswerGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    fn generate(&self, question: &str, context: &[&str]) -> Result<String> {
        let prompt = build_prompt(question, context);
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok(prompt)
    }
}

fn init(root: &Path) -> Config {
    discover::init_project(root).unwrap();
    let config = Config {
        chunk_size: 60,
        chunk_overlap: 10,
        top_k: 1,
        ..Config::default()
    };
    config.save(root).unwrap();
    std::fs::create_dir_all(config.documents_path(root)).unwrap();
    Config::load(root).unwrap()
}

fn write_doc(root: &Path, config: &Config, name: &str, contents: &[u8]) {
    std::fs::write(config.documents_path(root).join(name), contents).unwrap();
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    );
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn app(root: &Path, config: &Config) -> (RagApp, Arc<EchoGenerator>) {
    let generator = Arc::new(EchoGenerator::default());
    let app = RagApp::new(
        root.to_path_buf(),
        config.clone(),
        Box::new(HashingEmbedder),
        Box::new(generator.clone()),
    )
    .unwrap();
    (app, generator)
}

fn answer(reply: Reply) -> (String, Vec<ragsh_core::SearchHit>) {
    match reply {
        Reply::Answer { text, sources } => (text, sources),
        Reply::NeedQuestion => panic!("expected an answer"),
    }
}

#[test]
fn test_question_is_answered_from_mixed_documents() {
    let temp = tempfile::tempdir().unwrap();
    let config = init(temp.path());
    write_doc(temp.path(), &config, "france.txt", b"Paris is the capital of France.");
    write_doc(
        temp.path(),
        &config,
        "germany.docx",
        &docx(&["Berlin is the capital of Germany."]),
    );

    let (app, generator) = app(temp.path(), &config);
    let stats = app.build_index().unwrap();
    assert_eq!(stats.load.files_loaded, 2);
    assert!(stats.chunks_created >= 2);

    let (text, sources) = answer(app.ask("Which city is the capital of Germany?").unwrap());
    assert_eq!(sources.len(), 1);
    assert!(sources[0].text.contains("Berlin"));
    assert!(text.starts_with("Answer the question based on the following documents context:"));
    assert!(text.ends_with("Question: Which city is the capital of Germany?\nAnswer:"));
    assert_eq!(generator.prompts.lock().unwrap().len(), 1);
}

#[test]
fn test_persisted_index_is_reused_by_a_new_app() {
    let temp = tempfile::tempdir().unwrap();
    let config = init(temp.path());
    write_doc(temp.path(), &config, "a.txt", b"The reactor uses liquid sodium coolant.");
    write_doc(temp.path(), &config, "b.txt", b"The garden grows tomatoes and basil.");

    let (builder, _) = app(temp.path(), &config);
    builder.build_index().unwrap();

    let (reader, _) = app(temp.path(), &config);
    let index = reader.load_index().unwrap();
    assert_eq!(index.model(), "hashing-test");
    assert_eq!(index.dimension(), DIM);

    let question = "What coolant does the reactor use?";
    assert_eq!(
        reader.retrieve(question).unwrap(),
        builder.retrieve(question).unwrap()
    );
}

#[test]
fn test_rebuild_picks_up_new_documents() {
    let temp = tempfile::tempdir().unwrap();
    let config = init(temp.path());
    write_doc(temp.path(), &config, "a.txt", b"Apples are red.");

    let (app, _) = app(temp.path(), &config);
    app.build_index().unwrap();
    assert_eq!(app.load_index().unwrap().len(), 1);

    write_doc(temp.path(), &config, "b.txt", b"Bananas are yellow and curved.");
    app.build_index().unwrap();

    let (_, sources) = answer(app.ask("yellow bananas").unwrap());
    assert!(sources[0].text.contains("Bananas"));

    let store_files: Vec<String> = std::fs::read_dir(discover::index_dir(temp.path()))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(".tmp"))
        .collect();
    assert!(store_files.is_empty());
}

#[test]
fn test_empty_question_short_circuits() {
    let temp = tempfile::tempdir().unwrap();
    let config = init(temp.path());
    let (app, generator) = app(temp.path(), &config);

    let reply = app.ask("   ").unwrap();
    assert_eq!(reply, Reply::NeedQuestion);
    assert_eq!(reply.message(), "Please enter a question.");
    assert!(generator.prompts.lock().unwrap().is_empty());
}

#[test]
fn test_missing_and_corrupt_index_are_errors() {
    let temp = tempfile::tempdir().unwrap();
    let config = init(temp.path());
    let (app, generator) = app(temp.path(), &config);

    assert!(matches!(
        app.ask("anything"),
        Err(RagError::IndexNotFound(_))
    ));

    std::fs::write(app.store().path(), b"not an index at all").unwrap();
    let (fresh, _) = self::app(temp.path(), &config);
    assert!(matches!(
        fresh.ask("anything"),
        Err(RagError::IndexCorrupt { .. })
    ));
    assert!(generator.prompts.lock().unwrap().is_empty());
}
