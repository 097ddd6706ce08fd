//! ragsh CLI: ask questions about a folder of documents

use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ragsh_core::{
    Config, IndexStore, ProgressEvent, RagApp, RagError, Reply, SearchHit, VectorIndex, discover,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "ragsh")]
#[command(about = "Ask questions about your documents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Question (when no subcommand is given)
    #[arg(trailing_var_arg = true)]
    query: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new .ragsh project in the current directory
    Init,

    /// Build the index from the documents directory
    Index,

    /// Ask a single question against the index
    Ask {
        /// Question
        question: Vec<String>,

        /// Print the chunks the answer was based on
        #[arg(short = 's', long)]
        sources: bool,
    },

    /// Build the index, then answer questions interactively
    Chat {
        /// Use the index already on disk instead of rebuilding it
        #[arg(long)]
        reuse_index: bool,

        /// Print the chunks each answer was based on
        #[arg(short = 's', long)]
        sources: bool,
    },

    /// Show configuration and index status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            init_logging(None)?;
            cmd_init()?
        }
        Some(Commands::Index) => cmd_index()?,
        Some(Commands::Ask { question, sources }) => cmd_ask(&question.join(" "), sources)?,
        Some(Commands::Chat {
            reuse_index,
            sources,
        }) => cmd_chat(reuse_index, sources)?,
        Some(Commands::Status) => cmd_status()?,
        None => {
            if cli.query.is_empty() {
                println!("Usage: ragsh <question> or ragsh <command>");
                println!("Run 'ragsh --help' for more information.");
            } else {
                cmd_ask(&cli.query.join(" "), false)?;
            }
        }
    }

    Ok(())
}

/// Console logging filtered by `RUST_LOG`, plus an append-only log file when
/// a project is known.
fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
    );

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file).init();
    Ok(())
}

/// Find the project, load its config and start logging to its log file.
fn open_project() -> Result<(PathBuf, Config)> {
    let cwd = std::env::current_dir()?;
    let root = discover::find_project_root(&cwd)
        .context("Not in a ragsh project. Run 'ragsh init' first.")?;
    let config = Config::load(&root)?;
    init_logging(Some(&config.log_path(&root)))?;
    Ok((root, config))
}

fn cmd_init() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let dir = discover::init_project(&cwd)?;

    let config = Config::default();
    config.save(&cwd)?;

    let documents = config.documents_path(&cwd);
    std::fs::create_dir_all(&documents)?;

    println!("Initialized ragsh project in {}", dir.display());
    println!(
        "Put .txt, .pdf and .docx files in {} and run 'ragsh index'.",
        documents.display()
    );

    Ok(())
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(message);
    Ok(pb)
}

/// Rebuild the index with a progress bar and print what was indexed.
fn build_index(app: &mut RagApp) -> Result<()> {
    let pb = spinner("Scanning documents...")?;
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
        .progress_chars("█▓░");

    app.set_progress_callback(Box::new({
        let pb = pb.clone();
        move |event| match event {
            ProgressEvent::Scanning { count } => {
                pb.set_message(format!("Scanning... {} files found", count));
            }
            ProgressEvent::Loading {
                current,
                total,
                path,
            } => {
                pb.set_style(bar_style.clone());
                pb.set_length(total as u64);
                pb.set_position(current as u64);
                pb.set_message(path.to_string_lossy().to_string());
            }
            ProgressEvent::Embedding { current, total } => {
                pb.set_length(total as u64);
                pb.set_position(current as u64);
                pb.set_message("Embedding chunks...");
            }
        }
    }));

    let stats = app.build_index();
    pb.finish_and_clear();
    let stats = stats?;

    println!("✓ Indexing complete:");
    println!("  Files scanned:   {}", stats.load.files_scanned);
    println!("  Files loaded:    {}", stats.load.files_loaded);
    println!("  Files skipped:   {}", stats.load.files_skipped);
    println!("  Characters:      {}", stats.corpus_chars);
    println!("  Chunks created:  {}", stats.chunks_created);
    for failure in &stats.load.failures {
        println!("  ! {}", failure);
    }

    Ok(())
}

fn cmd_index() -> Result<()> {
    let (root, config) = open_project()?;
    let mut app = RagApp::from_config(root, config)?;
    build_index(&mut app)
}

fn cmd_ask(question: &str, show_sources: bool) -> Result<()> {
    let (root, config) = open_project()?;
    let app = RagApp::from_config(root, config)?;

    let pb = spinner("Thinking...")?;
    let reply = app.ask(question);
    pb.finish_and_clear();

    print_reply(&reply?, show_sources);
    Ok(())
}

fn cmd_chat(reuse_index: bool, show_sources: bool) -> Result<()> {
    let (root, config) = open_project()?;
    let mut app = RagApp::from_config(root, config)?;

    if reuse_index {
        let index = app.load_index()?;
        println!("Loaded index with {} chunks.", index.len());
    } else {
        build_index(&mut app)?;
    }
    println!("Type 'exit' or press Ctrl-D to quit.\n");

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("Enter your question: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line?;
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }

        match app.ask(&line) {
            Ok(reply) => print_reply(&reply, show_sources),
            Err(e) => {
                tracing::error!("Question failed: {}", e);
                eprintln!("Error: {}", e);
            }
        }
        println!();
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let (root, config) = open_project()?;
    let store = IndexStore::new(discover::index_dir(&root), config.index_name.clone());

    println!("ragsh project: {}", root.display());
    println!();
    println!("Configuration:");
    println!("  Documents:        {}", config.documents_path(&root).display());
    println!("  Embedding:        {} ({})", config.embedding.model, config.embedding.provider);
    println!("  Chat model:       {}", config.generation.model);
    println!("  Chunk size:       {} chars", config.chunk_size);
    println!("  Chunk overlap:    {} chars", config.chunk_overlap);
    println!("  Results per query: {}", config.top_k);
    println!("  Log file:         {}", config.log_path(&root).display());
    println!();
    println!("Index '{}':", config.index_name);
    match VectorIndex::load(&store.path()) {
        Ok(index) => {
            println!("  Chunks:    {}", index.len());
            println!("  Dimension: {}", index.dimension());
            println!("  Model:     {}", index.model());
        }
        Err(RagError::IndexNotFound(_)) => {
            println!("  Not built yet. Run 'ragsh index'.");
        }
        Err(e) => println!("  Unreadable: {}", e),
    }

    Ok(())
}

fn print_reply(reply: &Reply, show_sources: bool) {
    println!("{}", reply.message());

    if let Reply::Answer { sources, .. } = reply {
        if show_sources {
            for hit in sources {
                print_source(hit);
            }
        }
    }
}

/// Print a retrieved chunk with its similarity score.
fn print_source(hit: &SearchHit) {
    let score_color = if hit.score > 0.8 {
        "\x1b[32m"
    } else if hit.score > 0.6 {
        "\x1b[33m"
    } else {
        "\x1b[31m"
    };

    println!(
        "\n\x1b[1;36m[chunk {}]\x1b[0m {}{:.3}\x1b[0m",
        hit.position, score_color, hit.score
    );
    for line in hit.text.trim_end().lines() {
        println!("\x1b[2m│\x1b[0m {}", line);
    }
}
