use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geodex::{Document, GeometricConfig, GeometricIndex, MergeMode, QueryNode};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "geodex")]
#[command(about = "Build and query a geometric inverted index", long_about = None)]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(long, env = "GEODEX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Directory holding the segments and the checkpoint
    #[arg(long, env = "GEODEX_SHARDS", default_value = "./shards", global = true)]
    shards: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a JSON-lines file of tokenized documents
    Build {
        /// One JSON document per line
        input: PathBuf,

        #[arg(long)]
        block_size: Option<u64>,

        #[arg(long)]
        radix: Option<usize>,

        /// Only merge once all documents are in
        #[arg(long)]
        deferred: bool,

        #[arg(long)]
        stemming: bool,

        /// Keep the documents themselves
        #[arg(long)]
        corpus: bool,

        /// Continue an interrupted build from its checkpoint
        #[arg(long)]
        resume: bool,
    },
    /// Rank documents for a bag of words or a JSON query tree
    Search {
        /// Words to score
        words: Vec<String>,

        /// Query tree as JSON, used instead of words
        #[arg(long)]
        query: Option<String>,

        #[arg(long, short = 'k', default_value = "10")]
        count: usize,
    },
    /// Merge every segment into one
    Merge,
}

fn load_config(args: &Args) -> Result<GeometricConfig> {
    let mut config = match &args.config {
        Some(path) => GeometricConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => GeometricConfig::default(),
    };
    config.shard_directory = args.shards.clone();
    Ok(config)
}

fn build(config: GeometricConfig, input: &Path) -> Result<()> {
    let index = GeometricIndex::open(config)?;
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    );

    let resume_from = index.next_document_number();
    let mut indexed = 0u64;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let document: Document = serde_json::from_str(&line)
            .with_context(|| format!("line {} is not a document", line_number + 1))?;
        // documents already covered by a restored checkpoint
        if document.number < resume_from {
            continue;
        }
        index.process(document)?;
        indexed += 1;
    }

    let path = index.close()?;
    info!(
        documents = indexed,
        segment = ?path,
        "build finished"
    );
    Ok(())
}

fn search(
    config: GeometricConfig,
    words: Vec<String>,
    query: Option<String>,
    count: usize,
) -> Result<()> {
    let query = match query {
        Some(json) => serde_json::from_str::<QueryNode>(&json).context("parsing query")?,
        None if words.is_empty() => bail!("give words or --query"),
        None => QueryNode::bag_of_words(words),
    };
    let index = GeometricIndex::open(config.with_resume(true))?;
    if index.segment_count() == 0 {
        warn!("index holds no segments");
    }

    let results = index.evaluate(&query, count)?;
    for (rank, result) in results.results.iter().enumerate() {
        println!(
            "{}\t{}\t{:.6}\t{}",
            rank + 1,
            result.document,
            result.score,
            results.name(result.document).unwrap_or("-")
        );
    }
    info!(results = results.len(), took_ms = results.took_ms, "search finished");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!("geodex v{}", geodex::VERSION);

    match args.command {
        Command::Build {
            input,
            block_size,
            radix,
            deferred,
            stemming,
            corpus,
            resume,
        } => {
            let (stemming, corpus) = (config.stemming || stemming, config.corpus || corpus);
            let mut config = config
                .with_stemming(stemming)
                .with_corpus(corpus)
                .with_resume(resume);
            if let Some(block_size) = block_size {
                config = config.with_block_size(block_size);
            }
            if let Some(radix) = radix {
                config = config.with_radix(radix);
            }
            if deferred {
                config = config.with_merge_mode(MergeMode::Deferred);
            }
            build(config, &input)
        }
        Command::Search {
            words,
            query,
            count,
        } => search(config, words, query, count),
        Command::Merge => {
            let index = GeometricIndex::open(config.with_resume(true))?;
            let segments = index.segment_count();
            let path = index.close()?;
            info!(segments, result = ?path, "merge finished");
            Ok(())
        }
    }
}
