use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use underwrite_core::{load_document, AssessError, Chunker, SourceKind};
use underwrite_rag::{
    load_and_chunk, AssessConfig, AssessmentRequest, AssessmentResult, EmbeddingClient,
    RequestContext, Retriever, Session, Upload, VectorIndex, ASSESSMENT_QUERY,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "underwrite", version = VERSION, about = "Appraisal report risk assessment")]
struct Cli {
    /// TOML config file; defaults to $UNDERWRITE_CONFIG, then ./underwrite.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Assess a property appraisal report against underwriting guidelines.
    Assess {
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        guidelines: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Show how a file is split into chunks.
    Chunks {
        input: PathBuf,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Show which chunks a query retrieves.
    Retrieve {
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        guidelines: PathBuf,
        #[arg(long)]
        query: Option<String>,
        #[arg(long = "top-k")]
        top_k: Option<usize>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Pdf,
    Text,
}

impl From<KindArg> for SourceKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Pdf => SourceKind::Pdf,
            KindArg::Text => SourceKind::PlainText,
        }
    }
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();
    let cli = Cli::parse();
    let mut config = AssessConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Assess {
            report,
            guidelines,
            json,
        } => {
            let request = AssessmentRequest {
                report: report.as_deref().map(read_upload).transpose()?,
                guidelines: guidelines.as_deref().map(read_upload).transpose()?,
            };
            let mut session = Session::new(RequestContext::from_env(config));
            let result = session.run(request).map_err(user_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_assessment(&result);
            }
        }
        Commands::Chunks { input, kind, json } => {
            config.validate().map_err(user_error)?;
            let kind = match kind {
                Some(kind) => kind.into(),
                None => SourceKind::from_path(&input).ok_or_else(|| {
                    anyhow!(
                        "cannot infer document kind of {}; pass --kind",
                        input.display()
                    )
                })?,
            };
            let docs = load_document(&input, kind).map_err(user_error)?;
            let chunks = Chunker::new(config.chunking.clone())
                .map_err(user_error)?
                .split_documents(&docs);
            info!(records = docs.len(), chunks = chunks.len(), "chunked {}", input.display());
            if json {
                println!("{}", serde_json::to_string_pretty(&chunks)?);
            } else {
                for chunk in &chunks {
                    println!(
                        "#{:<4} {:<32} chars {:>5}  span {}..{}",
                        chunk.ordinal,
                        chunk.metadata.label(),
                        chunk.char_count(),
                        chunk.span[0],
                        chunk.span[1]
                    );
                    println!("      {}", preview(&chunk.text, 96));
                }
                println!("{} chunks from {} records", chunks.len(), docs.len());
            }
        }
        Commands::Retrieve {
            report,
            guidelines,
            query,
            top_k,
            json,
        } => {
            if let Some(k) = top_k {
                config.retrieval.top_k = k;
            }
            config.validate().map_err(user_error)?;
            let chunks =
                load_and_chunk(&report, &guidelines, &config.chunking).map_err(user_error)?;
            let embeddings = EmbeddingClient::from_config(&config.embedding).map_err(user_error)?;
            let index = VectorIndex::build(chunks, &embeddings).map_err(user_error)?;
            let retriever = Retriever::new(&index, &embeddings, config.retrieval.clone());
            let query = query.unwrap_or_else(|| ASSESSMENT_QUERY.to_string());
            let result = retriever.retrieve(&query).map_err(user_error)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!(
                    "[underwrite] {} of {} chunks (backend {})",
                    result.len(),
                    index.len(),
                    embeddings.describe()
                );
                for hit in &result.hits {
                    println!("{:>7.4}  {}", hit.score, hit.chunk.metadata.label());
                    println!("         {}", preview(&hit.chunk.text, 96));
                }
            }
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            match config.credential_var() {
                Some(var) if config.credential_from_env().is_some() => eprintln!("# {var}: set"),
                Some(var) => eprintln!("# {var}: missing"),
                None => eprintln!("# no credential required"),
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_upload(path: &Path) -> Result<Upload> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Upload::new(file_name, bytes))
}

fn user_error(err: AssessError) -> anyhow::Error {
    anyhow!("{} [{}]", err.user_message(), err.code())
}

fn print_assessment(result: &AssessmentResult) {
    println!("{}", result.narrative.trim_end());
    println!();
    println!(
        "[underwrite] Decision:      {}",
        result.decision.map(|d| d.label()).unwrap_or("none found")
    );
    println!(
        "[underwrite] Tokens:        {} prompt / {} completion",
        result.usage.prompt_tokens, result.usage.completion_tokens
    );
    println!("[underwrite] Sources:       {}", result.sources.len());
    for chunk in &result.sources {
        println!("  - {}: {}", chunk.metadata.label(), preview(&chunk.text, 80));
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
