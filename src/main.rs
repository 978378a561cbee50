use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use costwise::clock::SystemClock;
use costwise::context::SqliteConversationStore;
use costwise::execution::TrinoEngine;
use costwise::llm::{LlmClient, LlmProvider};
use costwise::observability::ScopeAuditLog;
use costwise::security::StaticScopeProvider;
use costwise::{CostQueryPipeline, PipelineConfig, PipelineServices};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "costwise")]
#[command(about = "Answer cloud cost questions in natural language, scoped to your billing accounts")]
struct Args {
    /// Calibration file (or set COSTWISE_CALIBRATION)
    #[arg(long, global = true)]
    calibration: Option<PathBuf>,

    /// JSON file mapping user ids to role and allowed account ids
    #[arg(long, global = true, default_value = "scopes.json")]
    scopes: PathBuf,

    /// SQLite file holding conversation context
    #[arg(long, global = true, default_value = "costwise.db")]
    db: PathBuf,

    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[arg(long, global = true)]
    thread: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question and print the response as JSON
    Ask { question: String },
    /// Read questions line by line from stdin on one thread
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = PipelineConfig::from_env(args.calibration.clone()).context("failed to load pipeline configuration")?;

    let llm: Option<Arc<dyn LlmProvider>> = match &config.llm {
        Some(llm_config) => Some(Arc::new(LlmClient::new(llm_config.clone())?)),
        None => None,
    };
    let scopes = StaticScopeProvider::from_file(&args.scopes)
        .with_context(|| format!("failed to load scopes from {}", args.scopes.display()))?;
    let store = SqliteConversationStore::open(&args.db)
        .with_context(|| format!("failed to open conversation store {}", args.db.display()))?;
    let audit = ScopeAuditLog::new(std::env::var("COSTWISE_AUDIT_LOG").ok().map(PathBuf::from), 1000);

    let pipeline = CostQueryPipeline::new(
        config,
        PipelineServices {
            engine: Arc::new(TrinoEngine::from_env()?),
            store: Arc::new(store),
            scopes: Arc::new(scopes),
            llm,
            clock: Arc::new(SystemClock),
            audit,
        },
    );

    let thread = args.thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(thread_id = %thread, user = %args.user, "costwise ready");

    match args.command {
        Command::Ask { question } => {
            let response = pipeline.handle_turn(&thread, &args.user, &question).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Chat => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                let response = pipeline.handle_turn(&thread, &args.user, question).await;
                println!("{}", serde_json::to_string_pretty(&response)?);
            }
        }
    }

    Ok(())
}
