//! Cogmem - Cognitive memory backend for AI assistants
//!
//! Serves the knowledge graph, memory pipelines and pipeline traces over HTTP.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cogmem::{
    api::build_app,
    config::CogmemConfig,
    conversation::{ConversationState, ConversationStore},
    graph::{GraphState, GraphStore},
    llm::model_from_config,
    pipeline::{ContextAssembler, ExtractionQueue, LinkPredictor, MemoryExtractor, PipelineState},
    storage::Database,
    tiers::{EpisodicTier, GraphTier, MemoryTier, SemanticTier, StructuredTier},
    tracer::{TraceStore, TracerState},
    vector::{embedder_from_config, FileVectorIndex},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cogmem")]
#[command(version)]
#[command(about = "Cognitive memory and knowledge graph backend for AI assistants")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "COGMEM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Data directory (overrides config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("cogmem={},tower_http={}", log_level, log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let config = match cli.config {
        Some(path) => CogmemConfig::load(&path)?,
        None => CogmemConfig::default(),
    };

    match cli.command {
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.storage.data_dir = data_dir;
            }
            run_server(config).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_server(config: CogmemConfig) -> Result<()> {
    tracing::info!("Starting Cogmem");

    let db = Arc::new(Database::open(&config.storage.database_path())?);
    let graph = Arc::new(GraphStore::new(db.clone()));
    let conversations = Arc::new(ConversationStore::new(db.clone()));
    let tracer = Arc::new(TraceStore::new(db));

    let embedder = embedder_from_config(&config.embedding)?;
    let index = Arc::new(
        FileVectorIndex::open(config.storage.vectors_dir(), embedder.dimensions()).await?,
    );
    let semantic = Arc::new(SemanticTier::new(
        embedder,
        index,
        config.context.semantic_top_k,
    ));
    let model = model_from_config(&config.model)?;

    let tiers: Vec<Arc<dyn MemoryTier>> = vec![
        Arc::new(EpisodicTier::new(
            conversations.clone(),
            config.context.episodic_turns,
        )),
        semantic.clone(),
        Arc::new(StructuredTier::new(graph.clone())),
        Arc::new(GraphTier::new(graph.clone())),
    ];
    let assembler = Arc::new(ContextAssembler::new(
        tiers,
        tracer.clone(),
        config.context.clone(),
    ));
    let extractor = Arc::new(MemoryExtractor::new(
        model.clone(),
        graph.clone(),
        conversations.clone(),
        semantic,
        tracer.clone(),
    ));
    let (queue, workers) = ExtractionQueue::start(extractor.clone(), &config.extraction);
    let predictor = Arc::new(LinkPredictor::new(
        model,
        graph.clone(),
        conversations.clone(),
        config.link_prediction.clone(),
    ));

    let app = build_app(
        GraphState {
            store: graph,
            config: config.graph.clone(),
        },
        ConversationState {
            store: conversations.clone(),
        },
        PipelineState {
            assembler,
            extractor,
            queue,
            predictor,
            conversations,
        },
        TracerState { store: tracer },
        &config.server.cors_origins,
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Cogmem listening on http://{}. Press Ctrl+C to stop.", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    // The router held the last queue sender; workers finish queued jobs and exit.
    tracing::info!("Shutting down, draining extraction queue...");
    futures::future::join_all(workers).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

fn show_config(config: Option<&CogmemConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    let toml = toml::to_string_pretty(&config)?;
    println!("{}", toml);
    Ok(())
}
