//! `cascade` — the unified CLI surface over the four cores (spec §6):
//! `sync schema`, `sync pipeline`, `validate fk`, `search`. Wires the
//! concrete collaborators (Qdrant, an HTTP embedder, an Odoo-shaped
//! upstream RPC client) behind the trait boundaries the rest of the
//! workspace only consumes (spec §9, "no process-global state; the CLI
//! wires the graph at startup").

mod adapters;
mod commands;
mod logging;
mod output;
mod sync_store;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use qdrant_client::Qdrant;

use cascade_cascade::{CascadeConfig, Coordinator, SyncLockRegistry};
use cascade_core::schema::SchemaSource;
use cascade_core::{Config as CoreConfig, SchemaRegistry};
use cascade_embeddings::{Embedder, HttpEmbedder};
use cascade_graph::GraphStore;
use cascade_qdrant::{QdrantSink, VectorSink, INDEXED_FIELDS};
use cascade_resilience::{CircuitBreaker, CircuitBreakerConfig, DeadLetterQueue};
use cascade_upstream::{Extractor, UpstreamClient};
use cascade_validator::{AutoSyncer, FkValidator};
use cascade_core::Service;

use crate::adapters::{pattern_source, HttpUpstreamClient, JsonFileSchemaSource};
use crate::commands::{search, sync_pipeline, sync_schema, validate_fk};
use crate::output::print_error;
use crate::sync_store::SyncStore;

const VECTOR_DIMENSIONS: u64 = 1024;
const DEFAULT_COLLECTION: &str = "cascade_sync";
const DEFAULT_EMBEDDER_BASE_URL: &str = "https://api.voyageai.com/v1";
const DEFAULT_EMBEDDER_MODEL: &str = "voyage-3";

#[derive(Parser)]
#[command(name = "cascade", about = "Metadata-aware sync and query engine over a vector-indexed ERP mirror")]
struct Cli {
    /// JSON schema sidecar consumed by every command that needs the
    /// registry (`sync schema --source excel`, `sync pipeline`, `validate
    /// fk`, `search`).
    #[arg(long, global = true, env = "CASCADE_SCHEMA_FILE")]
    schema_file: Option<String>,

    /// Optional JSON sidecar of per-model narrative templates.
    #[arg(long, global = true, env = "CASCADE_PATTERN_FILE")]
    pattern_file: Option<String>,

    /// Directory for sync-metadata watermarks and the dead-letter queue.
    #[arg(long, global = true, env = "CASCADE_STATE_DIR", default_value = "./cascade-state")]
    state_dir: String,

    /// Name of the shared Qdrant collection.
    #[arg(long, global = true, env = "CASCADE_COLLECTION", default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Base URL of the embedding provider.
    #[arg(long, global = true, env = "EMBEDDER_URL", default_value = DEFAULT_EMBEDDER_BASE_URL)]
    embedder_url: String,

    /// Embedding model name.
    #[arg(long, global = true, env = "EMBEDDER_MODEL", default_value = DEFAULT_EMBEDDER_MODEL)]
    embedder_model: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// `sync schema`/`sync pipeline`.
    #[command(subcommand)]
    Sync(SyncCommand),
    /// `validate fk`.
    #[command(subcommand)]
    Validate(ValidateCommand),
    /// The exact query engine.
    Search(search::SearchArgs),
}

#[derive(Subcommand)]
enum SyncCommand {
    Schema(sync_schema::SyncSchemaArgs),
    Pipeline(sync_pipeline::SyncPipelineArgs),
}

#[derive(Subcommand)]
enum ValidateCommand {
    Fk(validate_fk::ValidateFkArgs),
}

#[tokio::main]
async fn main() {
    logging::init_tracing();
    logging::init_metrics_exporter();

    let cli = Cli::parse();
    let exit_code = run(cli).await;
    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> i32 {
    let core_config = match CoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            print_error(&format!("configuration error: {e}"));
            return 1;
        }
    };

    let sink: Arc<dyn VectorSink> = match connect_sink(&core_config, &cli.collection).await {
        Ok(sink) => sink,
        Err(e) => {
            print_error(&format!("failed to connect to the vector store: {e}"));
            return 2;
        }
    };

    let embedder: Arc<dyn Embedder> =
        Arc::new(HttpEmbedder::new(core_config.embedder.api_key.clone(), cli.embedder_url.clone(), cli.embedder_model.clone()));

    match cli.command {
        Command::Sync(SyncCommand::Schema(args)) => match sync_schema::run(args, sink, embedder).await {
            Ok(()) => 0,
            Err(e) => {
                print_error(&e.to_string());
                1
            }
        },
        Command::Sync(SyncCommand::Pipeline(args)) => {
            let registry = match load_registry(cli.schema_file.as_deref()) {
                Ok(registry) => Arc::new(registry),
                Err(code) => return code,
            };
            let upstream = match HttpUpstreamClient::connect(
                &core_config.upstream.url,
                &core_config.upstream.db,
                &core_config.upstream.user,
                &core_config.upstream.password,
            )
            .await
            {
                Ok(client) => Arc::new(client) as Arc<dyn UpstreamClient>,
                Err(e) => {
                    print_error(&format!("failed to authenticate against the upstream: {e}"));
                    return 2;
                }
            };
            let patterns = match pattern_source::load(cli.pattern_file.as_deref().map(std::path::Path::new)) {
                Ok(patterns) => Arc::new(patterns),
                Err(e) => {
                    print_error(&format!("failed to load narrative patterns: {e}"));
                    return 1;
                }
            };
            let ctx = build_pipeline_context(registry.clone(), upstream, embedder.clone(), sink.clone(), patterns, &cli.state_dir);
            let graph = Arc::new(GraphStore::new(sink.clone(), embedder.clone()));
            let locks = Arc::new(SyncLockRegistry::new());
            let coordinator = Arc::new(Coordinator::new(ctx, graph, locks, CascadeConfig::default()));
            let sync_store = Arc::new(SyncStore::new(format!("{}/watermarks", cli.state_dir)));
            sync_pipeline::run(args, coordinator, sync_store).await
        }
        Command::Validate(ValidateCommand::Fk(args)) => {
            let registry = match load_registry(cli.schema_file.as_deref()) {
                Ok(registry) => Arc::new(registry),
                Err(code) => return code,
            };
            let graph = Arc::new(GraphStore::new(sink.clone(), embedder.clone()));

            let upstream_client = HttpUpstreamClient::connect(
                &core_config.upstream.url,
                &core_config.upstream.db,
                &core_config.upstream.user,
                &core_config.upstream.password,
            )
            .await;
            let validator = match upstream_client {
                Ok(client) => {
                    let patterns = Arc::new(HashMap::new());
                    let ctx = build_pipeline_context(
                        registry.clone(),
                        Arc::new(client) as Arc<dyn UpstreamClient>,
                        embedder.clone(),
                        sink.clone(),
                        patterns,
                        &cli.state_dir,
                    );
                    let locks = Arc::new(SyncLockRegistry::new());
                    let coordinator = Arc::new(Coordinator::new(ctx, graph.clone(), locks, CascadeConfig::default()));
                    let auto_syncer: Arc<dyn AutoSyncer> = coordinator;
                    Arc::new(FkValidator::new(sink.clone(), graph).with_auto_syncer(auto_syncer))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "validate fk: no upstream available, --auto-sync will no-op");
                    Arc::new(FkValidator::new(sink.clone(), graph))
                }
            };
            validate_fk::run(args, validator).await
        }
        Command::Search(args) => {
            let registry = match load_registry(cli.schema_file.as_deref()) {
                Ok(registry) => Arc::new(registry),
                Err(code) => return code,
            };
            let graph = Arc::new(GraphStore::new(sink.clone(), embedder.clone()));
            let engine = Arc::new(cascade_query::QueryEngine::new(sink, graph, registry));
            search::run(args, engine).await
        }
    }
}

async fn connect_sink(config: &CoreConfig, collection: &str) -> anyhow::Result<Arc<dyn VectorSink>> {
    let client = match &config.vector_store.api_key {
        Some(key) => Qdrant::from_url(&config.vector_store.endpoint).api_key(key.clone()).build()?,
        None => Qdrant::from_url(&config.vector_store.endpoint).build()?,
    };
    let sink = QdrantSink::from_client(client, collection.to_string());
    sink.ensure_collection(VECTOR_DIMENSIONS).await?;
    Ok(Arc::new(sink))
}

fn load_registry(schema_file: Option<&str>) -> Result<SchemaRegistry, i32> {
    let Some(path) = schema_file else {
        print_error("--schema-file is required for this command");
        return Err(1);
    };
    let models = JsonFileSchemaSource::new(path).load().map_err(|e| {
        print_error(&format!("failed to load schema: {e}"));
        1
    })?;
    let indexed_fields: HashSet<String> = INDEXED_FIELDS.iter().map(|(name, _)| (*name).to_string()).collect();
    Ok(SchemaRegistry::new(models, indexed_fields))
}

#[allow(clippy::too_many_arguments)]
fn build_pipeline_context(
    registry: Arc<SchemaRegistry>,
    upstream: Arc<dyn UpstreamClient>,
    embedder: Arc<dyn Embedder>,
    sink: Arc<dyn VectorSink>,
    patterns: Arc<HashMap<String, cascade_core::Pattern>>,
    state_dir: &str,
) -> Arc<cascade_cascade::PipelineContext> {
    let extractor = Arc::new(Extractor::new(upstream));
    let dlq = Arc::new(DeadLetterQueue::new(format!("{state_dir}/dlq.jsonl")));
    Arc::new(cascade_cascade::PipelineContext {
        extractor,
        embedder,
        sink,
        registry,
        patterns,
        dlq,
        extractor_breaker: Arc::new(CircuitBreaker::new(Service::Extractor, CircuitBreakerConfig::default())),
        embedder_breaker: Arc::new(CircuitBreaker::new(Service::Embedder, CircuitBreakerConfig::default())),
        sink_breaker: Arc::new(CircuitBreaker::new(Service::VectorSink, CircuitBreakerConfig::default())),
        batch_size: cascade_cascade::DEFAULT_BATCH_SIZE,
    })
}
