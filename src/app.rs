//! Wiring from a validated [`Config`] to the library components.
//!
//! Each constructor builds exactly the collaborators its component needs,
//! so `rag search` never touches the database and `rag sql` never loads
//! the vector index.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::RagResult;
use crate::extract::FileExtractor;
use crate::fusion::FusionEngine;
use crate::generation::{ChatCompletionsGenerator, Generator};
use crate::ingest::IngestionPipeline;
use crate::sql::{self, SchemaDescriptor, SqlAgent};
use crate::store::VectorStore;

/// Open (or create) the vector store described by `[store]` and
/// `[embedding]`.
pub async fn open_store(config: &Config, force_new: bool) -> RagResult<Arc<VectorStore>> {
    let embedder = create_embedder(&config.embedding)?;
    let mut store_config = config.store_config();
    store_config.force_new |= force_new;

    let store = VectorStore::initialize(store_config, embedder).await?;
    if let Some(report) = store.load_report().filter(|r| r.is_degraded()) {
        warn!(
            dropped = report.dropped_ordinals.len(),
            "vector store loaded with a degraded payload"
        );
    }
    let stats = store.stats();
    info!(
        root = %store.config().root.display(),
        dims = stats.dims,
        documents = stats.live_documents,
        "vector store ready"
    );
    Ok(Arc::new(store))
}

pub fn ingestion_pipeline(config: &Config, store: Arc<VectorStore>) -> RagResult<IngestionPipeline> {
    let extractor = FileExtractor::new(
        config.ingest.output_dir.clone(),
        Duration::from_secs(config.ingest.fetch_timeout_secs),
    )?;
    Ok(IngestionPipeline::new(
        store,
        Arc::new(extractor),
        config.ingest_options(),
    ))
}

pub fn generator(config: &Config) -> RagResult<Arc<dyn Generator>> {
    Ok(Arc::new(ChatCompletionsGenerator::new(&config.generation)?))
}

/// The structured query bridge over the company schema.
pub async fn sql_agent(config: &Config, generator: Arc<dyn Generator>) -> RagResult<SqlAgent> {
    let executor = sql::open_executor(&config.database).await?;
    Ok(SqlAgent::new(
        generator,
        executor,
        SchemaDescriptor::company(),
        config.agent_config(),
    ))
}

/// Both retrieval paths plus the generator, sharing one generator between
/// the agent and the final answer.
pub async fn fusion_engine(config: &Config, store: &Arc<VectorStore>) -> RagResult<FusionEngine> {
    let generator = generator(config)?;
    let agent = sql_agent(config, Arc::clone(&generator)).await?;
    Ok(FusionEngine::new(
        store.as_retriever(),
        Arc::new(agent),
        generator,
        config.fusion_config(),
    ))
}
