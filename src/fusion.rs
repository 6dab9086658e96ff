//! Context fusion engine.
//!
//! One query runs both retrieval paths concurrently, merges their results
//! into a single labelled context and makes one generation call:
//!
//! ```text
//! SQL Agent Answer: <structured answer, or an error marker>
//!
//! Document Context:
//! <document 1>
//! <document 2>
//! ```
//!
//! Neither retrieval path can fail the query. A vector failure or timeout
//! contributes no documents; a structured failure contributes a marker.
//! Only the final generation call can return an error.
//!
//! The engine holds shared references to its backends and keeps no state
//! between queries.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::{Backend, RagError, RagResult};
use crate::generation::Generator;
use crate::models::Document;
use crate::sql::StructuredQuery;
use crate::store::Retriever;

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub system_prompt: String,
    /// Upper bound on the merged context, in characters. Document text is
    /// cut first.
    pub max_context_chars: usize,
    /// Applied to each retrieval path separately.
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
}

/// What the structured path produced for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutcome {
    Answer(String),
    Exhausted {
        iterations: usize,
        last_observation: Option<String>,
    },
    Failed(String),
}

impl StructuredOutcome {
    fn from_result(result: RagResult<String>) -> Self {
        match result {
            Ok(answer) => StructuredOutcome::Answer(answer),
            Err(RagError::AgentExhausted {
                iterations,
                last_observation,
            }) => StructuredOutcome::Exhausted {
                iterations,
                last_observation,
            },
            Err(e) => StructuredOutcome::Failed(e.to_string()),
        }
    }

    /// The text placed after `SQL Agent Answer:` in the context.
    pub fn render(&self) -> String {
        match self {
            StructuredOutcome::Answer(answer) => answer.clone(),
            StructuredOutcome::Exhausted { iterations, .. } => format!(
                "(SQL Agent Error: no answer after {} iterations)",
                iterations
            ),
            StructuredOutcome::Failed(message) => format!("(SQL Agent Error: {})", message),
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, StructuredOutcome::Answer(_))
    }
}

#[derive(Debug, Clone)]
pub struct FusedAnswer {
    pub text: String,
    /// The merged context sent to the generator.
    pub context: String,
    pub documents: Vec<Document>,
    pub structured: StructuredOutcome,
}

pub struct FusionEngine {
    retriever: Arc<dyn Retriever>,
    bridge: Arc<dyn StructuredQuery>,
    generator: Arc<dyn Generator>,
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        bridge: Arc<dyn StructuredQuery>,
        generator: Arc<dyn Generator>,
        config: FusionConfig,
    ) -> Self {
        Self {
            retriever,
            bridge,
            generator,
            config,
        }
    }

    pub async fn answer_query(&self, query: &str, k: usize) -> RagResult<String> {
        Ok(self.answer_query_detailed(query, k).await?.text)
    }

    /// Run a fused query and keep every intermediate result.
    ///
    /// Errors only for `k == 0` ([`RagError::InvalidArgument`]) or when the
    /// generation call fails or times out ([`RagError::Generation`]).
    pub async fn answer_query_detailed(&self, query: &str, k: usize) -> RagResult<FusedAnswer> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be at least 1".to_string()));
        }

        let (documents, structured) =
            tokio::join!(self.vector_context(query, k), self.structured_context(query));

        let context = build_context(&structured.render(), &documents, self.config.max_context_chars);
        info!(
            documents = documents.len(),
            structured = structured.is_answer(),
            context_chars = context.chars().count(),
            "generating fused answer"
        );

        let completion = timeout(
            self.config.generation_timeout,
            self.generator
                .complete(&self.config.system_prompt, query, &context),
        )
        .await
        .map_err(|_| {
            RagError::Generation(format!(
                "timed out after {}s",
                self.config.generation_timeout.as_secs()
            ))
        })?
        .map_err(|e| RagError::Generation(format!("{:#}", e)))?;

        Ok(FusedAnswer {
            text: completion.into_text(),
            context,
            documents,
            structured,
        })
    }

    async fn vector_context(&self, query: &str, k: usize) -> Vec<Document> {
        let result = match timeout(self.config.retrieval_timeout, self.retriever.retrieve(query, k)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(Backend::Vector, self.config.retrieval_timeout)),
        };
        match result {
            Ok(mut documents) => {
                documents.truncate(k);
                documents
            }
            Err(e) => {
                warn!(error = %e, "vector retrieval failed, continuing without documents");
                Vec::new()
            }
        }
    }

    async fn structured_context(&self, query: &str) -> StructuredOutcome {
        let result = match timeout(self.config.retrieval_timeout, self.bridge.answer(query)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(Backend::Structured, self.config.retrieval_timeout)),
        };
        let outcome = StructuredOutcome::from_result(result);
        if !outcome.is_answer() {
            warn!(marker = %outcome.render(), "structured retrieval failed, continuing with marker");
        }
        outcome
    }
}

fn timed_out(backend: Backend, after: Duration) -> RagError {
    RagError::retrieval(backend, format!("timed out after {}s", after.as_secs()))
}

/// Merge both results, cutting document text first to stay within
/// `max_chars`.
fn build_context(structured: &str, documents: &[Document], max_chars: usize) -> String {
    let head = format!("SQL Agent Answer: {}\n\nDocument Context:\n", structured);
    let body = documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let budget = max_chars.saturating_sub(head.chars().count());
    let mut context = head;
    context.push_str(truncate_chars(&body, budget));
    truncate_chars(&context, max_chars).to_string()
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => &s[..byte],
        None => s,
    }
}
