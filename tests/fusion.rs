mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{
    company_db, keyword_vector, open_store, DownGenerator, KeywordEmbedder, ScriptedGenerator, DIMS,
};
use fusion_rag::embedding::Embedder;
use fusion_rag::fusion::{FusionConfig, FusionEngine, StructuredOutcome};
use fusion_rag::generation::Generator;
use fusion_rag::models::Document;
use fusion_rag::sql::{AgentConfig, QueryExecutor, SchemaDescriptor, SqlAgent, SqliteExecutor, StructuredQuery};
use fusion_rag::store::{Retriever, StoreConfig, VectorStore};
use fusion_rag::{RagError, RagResult};
use tempfile::TempDir;

const APOLLO: &str = "The Apollo project replaces the billing system.";
const LEAVE: &str = "Parental leave policy: sixteen weeks of paid leave.";

fn fusion_config() -> FusionConfig {
    FusionConfig {
        system_prompt: "You are the assistant of the company.".to_string(),
        max_context_chars: 10_000,
        retrieval_timeout: Duration::from_secs(5),
        generation_timeout: Duration::from_secs(5),
    }
}

async fn seeded_store(tmp: &TempDir, embedder: Arc<KeywordEmbedder>) -> Arc<VectorStore> {
    let store = open_store(&tmp.path().join("store"), embedder).await;
    store
        .add_texts(&[APOLLO.to_string(), LEAVE.to_string()], None)
        .await
        .unwrap();
    Arc::new(store)
}

async fn sql_agent(
    tmp: &TempDir,
    generator: Arc<dyn Generator>,
    max_iterations: usize,
) -> Arc<SqlAgent> {
    let db = company_db(tmp.path()).await;
    let executor: Arc<dyn QueryExecutor> =
        Arc::new(SqliteExecutor::open(&db, true, 50).await.unwrap());
    Arc::new(SqlAgent::new(
        generator,
        executor,
        SchemaDescriptor::company(),
        AgentConfig { max_iterations },
    ))
}

#[tokio::test]
async fn test_fused_answer_combines_both_paths() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp, KeywordEmbedder::new()).await;
    let agent_llm = ScriptedGenerator::new(&[
        r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT COUNT(*) AS N FROM EMPLOYEE WHERE DEPT_ID = 2"}}"#,
        r#"{"type":"final","content":"2 employees work in Engineering"}"#,
    ]);
    let answer_llm = ScriptedGenerator::new(&["Two engineers staff the Apollo project."]);
    let agent = sql_agent(&tmp, agent_llm.clone(), 8).await;
    let engine = FusionEngine::new(store.as_retriever(), agent, answer_llm.clone(), fusion_config());

    let fused = engine
        .answer_query_detailed("Who works on the Apollo project?", 1)
        .await
        .unwrap();

    assert_eq!(fused.text, "Two engineers staff the Apollo project.");
    assert_eq!(
        fused.structured,
        StructuredOutcome::Answer("2 employees work in Engineering".to_string())
    );
    assert_eq!(fused.documents.len(), 1);
    assert_eq!(fused.documents[0].content, APOLLO);
    assert_eq!(
        answer_llm.contexts(),
        vec![format!(
            "SQL Agent Answer: 2 employees work in Engineering\n\nDocument Context:\n{}",
            APOLLO
        )]
    );

    // the agent saw the real query result before answering
    let agent_contexts = agent_llm.contexts();
    assert_eq!(agent_contexts.len(), 2);
    assert!(agent_contexts[0].is_empty());
    assert!(agent_contexts[1].contains("N\n2"), "{}", agent_contexts[1]);
}

#[tokio::test]
async fn test_vector_failure_degrades_to_structured_only() {
    let tmp = TempDir::new().unwrap();
    let embedder = KeywordEmbedder::new();
    let store = seeded_store(&tmp, Arc::clone(&embedder)).await;
    let agent = sql_agent(
        &tmp,
        ScriptedGenerator::new(&[r#"{"type":"final","content":"4 departments"}"#]),
        8,
    )
    .await;
    let answer_llm = ScriptedGenerator::new(&["There are four departments."]);
    let engine = FusionEngine::new(store.as_retriever(), agent, answer_llm.clone(), fusion_config());

    embedder.fail.store(true, Ordering::SeqCst);
    let fused = engine
        .answer_query_detailed("How many departments are there?", 3)
        .await
        .unwrap();

    assert_eq!(fused.text, "There are four departments.");
    assert!(fused.documents.is_empty());
    assert_eq!(
        answer_llm.contexts()[0],
        "SQL Agent Answer: 4 departments\n\nDocument Context:\n"
    );
}

#[tokio::test]
async fn test_structured_failure_becomes_marker() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp, KeywordEmbedder::new()).await;
    let agent = sql_agent(&tmp, Arc::new(DownGenerator), 8).await;
    let answer_llm = ScriptedGenerator::new(&["Sixteen weeks."]);
    let engine = FusionEngine::new(store.as_retriever(), agent, answer_llm.clone(), fusion_config());

    let fused = engine
        .answer_query_detailed("What is the parental leave policy?", 1)
        .await
        .unwrap();

    assert_eq!(fused.text, "Sixteen weeks.");
    assert!(matches!(fused.structured, StructuredOutcome::Failed(_)));
    let context = &answer_llm.contexts()[0];
    assert!(
        context.starts_with("SQL Agent Answer: (SQL Agent Error: structured retrieval failed:"),
        "{}",
        context
    );
    assert!(context.ends_with(LEAVE));
}

#[tokio::test]
async fn test_exhausted_agent_is_reported_not_raised() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp, KeywordEmbedder::new()).await;
    let agent_llm =
        ScriptedGenerator::new(&[r#"{"type":"tool_call","tool_name":"list_tables","tool_args":{}}"#]);
    let agent = sql_agent(&tmp, agent_llm.clone(), 3).await;
    let answer_llm = ScriptedGenerator::new(&["I could not find that."]);
    let engine = FusionEngine::new(store.as_retriever(), agent, answer_llm.clone(), fusion_config());

    let fused = engine
        .answer_query_detailed("Which clients are active?", 2)
        .await
        .unwrap();

    assert_eq!(agent_llm.contexts().len(), 3);
    match &fused.structured {
        StructuredOutcome::Exhausted {
            iterations,
            last_observation,
        } => {
            assert_eq!(*iterations, 3);
            assert!(last_observation.as_deref().unwrap_or("").contains("CLIENT"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(answer_llm.contexts()[0]
        .starts_with("SQL Agent Answer: (SQL Agent Error: no answer after 3 iterations)"));
}

#[tokio::test]
async fn test_generation_failure_is_the_only_error() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp, KeywordEmbedder::new()).await;
    let agent = sql_agent(
        &tmp,
        ScriptedGenerator::new(&[r#"{"type":"final","content":"1 project"}"#]),
        8,
    )
    .await;
    let engine = FusionEngine::new(store.as_retriever(), agent, Arc::new(DownGenerator), fusion_config());

    let result = engine.answer_query("How many projects?", 2).await;
    assert!(matches!(result, Err(RagError::Generation(_))));
}

#[tokio::test]
async fn test_zero_k_is_rejected_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp, KeywordEmbedder::new()).await;
    let agent_llm = ScriptedGenerator::new(&["unused"]);
    let agent = sql_agent(&tmp, agent_llm.clone(), 8).await;
    let engine = FusionEngine::new(
        store.as_retriever(),
        agent,
        ScriptedGenerator::new(&["unused"]),
        fusion_config(),
    );

    let result = engine.answer_query("anything", 0).await;
    assert!(matches!(result, Err(RagError::InvalidArgument(_))));
    assert!(agent_llm.contexts().is_empty());
}

/// Documents embed normally; queries come back one component short.
struct ShortQueryEmbedder;

#[async_trait]
impl Embedder for ShortQueryEmbedder {
    fn model_name(&self) -> &str {
        "short-query"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = keyword_vector(text);
        v.truncate(DIMS - 1);
        Ok(v)
    }
}

#[tokio::test]
async fn test_wrong_dimension_query_degrades_to_no_documents() {
    let tmp = TempDir::new().unwrap();
    let store = VectorStore::initialize(
        StoreConfig::new(tmp.path().join("store"), DIMS),
        Arc::new(ShortQueryEmbedder),
    )
    .await
    .unwrap();
    store
        .add_texts(&[APOLLO.to_string(), LEAVE.to_string()], None)
        .await
        .unwrap();
    let store = Arc::new(store);

    let err = store.similarity_search("apollo project", 1).await.unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)), "{:?}", err);

    let agent = sql_agent(
        &tmp,
        ScriptedGenerator::new(&[r#"{"type":"final","content":"Grace Hopper"}"#]),
        8,
    )
    .await;
    let answer_llm = ScriptedGenerator::new(&["Grace Hopper manages Apollo."]);
    let engine = FusionEngine::new(store.as_retriever(), agent, answer_llm.clone(), fusion_config());

    let fused = engine
        .answer_query_detailed("Who manages the Apollo project?", 2)
        .await
        .unwrap();
    assert!(fused.documents.is_empty());
    assert_eq!(fused.structured, StructuredOutcome::Answer("Grace Hopper".into()));
    assert_eq!(
        answer_llm.contexts()[0],
        "SQL Agent Answer: Grace Hopper\n\nDocument Context:\n"
    );
}

struct StalledRetriever;

#[async_trait]
impl Retriever for StalledRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> RagResult<Vec<Document>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(vec![Document::new("late", "never used")])
    }
}

#[tokio::test]
async fn test_slow_vector_path_times_out_to_no_documents() {
    let tmp = TempDir::new().unwrap();
    let agent = sql_agent(
        &tmp,
        ScriptedGenerator::new(&[r#"{"type":"final","content":"Grace Hopper"}"#]),
        8,
    )
    .await;
    let answer_llm = ScriptedGenerator::new(&["Grace Hopper manages Apollo."]);
    let mut config = fusion_config();
    config.retrieval_timeout = Duration::from_millis(100);
    let engine = FusionEngine::new(Arc::new(StalledRetriever), agent, answer_llm.clone(), config);

    let fused = engine
        .answer_query_detailed("Who manages Apollo?", 2)
        .await
        .unwrap();
    assert!(fused.documents.is_empty());
    assert_eq!(fused.structured, StructuredOutcome::Answer("Grace Hopper".into()));
}

#[tokio::test]
async fn test_agent_recovers_from_bad_sql_against_real_database() {
    let tmp = TempDir::new().unwrap();
    let agent_llm = ScriptedGenerator::new(&[
        r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT NAME FROM EMPLOYEES"}}"#,
        r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT NAME FROM EMPLOYEE WHERE ROLE = 'Account Executive'"}}"#,
        r#"{"type":"final","content":"Tom Kilburn"}"#,
    ]);
    let agent = sql_agent(&tmp, agent_llm.clone(), 8).await;

    let answer = agent.answer("Who is the account executive?").await.unwrap();
    assert_eq!(answer, "Tom Kilburn");

    let contexts = agent_llm.contexts();
    assert!(contexts[1].contains("failed"), "{}", contexts[1]);
    assert!(contexts[2].contains("Tom Kilburn"), "{}", contexts[2]);
}

#[tokio::test]
async fn test_agent_cannot_modify_read_only_database() {
    let tmp = TempDir::new().unwrap();
    let agent_llm = ScriptedGenerator::new(&[
        r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"DELETE FROM EMPLOYEE"}}"#,
        r#"{"type":"tool_call","tool_name":"query","tool_args":{"sql":"SELECT COUNT(*) AS N FROM EMPLOYEE"}}"#,
        r#"{"type":"final","content":"3"}"#,
    ]);
    let agent = sql_agent(&tmp, agent_llm.clone(), 8).await;

    assert_eq!(agent.answer("Remove everyone").await.unwrap(), "3");
    let contexts = agent_llm.contexts();
    assert!(contexts[1].contains("read-only"), "{}", contexts[1]);
    assert!(contexts[2].contains("N\n3"), "{}", contexts[2]);
}
