#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};

use fusion_rag::embedding::Embedder;
use fusion_rag::extract::{Extracted, Extractor, FileExtractor};
use fusion_rag::generation::{Completion, Generator};
use fusion_rag::sql::SchemaDescriptor;
use fusion_rag::store::{StoreConfig, VectorStore};

pub const DIMS: usize = 8;

const VOCABULARY: [&str; DIMS] = [
    "leave", "policy", "apollo", "project", "sales", "security", "budget", "office",
];

/// Bag-of-words embedder over a fixed vocabulary, so nearest neighbours
/// are predictable from the words in the text.
pub struct KeywordEmbedder {
    pub fail: AtomicBool,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: AtomicBool::new(false),
        })
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
    {
        if let Some(i) = VOCABULARY.iter().position(|w| *w == word) {
            v[i] += 1.0;
        }
    }
    v
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

pub async fn open_store(root: &Path, embedder: Arc<KeywordEmbedder>) -> VectorStore {
    VectorStore::initialize(StoreConfig::new(root, DIMS), embedder)
        .await
        .unwrap()
}

/// Real file extraction, but URLs always fail.
pub struct OfflineExtractor {
    pub inner: FileExtractor,
}

impl OfflineExtractor {
    pub fn new(output_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            inner: FileExtractor::new(output_dir, Duration::from_secs(5)).unwrap(),
        })
    }
}

#[async_trait]
impl Extractor for OfflineExtractor {
    async fn extract_from_pdf(&self, path: &Path) -> Result<Extracted> {
        self.inner.extract_from_pdf(path).await
    }

    async fn extract_from_url(&self, url: &str) -> Result<Extracted> {
        bail!("network disabled: {}", url)
    }

    async fn extract_from_file(&self, path: &Path) -> Result<Extracted> {
        self.inner.extract_from_file(path).await
    }
}

/// Replies from a fixed script, recording every context it was given.
/// Once the script runs out the last reply repeats.
pub struct ScriptedGenerator {
    replies: Vec<String>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies.iter().map(|r| r.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn contexts(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, _user: &str, context: &str) -> Result<Completion> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(context.to_string());
        let i = (calls.len() - 1).min(self.replies.len().saturating_sub(1));
        match self.replies.get(i) {
            Some(reply) => Ok(Completion::text(reply.clone())),
            None => bail!("script is empty"),
        }
    }
}

/// A generator that always fails, standing in for an unreachable LLM.
pub struct DownGenerator;

#[async_trait]
impl Generator for DownGenerator {
    fn model_name(&self) -> &str {
        "down"
    }

    async fn complete(&self, _system: &str, _user: &str, _context: &str) -> Result<Completion> {
        bail!("connection refused")
    }
}

/// Create the company database from its schema descriptor and seed it.
pub async fn company_db(dir: &Path) -> PathBuf {
    let path = dir.join("company.db");
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .unwrap()
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete);
    let pool = SqlitePool::connect_with(options).await.unwrap();

    for table in &SchemaDescriptor::company().tables {
        sqlx::query(&table.ddl()).execute(&pool).await.unwrap();
    }
    let seed = [
        "INSERT INTO CEO (NAME, EMAIL) VALUES ('Ada Byron', 'ada@company.test')",
        "INSERT INTO DEPARTMENT (NAME) VALUES ('Sales'), ('Engineering'), ('HR'), ('Finance')",
        "INSERT INTO MANAGER (NAME, DEPT_ID, EMAIL) VALUES ('Grace Hopper', 2, 'grace@company.test')",
        "INSERT INTO EMPLOYEE (NAME, DEPT_ID, MANAGER_ID, ROLE, EMAIL) VALUES \
         ('Alan Turing', 2, 1, 'Engineer', 'alan@company.test'), \
         ('Joan Clarke', 2, 1, 'Engineer', 'joan@company.test'), \
         ('Tom Kilburn', 1, 1, 'Account Executive', 'tom@company.test')",
        "INSERT INTO PROJECT (NAME, DEPT_ID, MANAGER_ID, STATUS) VALUES ('Apollo', 2, 1, 'Active')",
        "INSERT INTO TASK (PROJECT_ID, NAME, ASSIGNED_TO, STATUS, DEADLINE) VALUES \
         (1, 'Design review', 1, 'Open', '2024-06-30')",
    ];
    for statement in seed {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
    path
}
