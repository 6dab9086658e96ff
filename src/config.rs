//! TOML configuration for the `rag` binary.
//!
//! This is the composition layer: every default path, model name and
//! limit lives here. Library components receive the narrower structs
//! ([`StoreConfig`](crate::store::StoreConfig),
//! [`FusionConfig`](crate::fusion::FusionConfig),
//! [`AgentConfig`](crate::sql::AgentConfig),
//! [`IngestOptions`](crate::ingest::IngestOptions)) built from a validated
//! [`Config`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagError, RagResult};
use crate::fusion::FusionConfig;
use crate::ingest::IngestOptions;
use crate::sql::AgentConfig;
use crate::store::StoreConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreSection,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSection {
    pub root: PathBuf,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    #[serde(default = "default_payload_file")]
    pub payload_file: String,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub force_new: bool,
}

fn default_index_file() -> String {
    "index.bin".to_string()
}
fn default_payload_file() -> String {
    "docstore.json".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

fn default_batch_size() -> usize {
    64
}
fn default_embed_retries() -> u32 {
    5
}
fn default_embed_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_generation_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_generation_provider() -> String {
    "groq".to_string()
}
fn default_generation_model() -> String {
    "llama3-8b-8192".to_string()
}
fn default_generation_retries() -> u32 {
    3
}
fn default_generation_timeout() -> u64 {
    60
}

impl GenerationConfig {
    /// Base URL of the OpenAI-compatible API for the configured provider.
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".to_string(),
            "ollama" => "http://localhost:11434/v1".to_string(),
            _ => "https://api.groq.com/openai/v1".to_string(),
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_var(&self) -> Option<String> {
        if let Some(var) = &self.api_key_env {
            return Some(var.clone());
        }
        match self.provider.as_str() {
            "openai" => Some("OPENAI_API_KEY".to_string()),
            "groq" => Some("GROQ_API_KEY".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_read_only() -> bool {
    true
}
fn default_max_rows() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_max_iterations() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct FusionSection {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_secs: u64,
    #[serde(default = "default_generation_step_timeout")]
    pub generation_timeout_secs: u64,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_context_chars: default_max_context_chars(),
            system_prompt: default_system_prompt(),
            retrieval_timeout_secs: default_retrieval_timeout(),
            generation_timeout_secs: default_generation_step_timeout(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    24_000
}
fn default_system_prompt() -> String {
    "You are the assistant of the company. Use the provided context to answer the \
     question specifically and as briefly as possible."
        .to_string()
}
fn default_retrieval_timeout() -> u64 {
    30
}
fn default_generation_step_timeout() -> u64 {
    90
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub chunk_max_tokens: Option<usize>,
    #[serde(default)]
    pub stable_ids: bool,
    /// Timeout for fetching URL sources.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            chunk_max_tokens: None,
            stable_ids: false,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("extracted_content")
}
fn default_fetch_timeout() -> u64 {
    30
}

impl Config {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.store.root.clone(),
            index_file: self.store.index_file.clone(),
            payload_file: self.store.payload_file.clone(),
            dims: self.store.dims.or(self.embedding.dims),
            force_new: self.store.force_new,
        }
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            system_prompt: self.fusion.system_prompt.clone(),
            max_context_chars: self.fusion.max_context_chars,
            retrieval_timeout: Duration::from_secs(self.fusion.retrieval_timeout_secs),
            generation_timeout: Duration::from_secs(self.fusion.generation_timeout_secs),
        }
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_iterations: self.agent.max_iterations,
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            chunk_max_tokens: self.ingest.chunk_max_tokens,
            stable_ids: self.ingest.stable_ids,
        }
    }
}

/// Read, parse and validate a configuration file.
///
/// Every problem is a [`RagError::Configuration`]; nothing is defaulted
/// silently once the file has been parsed.
pub fn load_config(path: &Path) -> RagResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> RagResult<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| RagError::config(format!("failed to parse config file: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> RagResult<()> {
    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" => {}
        other => {
            return Err(RagError::config(format!(
                "unknown embedding provider '{}'. Must be openai, ollama, or local",
                other
            )))
        }
    }
    if config.embedding.provider != "local" && config.embedding.model.is_none() {
        return Err(RagError::config(format!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        )));
    }
    if config.embedding.dims == Some(0) || config.store.dims == Some(0) {
        return Err(RagError::config("embedding dimension must be > 0"));
    }
    if let (Some(a), Some(b)) = (config.embedding.dims, config.store.dims) {
        if a != b {
            return Err(RagError::config(format!(
                "store.dims ({}) does not match embedding.dims ({})",
                b, a
            )));
        }
    }
    if config.embedding.batch_size == 0 {
        return Err(RagError::config("embedding.batch_size must be > 0"));
    }

    match config.generation.provider.as_str() {
        "openai" | "groq" | "ollama" => {}
        other => {
            return Err(RagError::config(format!(
                "unknown generation provider '{}'. Must be openai, groq, or ollama",
                other
            )))
        }
    }

    match config.database.backend.as_str() {
        "sqlite" => {
            if config.database.path.is_none() {
                return Err(RagError::config(
                    "database.path is required for the sqlite backend",
                ));
            }
        }
        "mysql" => {
            let db = &config.database;
            let missing: Vec<&str> = [
                ("host", db.host.is_none()),
                ("user", db.user.is_none()),
                ("password", db.password.is_none()),
                ("name", db.name.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(field, _)| *field)
            .collect();
            if !missing.is_empty() {
                return Err(RagError::config(format!(
                    "mysql backend requires database.{}",
                    missing.join(", database.")
                )));
            }
        }
        other => {
            return Err(RagError::config(format!(
                "unknown database backend '{}'. Must be sqlite or mysql",
                other
            )))
        }
    }
    if config.database.max_rows == 0 {
        return Err(RagError::config("database.max_rows must be > 0"));
    }

    if config.agent.max_iterations < 1 {
        return Err(RagError::config("agent.max_iterations must be >= 1"));
    }
    if config.fusion.k < 1 {
        return Err(RagError::config("fusion.k must be >= 1"));
    }
    if config.fusion.max_context_chars == 0 {
        return Err(RagError::config("fusion.max_context_chars must be > 0"));
    }
    if config.ingest.chunk_max_tokens == Some(0) {
        return Err(RagError::config("ingest.chunk_max_tokens must be > 0"));
    }

    Ok(())
}
