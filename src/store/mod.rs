//! Persistent vector index store.
//!
//! A [`VectorStore`] owns three pieces of state that must stay consistent:
//!
//! - the [`FlatL2Index`] of embedding vectors, addressed by ordinal
//! - the ordinal → document id map
//! - the id → [`Document`] map
//!
//! Ordinals are assigned in insertion order and never reused, so every
//! ordinal below `index.len()` was handed out exactly once, across reloads.
//!
//! # Persistence
//!
//! [`VectorStore::persist`] writes the index file first and the payload
//! file second, each through a temporary file and a rename. A crash between
//! the two leaves a payload that lags behind the index; the next
//! [`VectorStore::initialize`] reconciles the two and records what it
//! dropped in a [`LoadReport`].
//!
//! # Concurrency
//!
//! Reads (`similarity_search`, `get`, `stats`) take a shared lock; `add_*`
//! takes an exclusive one only after embedding has finished. `persist`
//! holds its own async mutex so concurrent persists cannot interleave their
//! writes.

pub mod index;
pub mod snapshot;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{RagError, RagResult};
use crate::models::{Document, Metadata};

pub use index::FlatL2Index;
pub use snapshot::LoadReport;
use snapshot::{encode_payload, reconcile, PayloadFile};

/// Where the store lives and how to open it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub index_file: String,
    pub payload_file: String,
    /// Required when a new index is created; checked against the file
    /// otherwise.
    pub dims: Option<usize>,
    /// Ignore anything on disk and start empty.
    pub force_new: bool,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, dims: usize) -> Self {
        Self {
            root: root.into(),
            index_file: "index.bin".to_string(),
            payload_file: "docstore.json".to_string(),
            dims: Some(dims),
            force_new: false,
        }
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_file)
    }

    pub fn payload_path(&self) -> PathBuf {
        self.root.join(&self.payload_file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub dims: usize,
    /// Vectors in the index, including any whose document was dropped.
    /// Also the ordinal the next added vector receives.
    pub total_vectors: usize,
    /// Documents reachable from a live ordinal.
    pub live_documents: usize,
}

struct StoreState {
    index: FlatL2Index,
    index_to_id: BTreeMap<usize, String>,
    documents: HashMap<String, Document>,
}

impl StoreState {
    fn empty(dims: usize) -> Self {
        Self {
            index: FlatL2Index::new(dims),
            index_to_id: BTreeMap::new(),
            documents: HashMap::new(),
        }
    }
}

pub struct VectorStore {
    config: StoreConfig,
    embedder: Arc<dyn Embedder>,
    state: RwLock<StoreState>,
    persist_lock: tokio::sync::Mutex<()>,
    load_report: Option<LoadReport>,
}

impl VectorStore {
    /// Open the store at `config.root`, or create an empty one.
    ///
    /// A new index is created when `force_new` is set or no index file
    /// exists; the empty snapshot is persisted immediately. Otherwise the
    /// index file must decode cleanly ([`RagError::CorruptedStore`] if not)
    /// and match the configured dimension. Payload problems never fail the
    /// load: they are reconciled and reported through
    /// [`load_report`](Self::load_report).
    pub async fn initialize(config: StoreConfig, embedder: Arc<dyn Embedder>) -> RagResult<Self> {
        if config.force_new || !config.index_path().exists() {
            Self::create(config, embedder).await
        } else {
            Self::load(config, embedder).await
        }
    }

    async fn create(config: StoreConfig, embedder: Arc<dyn Embedder>) -> RagResult<Self> {
        let dims = match config.dims {
            Some(d) if d > 0 => d,
            _ => {
                return Err(RagError::config(
                    "embedding dimension must be set to create a new index",
                ))
            }
        };
        check_embedder_dims(embedder.as_ref(), dims)?;
        info!(root = %config.root.display(), dims, "creating new vector index");

        let store = Self {
            config,
            embedder,
            state: RwLock::new(StoreState::empty(dims)),
            persist_lock: tokio::sync::Mutex::new(()),
            load_report: None,
        };
        store.persist().await?;
        Ok(store)
    }

    async fn load(config: StoreConfig, embedder: Arc<dyn Embedder>) -> RagResult<Self> {
        let index_path = config.index_path();
        let bytes = tokio::fs::read(&index_path).await.map_err(|e| {
            RagError::CorruptedStore(format!("cannot read {}: {}", index_path.display(), e))
        })?;
        let index = FlatL2Index::from_bytes(&bytes)
            .map_err(|e| RagError::CorruptedStore(format!("{}: {}", index_path.display(), e)))?;

        if let Some(dims) = config.dims {
            if dims != index.dims() {
                return Err(RagError::config(format!(
                    "index at {} has {} dimensions, configuration declares {}",
                    index_path.display(),
                    index.dims(),
                    dims
                )));
            }
        }
        check_embedder_dims(embedder.as_ref(), index.dims())?;

        let (payload, problem) = read_payload(&config.payload_path()).await;
        if let Some(p) = payload.as_ref().and_then(|p| p.dims) {
            if p != index.dims() {
                warn!(payload_dims = p, index_dims = index.dims(), "payload dimension disagrees with index");
            }
        }
        if let Some(problem) = &problem {
            warn!(problem = %problem, "payload file unusable, loading index without documents");
        }

        let reconciled = reconcile(index.len(), payload, problem);
        info!(
            root = %config.root.display(),
            vectors = index.len(),
            documents = reconciled.report.live_documents,
            dropped = reconciled.report.dropped_ordinals.len(),
            "loaded vector index"
        );

        Ok(Self {
            config,
            embedder,
            state: RwLock::new(StoreState {
                index,
                index_to_id: reconciled.index_to_id,
                documents: reconciled.documents,
            }),
            persist_lock: tokio::sync::Mutex::new(()),
            load_report: Some(reconciled.report),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dims(&self) -> usize {
        self.read_state().index.dims()
    }

    /// What the last load had to repair. `None` for a freshly created store.
    pub fn load_report(&self) -> Option<&LoadReport> {
        self.load_report.as_ref()
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.read_state();
        StoreStats {
            dims: state.index.dims(),
            total_vectors: state.index.len(),
            live_documents: state.index_to_id.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.read_state().index_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.read_state().documents.get(id).cloned()
    }

    /// Embed and append `texts`. Returns the id of each new document, in
    /// input order.
    ///
    /// Without explicit `ids`, each document's id is the decimal string of
    /// its ordinal, suffixed with `-<n>` if an explicit id already uses that
    /// string. Nothing is mutated unless every text embeds and every id
    /// is new. Changes are in memory until [`persist`](Self::persist).
    pub async fn add_texts(&self, texts: &[String], ids: Option<&[String]>) -> RagResult<Vec<String>> {
        self.add_texts_with_metadata(texts, ids, None).await
    }

    pub async fn add_texts_with_metadata(
        &self,
        texts: &[String],
        ids: Option<&[String]>,
        metadatas: Option<Vec<Metadata>>,
    ) -> RagResult<Vec<String>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(ids) = ids {
            if ids.len() != texts.len() {
                return Err(RagError::InvalidArgument(format!(
                    "{} ids supplied for {} texts",
                    ids.len(),
                    texts.len()
                )));
            }
        }
        if let Some(metadatas) = &metadatas {
            if metadatas.len() != texts.len() {
                return Err(RagError::InvalidArgument(format!(
                    "{} metadata entries supplied for {} texts",
                    metadatas.len(),
                    texts.len()
                )));
            }
        }

        let vectors = self
            .embedder
            .embed_many(texts)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dims = self.dims();
        for v in &vectors {
            check_vector_dims(v.len(), dims)?;
        }

        let mut state = self.write_state();
        let base = state.index.len();
        let ids: Vec<String> = match ids {
            Some(ids) => {
                let mut batch = HashSet::new();
                for id in ids {
                    if state.documents.contains_key(id) || !batch.insert(id.as_str()) {
                        return Err(RagError::InvalidArgument(format!(
                            "document id '{}' already exists",
                            id
                        )));
                    }
                }
                ids.to_vec()
            }
            None => (base..base + texts.len())
                .map(|ordinal| free_ordinal_id(&state.documents, ordinal))
                .collect(),
        };

        let ordinals = state
            .index
            .add(&vectors)
            .map_err(|e| RagError::config(e.to_string()))?;
        let mut metadatas = metadatas.unwrap_or_default().into_iter();
        for ((ordinal, id), text) in ordinals.zip(&ids).zip(texts) {
            state.index_to_id.insert(ordinal, id.clone());
            state.documents.insert(
                id.clone(),
                Document {
                    id: id.clone(),
                    content: text.clone(),
                    metadata: metadatas.next().unwrap_or_default(),
                },
            );
        }

        debug!(added = ids.len(), first_ordinal = base, "added documents to vector index");
        Ok(ids)
    }

    /// Write the index file, then the payload file.
    pub async fn persist(&self) -> RagResult<()> {
        let _guard = self.persist_lock.lock().await;

        let payload_path = self.config.payload_path();
        let (index_bytes, payload_bytes) = {
            let state = self.read_state();
            let payload = encode_payload(state.index.dims(), &state.index_to_id, &state.documents)
                .map_err(|e| RagError::Persistence {
                    path: payload_path.clone(),
                    source: e.into(),
                })?;
            (state.index.to_bytes(), payload)
        };

        tokio::fs::create_dir_all(&self.config.root)
            .await
            .map_err(|source| RagError::Persistence {
                path: self.config.root.clone(),
                source,
            })?;
        write_atomic(&self.config.index_path(), &index_bytes).await?;
        write_atomic(&payload_path, &payload_bytes).await?;

        debug!(root = %self.config.root.display(), "persisted vector index");
        Ok(())
    }

    /// The `k` documents nearest to `query`, closest first.
    pub async fn similarity_search(&self, query: &str, k: usize) -> RagResult<Vec<Document>> {
        Ok(self
            .similarity_search_with_scores(query, k)
            .await?
            .into_iter()
            .map(|(doc, _)| doc)
            .collect())
    }

    /// Like [`similarity_search`](Self::similarity_search), paired with
    /// each document's squared L2 distance.
    ///
    /// An empty store returns no results without calling the embedder.
    pub async fn similarity_search_with_scores(
        &self,
        query: &str,
        k: usize,
    ) -> RagResult<Vec<(Document, f32)>> {
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be at least 1".to_string()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed_one(query)
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        let state = self.read_state();
        check_vector_dims(vector.len(), state.index.dims())?;
        let hits = state
            .index
            .search(&vector, k, |ordinal| state.index_to_id.contains_key(&ordinal));
        Ok(hits
            .into_iter()
            .filter_map(|(ordinal, distance)| {
                let id = state.index_to_id.get(&ordinal)?;
                state.documents.get(id).map(|doc| (doc.clone(), distance))
            })
            .collect())
    }

    /// Wrap a shared store as a [`Retriever`].
    pub fn as_retriever(self: &Arc<Self>) -> Arc<dyn Retriever> {
        Arc::new(StoreRetriever {
            store: Arc::clone(self),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the documents most relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> RagResult<Vec<Document>>;
}

pub struct StoreRetriever {
    store: Arc<VectorStore>,
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> RagResult<Vec<Document>> {
        self.store.similarity_search(query, k).await
    }
}

/// The decimal ordinal, or `<ordinal>-<n>` for the smallest `n` that is
/// free when an explicit id already took the plain form.
fn free_ordinal_id(documents: &HashMap<String, Document>, ordinal: usize) -> String {
    let plain = ordinal.to_string();
    if !documents.contains_key(&plain) {
        return plain;
    }
    (1..)
        .map(|n| format!("{}-{}", ordinal, n))
        .find(|id| !documents.contains_key(id))
        .unwrap_or(plain)
}

fn check_embedder_dims(embedder: &dyn Embedder, dims: usize) -> RagResult<()> {
    if embedder.dims() != dims {
        return Err(RagError::config(format!(
            "embedding model '{}' produces {} dimensions, index has {}",
            embedder.model_name(),
            embedder.dims(),
            dims
        )));
    }
    Ok(())
}

fn check_vector_dims(got: usize, dims: usize) -> RagResult<()> {
    if got != dims {
        return Err(RagError::config(format!(
            "embedding has {} dimensions, index has {}",
            got, dims
        )));
    }
    Ok(())
}

async fn read_payload(path: &Path) -> (Option<PayloadFile>, Option<String>) {
    match tokio::fs::read(path).await {
        Ok(raw) => match serde_json::from_slice::<PayloadFile>(&raw) {
            Ok(payload) => (Some(payload), None),
            Err(e) => (
                None,
                Some(format!("payload file {} is unreadable: {}", path.display(), e)),
            ),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (
            None,
            Some(format!("payload file {} is missing", path.display())),
        ),
        Err(e) => (
            None,
            Some(format!("cannot read payload file {}: {}", path.display(), e)),
        ),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> RagResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let persistence = |source| RagError::Persistence {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, bytes).await.map_err(persistence)?;
    tokio::fs::rename(&tmp, path).await.map_err(persistence)?;
    Ok(())
}
