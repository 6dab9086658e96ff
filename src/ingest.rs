//! Ingestion pipeline.
//!
//! Feeds extracted text into the [`VectorStore`]:
//! source → extractor (writes a text blob) → read the blob back →
//! optional chunking → `add_texts_with_metadata` → `persist`.
//!
//! The pipeline holds no state of its own. Sources are processed one at a
//! time, so every mutation of the store is serialized with its persist.
//! A source that cannot be reached or parsed becomes one
//! [`RagError::Ingestion`] in the [`IngestReport`] and the batch moves on;
//! only fatal errors (configuration, persistence) stop a batch.

use std::collections::HashSet;
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, content_hash, TextChunk};
use crate::error::{RagError, RagResult};
use crate::extract::{content_type_for_path, Extracted, Extractor, MIME_PDF};
use crate::models::{DocumentSet, Metadata};
use crate::store::VectorStore;

/// Something to ingest: a web page or a local file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Path(PathBuf),
}

impl FromStr for Source {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Ok(Source::Url(s.to_string()))
        } else {
            Ok(Source::Path(PathBuf::from(s)))
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(url) => write!(f, "{}", url),
            Source::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Split each blob into chunks of roughly this many tokens. `None`
    /// stores each extracted blob as one document.
    pub chunk_max_tokens: Option<usize>,
    /// Use the SHA-256 of the content as the document id, so the same
    /// content cannot be stored twice.
    pub stable_ids: bool,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<DocumentSet>,
    /// One recoverable error per failed source.
    pub errors: Vec<RagError>,
}

impl IngestReport {
    pub fn added(&self) -> usize {
        self.documents.iter().map(DocumentSet::len).sum()
    }
}

pub struct IngestionPipeline {
    store: Arc<VectorStore>,
    extractor: Arc<dyn Extractor>,
    options: IngestOptions,
}

impl IngestionPipeline {
    pub fn new(store: Arc<VectorStore>, extractor: Arc<dyn Extractor>, options: IngestOptions) -> Self {
        Self {
            store,
            extractor,
            options,
        }
    }

    /// Ingest one file or URL and persist the store.
    pub async fn ingest_from_source(&self, source: &Source) -> RagResult<DocumentSet> {
        if let Source::Path(path) = source {
            if path.is_dir() {
                return Err(RagError::ingestion(
                    source.to_string(),
                    "is a directory, ingest it as part of a batch",
                ));
            }
        }
        let set = self.stage(source).await?;
        if !set.is_empty() {
            self.store.persist().await?;
        }
        Ok(set)
    }

    /// Ingest every source, expanding directories to their top-level
    /// supported files, and persist once at the end.
    ///
    /// A fatal error stops the batch. Sources staged before it are still
    /// persisted, but only the error is returned.
    pub async fn ingest_many(&self, sources: &[Source]) -> RagResult<IngestReport> {
        let mut report = IngestReport::default();
        let expanded = expand_sources(sources, &mut report.errors).await;

        for source in &expanded {
            match self.stage(source).await {
                Ok(set) => {
                    info!(source = %source, documents = set.len(), "ingested source");
                    report.documents.push(set);
                }
                Err(e) if e.is_fatal() => {
                    if report.added() > 0 {
                        if let Err(persist_err) = self.store.persist().await {
                            warn!(error = %persist_err, "could not persist sources staged before fatal error");
                        }
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "ingestion failed");
                    report.errors.push(e);
                }
            }
        }

        if report.added() > 0 {
            self.store.persist().await?;
        }
        info!(
            sources = expanded.len(),
            documents = report.added(),
            failed = report.errors.len(),
            "ingestion batch complete"
        );
        Ok(report)
    }

    /// Extract and add one source without persisting.
    async fn stage(&self, source: &Source) -> RagResult<DocumentSet> {
        let label = source.to_string();
        let extracted = self
            .extract(source)
            .await
            .map_err(|e| RagError::ingestion(&label, format!("{:#}", e)))?;

        let text = tokio::fs::read_to_string(&extracted.location)
            .await
            .map_err(|e| {
                RagError::ingestion(
                    &label,
                    format!("cannot read back {}: {}", extracted.location.display(), e),
                )
            })?;

        let pieces = self.split(&text);
        if pieces.is_empty() {
            return Err(RagError::ingestion(&label, "no text extracted"));
        }

        let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
        let metadatas: Vec<Metadata> = pieces
            .iter()
            .map(|piece| self.metadata(&label, &extracted, piece))
            .collect();
        let ids: Option<Vec<String>> = self
            .options
            .stable_ids
            .then(|| texts.iter().map(|t| content_hash(t)).collect());

        let document_ids = self
            .store
            .add_texts_with_metadata(&texts, ids.as_deref(), Some(metadatas))
            .await
            .map_err(|e| if e.is_fatal() { e } else { RagError::ingestion(&label, e) })?;

        debug!(source = %label, documents = document_ids.len(), "staged documents");
        Ok(DocumentSet {
            source: label,
            extracted_to: Some(extracted.location),
            document_ids,
        })
    }

    async fn extract(&self, source: &Source) -> anyhow::Result<Extracted> {
        match source {
            Source::Url(url) => self.extractor.extract_from_url(url).await,
            Source::Path(path) if content_type_for_path(path) == Some(MIME_PDF) => {
                self.extractor.extract_from_pdf(path).await
            }
            Source::Path(path) => self.extractor.extract_from_file(path).await,
        }
    }

    fn split(&self, text: &str) -> Vec<TextChunk> {
        let pieces = match self.options.chunk_max_tokens {
            Some(max_tokens) => chunk_text(text, max_tokens),
            None if text.trim().is_empty() => Vec::new(),
            None => vec![TextChunk {
                index: 0,
                text: text.trim().to_string(),
            }],
        };
        if !self.options.stable_ids {
            return pieces;
        }
        // identical chunks inside one source would collide on their id
        let mut seen = HashSet::new();
        pieces
            .into_iter()
            .filter(|p| seen.insert(content_hash(&p.text)))
            .collect()
    }

    fn metadata(&self, label: &str, extracted: &Extracted, piece: &TextChunk) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("source".into(), label.into());
        meta.insert(
            "extracted_to".into(),
            extracted.location.display().to_string().into(),
        );
        meta.insert("content_hash".into(), content_hash(&piece.text).into());
        if self.options.chunk_max_tokens.is_some() {
            meta.insert("chunk_index".into(), (piece.index as i64).into());
        }
        meta
    }
}

/// Replace each directory with its supported top-level files, sorted by
/// name. Unreadable or empty directories are reported as errors.
async fn expand_sources(sources: &[Source], errors: &mut Vec<RagError>) -> Vec<Source> {
    let mut out = Vec::new();
    for source in sources {
        match source {
            Source::Path(dir) if dir.is_dir() => match supported_files(dir).await {
                Ok(files) if files.is_empty() => {
                    warn!(dir = %dir.display(), "no supported files in directory");
                    errors.push(RagError::ingestion(
                        source.to_string(),
                        "directory contains no supported files",
                    ));
                }
                Ok(files) => out.extend(files.into_iter().map(Source::Path)),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "cannot list directory");
                    errors.push(RagError::ingestion(source.to_string(), e));
                }
            },
            other => out.push(other.clone()),
        }
    }
    out
}

async fn supported_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && content_type_for_path(&path).is_some() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parsing() {
        assert_eq!(
            "https://example.com/a".parse::<Source>().unwrap(),
            Source::Url("https://example.com/a".to_string())
        );
        assert_eq!(
            "HTTP://EXAMPLE.COM".parse::<Source>().unwrap(),
            Source::Url("HTTP://EXAMPLE.COM".to_string())
        );
        assert_eq!(
            "docs/report.pdf".parse::<Source>().unwrap(),
            Source::Path(PathBuf::from("docs/report.pdf"))
        );
    }

    #[tokio::test]
    async fn test_directory_expands_to_supported_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"text").unwrap();
        std::fs::write(tmp.path().join("image.png"), b"png").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("c.txt"), b"deep").unwrap();

        let mut errors = Vec::new();
        let expanded = expand_sources(&[Source::Path(tmp.path().to_path_buf())], &mut errors).await;
        assert!(errors.is_empty());
        assert_eq!(
            expanded,
            vec![
                Source::Path(tmp.path().join("a.txt")),
                Source::Path(tmp.path().join("b.pdf")),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_directory_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut errors = Vec::new();
        let expanded = expand_sources(&[Source::Path(tmp.path().to_path_buf())], &mut errors).await;
        assert!(expanded.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], RagError::Ingestion { .. }));
    }
}
