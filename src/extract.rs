//! Text extraction collaborators.
//!
//! An [`Extractor`] turns a source (PDF, web page, local document) into a
//! plain UTF-8 blob, writes the blob to durable storage and reports where.
//! The ingestion pipeline reads the blob back from that location, so a
//! crashed ingestion can be retried from the extracted text alone.
//!
//! [`FileExtractor`] names each blob `<stem>_<YYYYmmdd_HHMMSS>.txt` inside
//! its output directory.
//!
//! | Source | Content type | Method |
//! |--------|--------------|--------|
//! | `.pdf` | `application/pdf` | `pdf-extract` |
//! | `.docx` | OOXML word | `word/document.xml` text runs |
//! | `.pptx` | OOXML presentation | `ppt/slides/slideN.xml` text runs |
//! | `.txt`, `.md` | text | read as-is |
//! | `http(s)://` | HTML | `scraper`, scripts and styles removed |

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::error::{RagError, RagResult};
use crate::http;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_HTML: &str = "text/html";

/// Maximum decompressed bytes to read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("text is not valid UTF-8")]
    Encoding,
}

/// A durably written extraction result.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub text: String,
    pub location: PathBuf,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_from_pdf(&self, path: &Path) -> Result<Extracted>;

    async fn extract_from_url(&self, url: &str) -> Result<Extracted>;

    /// Extract any supported local file. Only PDFs unless overridden.
    async fn extract_from_file(&self, path: &Path) -> Result<Extracted> {
        match content_type_for_path(path) {
            Some(MIME_PDF) => self.extract_from_pdf(path).await,
            _ => bail!("unsupported file type: {}", path.display()),
        }
    }
}

/// Content type for a local file, by extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "pptx" => Some(MIME_PPTX),
        "txt" | "md" | "markdown" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extract plain text from in-memory content of a known type.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string())),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        MIME_TEXT => String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::Encoding),
        MIME_HTML => Ok(html_to_text(&String::from_utf8_lossy(bytes))),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = name
                .strip_prefix("ppt/slides/slide")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    slides.sort();

    let mut out = String::new();
    for (_, name) in slides {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        let text = collect_text_runs(&xml)?;
        if text.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Concatenate every `<*:t>` run, one line per `<*:p>` paragraph. Works for
/// both WordprocessingML (`w:`) and DrawingML (`a:`) namespaces.
fn collect_text_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut paragraph = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" => {
                    let line = paragraph.trim();
                    if !line.is_empty() {
                        if !out.is_empty() {
                            out.push('\n');
                        }
                        out.push_str(line);
                    }
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Text(t)) if in_run => {
                let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = paragraph.trim();
    if !tail.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(tail);
    }
    Ok(out)
}

/// Visible text of an HTML page, one line per text node.
pub fn html_to_text(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let root = scraper::Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
        .unwrap_or_else(|| document.root_element());

    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| {
                matches!(e.name(), "script" | "style" | "noscript" | "template" | "svg")
            })
        });
        if hidden {
            continue;
        }
        let line = collapse_whitespace(text);
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Last path segment of a URL without its extension, or `"web"`.
fn url_stem(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let after_scheme = path.split_once("://").map(|(_, rest)| rest).unwrap_or(path);
    let segment = after_scheme
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let stem = Path::new(segment)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let cleaned = sanitize_stem(stem);
    if cleaned.is_empty() {
        "web".to_string()
    } else {
        cleaned
    }
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============ FileExtractor ============

/// Extracts sources and writes each blob under `output_dir`.
pub struct FileExtractor {
    output_dir: PathBuf,
    client: reqwest::Client,
}

impl FileExtractor {
    pub fn new(output_dir: impl Into<PathBuf>, timeout: Duration) -> RagResult<Self> {
        let client = http::build_client(timeout)
            .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            output_dir: output_dir.into(),
            client,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `text` to `<stem>_<timestamp>.txt`, adding a counter if that
    /// name is already taken within the same second.
    async fn write_blob(&self, stem: &str, text: String) -> Result<Extracted> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("cannot create {}", self.output_dir.display()))?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let mut location = self.output_dir.join(format!("{}_{}.txt", stem, timestamp));
        let mut n = 1;
        while tokio::fs::try_exists(&location).await.unwrap_or(false) {
            location = self
                .output_dir
                .join(format!("{}_{}_{}.txt", stem, timestamp, n));
            n += 1;
        }

        tokio::fs::write(&location, text.as_bytes())
            .await
            .with_context(|| format!("cannot write {}", location.display()))?;
        debug!(location = %location.display(), bytes = text.len(), "wrote extracted text");
        Ok(Extracted { text, location })
    }

    async fn extract_local(&self, path: &Path, content_type: &'static str) -> Result<Extracted> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, content_type))
            .await
            .context("extraction task panicked")??;
        if text.trim().is_empty() {
            bail!("no extractable text in {}", path.display());
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(sanitize_stem)
            .unwrap_or_else(|| "document".to_string());
        self.write_blob(&stem, text).await
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    async fn extract_from_pdf(&self, path: &Path) -> Result<Extracted> {
        self.extract_local(path, MIME_PDF).await
    }

    async fn extract_from_url(&self, url: &str) -> Result<Extracted> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("{} returned an error status", url))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(MIME_HTML)
            .to_ascii_lowercase();
        let bytes = response.bytes().await?.to_vec();

        let text = if content_type.starts_with(MIME_PDF) {
            tokio::task::spawn_blocking(move || extract_text(&bytes, MIME_PDF))
                .await
                .context("extraction task panicked")??
        } else if content_type.starts_with(MIME_TEXT) {
            String::from_utf8_lossy(&bytes).into_owned()
        } else {
            html_to_text(&String::from_utf8_lossy(&bytes))
        };
        if text.trim().is_empty() {
            bail!("no extractable text at {}", url);
        }
        self.write_blob(&url_stem(url), text).await
    }

    async fn extract_from_file(&self, path: &Path) -> Result<Extracted> {
        match content_type_for_path(path) {
            Some(content_type) => self.extract_local(path, content_type).await,
            None => bail!("unsupported file type: {}", path.display()),
        }
    }
}
