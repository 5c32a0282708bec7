use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CHUNK_CHARS: usize = 1000;
const SUMMARY_MIN_TEXT_CHARS: usize = 1000;
const SUMMARY_SENTENCES: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub content: Option<Vec<u8>>,
    /// Extension-like hint such as `txt` or `pdf`; inferred from the path when absent.
    #[serde(default)]
    pub file_type: Option<String>,
}

impl ExtractionRequest {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into().into_bytes()),
            file_type: Some("txt".into()),
            ..Self::default()
        }
    }

    fn resolved_type(&self) -> Option<String> {
        self.file_type
            .clone()
            .or_else(|| {
                self.file_path
                    .as_deref()
                    .and_then(Path::extension)
                    .map(|e| e.to_string_lossy().into_owned())
            })
            .map(|t| t.trim().trim_start_matches('.').to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub chunks: Vec<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no file path or content provided")]
    NoInput,
    #[error("unsupported file type: {0}")]
    Unsupported(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("content is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, ExtractionError>;
}

/// UTF-8 text and Markdown. Paragraphs are merged into chunks of up to
/// `chunk_chars` characters.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    chunk_chars: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self {
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

impl PlainTextExtractor {
    pub fn with_chunk_chars(chunk_chars: usize) -> Self {
        Self {
            chunk_chars: chunk_chars.max(1),
        }
    }
}

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<Extraction, ExtractionError> {
        if let Some(kind) = request.resolved_type() {
            if !matches!(kind.as_str(), "txt" | "text" | "md" | "markdown" | "") {
                return Err(ExtractionError::Unsupported(kind));
            }
        }

        let text = match (&request.content, &request.file_path) {
            (Some(bytes), _) => String::from_utf8(bytes.clone())?,
            (None, Some(path)) => tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ExtractionError::Read {
                    path: path.clone(),
                    source,
                })?,
            (None, None) => return Err(ExtractionError::NoInput),
        };

        let chunks = chunk_text(&text, self.chunk_chars);
        let summary = (text.chars().count() > SUMMARY_MIN_TEXT_CHARS)
            .then(|| lead_summary(&text, SUMMARY_SENTENCES))
            .flatten();

        tracing::info!(chunks = chunks.len(), chars = text.len(), "text extracted");
        Ok(Extraction { chunks, summary })
    }
}

/// Splits on blank lines and packs paragraphs greedily up to `max_chars`.
/// A single paragraph longer than `max_chars` is hard-split.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = text
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty());

    for paragraph in paragraphs {
        let para_len = paragraph.chars().count();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 2 + para_len > max_chars {
            chunks.push(std::mem::take(&mut current));
        }

        if para_len > max_chars {
            let chars: Vec<char> = paragraph.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect::<String>().trim().to_string());
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

fn lead_summary(text: &str, sentences: usize) -> Option<String> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let lead: Vec<&str> = flat
        .split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(sentences)
        .collect();
    if lead.is_empty() {
        None
    } else {
        Some(lead.join(" "))
    }
}
