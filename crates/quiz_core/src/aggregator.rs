//! crates/quiz_core/src/aggregator.rs
//!
//! Turns whatever the user supplied (files, pasted text or a prompt) into one
//! normalized content payload for the generation service.
//!
//! Files are extracted strictly one after another in the order given, so the
//! delimited sections of the payload always follow the input order no matter
//! how long each extraction takes.

use crate::domain::{AggregatedContent, ContentPayload, ExtractedUnit, ImagePayload, InputFile, SourceInput};
use crate::ports::{FormatDetectionService, TextExtractionService};
use crate::session::SessionToken;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Title used when no better suggestion can be derived from the input.
pub const FALLBACK_TITLE: &str = "Generated Quiz";

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileKind(String),
    #[error("Could not extract text from {0}")]
    ExtractionFailure(String),
    #[error("No usable content was provided")]
    EmptyContent,
    #[error("Intake was replaced by a newer one")]
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    PlainText,
    Image,
}

impl FileKind {
    /// Classifies by MIME type, falling back to the extension when the type is
    /// missing or generic.
    pub fn detect(file: &InputFile) -> Option<Self> {
        let mime = file.mime_type.trim().to_ascii_lowercase();
        match mime.as_str() {
            "application/pdf" => return Some(FileKind::Pdf),
            DOCX_MIME => return Some(FileKind::Docx),
            m if m.starts_with("text/") => return Some(FileKind::PlainText),
            m if m.starts_with("image/") => return Some(FileKind::Image),
            "" | "application/octet-stream" => {}
            _ => return None,
        }

        let extension = Path::new(&file.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        match extension.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "txt" | "md" | "csv" => Some(FileKind::PlainText),
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Some(FileKind::Image),
            _ => None,
        }
    }
}

fn image_mime(file: &InputFile) -> String {
    let declared = file.mime_type.trim().to_ascii_lowercase();
    if declared.starts_with("image/") {
        return declared;
    }
    let ext = Path::new(&file.name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "gif" => "image/gif".to_string(),
        "webp" => "image/webp".to_string(),
        _ => "image/png".to_string(),
    }
}

/// Joins extracted units into the delimited payload, preserving order.
pub fn join_units(units: &[ExtractedUnit]) -> String {
    let mut joined = String::new();
    for unit in units {
        joined.push_str(&format!("=== {} ===\n\n{}\n\n", unit.file_name, unit.text));
    }
    joined.trim().to_string()
}

/// Longest common literal prefix of the files' base names, without trailing separators.
pub fn suggest_title(file_names: &[&str]) -> String {
    if file_names.len() < 2 {
        return FALLBACK_TITLE.to_string();
    }

    let stems: Vec<&str> = file_names
        .iter()
        .map(|name| {
            Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(name)
        })
        .collect();

    let mut prefix: Vec<char> = stems[0].chars().collect();
    for stem in &stems[1..] {
        let shared = prefix
            .iter()
            .zip(stem.chars())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }

    let prefix: String = prefix.into_iter().collect();
    let trimmed = prefix.trim_end_matches(|c: char| !c.is_alphanumeric());
    if trimmed.is_empty() {
        FALLBACK_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct ContentAggregator {
    extractor: Arc<dyn TextExtractionService>,
    detector: Arc<dyn FormatDetectionService>,
}

impl ContentAggregator {
    pub fn new(
        extractor: Arc<dyn TextExtractionService>,
        detector: Arc<dyn FormatDetectionService>,
    ) -> Self {
        Self { extractor, detector }
    }

    /// Aggregates `input` into one payload.
    ///
    /// `session` is checked after every suspension; once a newer intake has
    /// started the partial result is dropped with `AggregateError::Superseded`.
    pub async fn aggregate(
        &self,
        input: &SourceInput,
        session: &SessionToken,
    ) -> Result<AggregatedContent, AggregateError> {
        let (payload, title_suggestion) = match input {
            SourceInput::Files(files) => self.aggregate_files(files, session).await?,
            SourceInput::PastedText(text) | SourceInput::Prompt(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(AggregateError::EmptyContent);
                }
                (ContentPayload::Text(text.to_string()), FALLBACK_TITLE.to_string())
            }
        };

        let looks_preformatted = match &payload {
            ContentPayload::Text(text) => self.detect_preformatted(text).await,
            ContentPayload::Image(_) => false,
        };
        if !session.is_current() {
            return Err(AggregateError::Superseded);
        }

        Ok(AggregatedContent {
            payload,
            looks_preformatted,
            title_suggestion,
        })
    }

    async fn detect_preformatted(&self, text: &str) -> bool {
        match self.detector.looks_like_formatted_quiz(text).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!("Format detection failed, assuming raw content: {}", e);
                false
            }
        }
    }

    async fn aggregate_files(
        &self,
        files: &[InputFile],
        session: &SessionToken,
    ) -> Result<(ContentPayload, String), AggregateError> {
        if files.is_empty() {
            return Err(AggregateError::EmptyContent);
        }

        let kinds = files
            .iter()
            .map(|file| {
                FileKind::detect(file)
                    .ok_or_else(|| AggregateError::UnsupportedFileKind(file.name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let single_image = files.len() == 1 && kinds[0] == FileKind::Image;
        info!("Aggregating {} file(s)", files.len());

        let mut units = Vec::with_capacity(files.len());
        for (file, kind) in files.iter().zip(&kinds) {
            let text = match kind {
                FileKind::Image => {
                    let mime = image_mime(file);
                    let encoded = STANDARD.encode(&file.bytes);
                    let ocr = self.extractor.ocr_image(&encoded, &mime).await;
                    if !session.is_current() {
                        return Err(AggregateError::Superseded);
                    }
                    match ocr {
                        Ok(text) if !text.trim().is_empty() => text,
                        Ok(_) | Err(_) if single_image => {
                            debug!("No text recovered from {}, sending the image itself", file.name);
                            let title = FALLBACK_TITLE.to_string();
                            return Ok((
                                ContentPayload::Image(ImagePayload {
                                    base64_data: encoded,
                                    mime_type: mime,
                                }),
                                title,
                            ));
                        }
                        Ok(text) => text,
                        Err(e) => {
                            warn!("OCR failed for {}: {}", file.name, e);
                            return Err(AggregateError::ExtractionFailure(file.name.clone()));
                        }
                    }
                }
                other => {
                    let extracted = match other {
                        FileKind::Pdf => self.extractor.extract_pdf(&file.bytes).await,
                        FileKind::Docx => self.extractor.extract_docx(&file.bytes).await,
                        _ => self.extractor.read_plain_text(&file.bytes).await,
                    };
                    if !session.is_current() {
                        return Err(AggregateError::Superseded);
                    }
                    extracted.map_err(|e| {
                        warn!("Extraction failed for {}: {}", file.name, e);
                        AggregateError::ExtractionFailure(file.name.clone())
                    })?
                }
            };

            units.push(ExtractedUnit {
                file_name: file.name.clone(),
                text: text.trim().to_string(),
            });
        }

        let joined = join_units(&units);
        if units.iter().all(|u| u.text.is_empty()) {
            return Err(AggregateError::EmptyContent);
        }

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        Ok((ContentPayload::Text(joined), suggest_title(&names)))
    }
}
