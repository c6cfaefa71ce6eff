//! crates/quiz_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the quiz pipeline.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific extractors, LLM providers or storage engines.

use crate::domain::{ContentPayload, Quiz, QuizConfiguration};
use async_trait::async_trait;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for collaborator operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Generation Errors
//=========================================================================================

/// Substring that generation services put in messages for failures worth retrying.
pub const TRANSIENT_FAILURE_MARKER: &str = "Failed to generate quiz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Safe to retry automatically.
    Transient,
    /// Surfaced to the user immediately.
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Classifies a bare error message from a service that cannot report a kind.
    ///
    /// Matching is on English text, so localized messages always come out `Fatal`.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(TRANSIENT_FAILURE_MARKER) {
            Self::transient(message)
        } else {
            Self::fatal(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait TextExtractionService: Send + Sync {
    async fn extract_pdf(&self, bytes: &[u8]) -> PortResult<String>;

    async fn extract_docx(&self, bytes: &[u8]) -> PortResult<String>;

    async fn read_plain_text(&self, bytes: &[u8]) -> PortResult<String>;

    /// Recovers text from an image with a vision model.
    async fn ocr_image(&self, base64_data: &str, mime_type: &str) -> PortResult<String>;
}

#[async_trait]
pub trait FormatDetectionService: Send + Sync {
    /// Advisory check whether `text` is already a fully structured quiz.
    async fn looks_like_formatted_quiz(&self, text: &str) -> PortResult<bool>;
}

/// Everything the generation service needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub content: &'a ContentPayload,
    pub config: &'a QuizConfiguration,
    pub title_hint: &'a str,
    pub preformatted: bool,
}

#[async_trait]
pub trait QuizGenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Quiz, GenerationError>;
}

/// A named-slot string store. Only the rate-limit ledger lives here.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> PortResult<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> PortResult<()>;
}
