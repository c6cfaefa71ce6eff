//! crates/quiz_core/src/domain.rs
//!
//! Defines the pure, core data structures for the quiz pipeline.
//! These structs are independent of any transport or serialization format.

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Intake
//=========================================================================================

/// A single uploaded file, exactly as the user supplied it.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl InputFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// The raw material a quiz is generated from. Only one source is active at a time.
#[derive(Debug, Clone)]
pub enum SourceInput {
    Files(Vec<InputFile>),
    PastedText(String),
    Prompt(String),
}

/// Text recovered from one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedUnit {
    pub file_name: String,
    pub text: String,
}

/// A raw image handed directly to the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub base64_data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    Text(String),
    Image(ImagePayload),
}

impl ContentPayload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPayload::Text(text) => Some(text),
            ContentPayload::Image(_) => None,
        }
    }
}

/// The normalized result of intake, ready for generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedContent {
    pub payload: ContentPayload,
    pub looks_preformatted: bool,
    pub title_suggestion: String,
}

//=========================================================================================
// Configuration
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    AiDetermined,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::AiDetermined => "ai_determined",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "ai" | "ai_determined" | "ai-determined" => Ok(Difficulty::AiDetermined),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

/// The canonical settings a quiz is generated with.
///
/// `num_questions == 0` together with `Difficulty::AiDetermined` means the
/// generation service decides both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizConfiguration {
    pub num_questions: u32,
    pub difficulty: Difficulty,
    pub language: String,
    pub custom_prompt: Option<String>,
}

impl QuizConfiguration {
    pub fn is_ai_determined(&self) -> bool {
        self.difficulty == Difficulty::AiDetermined
    }
}

//=========================================================================================
// Generation
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: Option<String>,
}

/// A generated quiz. The orchestrator never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Who is asking for a quiz; decides whether the anonymous quota applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous { client_id: String },
    Authenticated { user_id: Uuid },
}

/// Snapshot of the attempt currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub progress_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success { quiz: Quiz, config: QuizConfiguration },
    RateLimited { limit: u32 },
    Failure { message: String },
    /// A newer intake replaced this request before it finished.
    Superseded,
}
