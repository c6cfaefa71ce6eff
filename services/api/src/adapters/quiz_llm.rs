//! services/api/src/adapters/quiz_llm.rs
//!
//! This module contains the adapter for the quiz-generating LLM.
//! It implements the `QuizGenerationService` port from the `core` crate.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a quiz author. You turn study material into multiple-choice quizzes.

Rules:
- Every question has between 2 and 6 answer options and exactly one correct option.
- Questions must be answerable from the material; do not invent facts that contradict it.
- Keep questions self-contained: never write "according to the text above".
- Give a one or two sentence explanation for the correct answer.

Respond with ONLY a JSON object, no markdown, in exactly this shape:
{"title": "...", "questions": [{"question": "...", "options": ["...", "..."], "correct_index": 0, "explanation": "..."}]}"#;

const PREFORMATTED_INSTRUCTIONS: &str = "The material is already a quiz. Keep every question and every option verbatim and in the same order; only determine the correct option and write the explanation.";

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use quiz_core::{
    domain::{ContentPayload, Difficulty, Question, Quiz, QuizConfiguration},
    ports::{GenerationError, GenerationRequest, QuizGenerationService, TRANSIENT_FAILURE_MARKER},
};
use serde::Deserialize;
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `QuizGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiQuizAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiQuizAdapter {
    /// Creates a new `OpenAiQuizAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// Prompt Construction
//=========================================================================================

/// Builds the user-facing instruction block for one request.
pub fn build_instructions(config: &QuizConfiguration, title_hint: &str, preformatted: bool) -> String {
    let mut lines = Vec::new();

    if config.num_questions == 0 {
        lines.push("Choose a suitable number of questions for the material (between 5 and 20).".to_string());
    } else {
        lines.push(format!("Write exactly {} questions.", config.num_questions));
    }

    match config.difficulty {
        Difficulty::AiDetermined => {
            lines.push("Choose the difficulty that best fits the material.".to_string())
        }
        other => lines.push(format!("Difficulty: {}.", other)),
    }

    lines.push(format!(
        "Write the title, questions, options and explanations in the language with code '{}'.",
        config.language
    ));
    lines.push(format!("Suggested title: {}", title_hint));

    if preformatted {
        lines.push(PREFORMATTED_INSTRUCTIONS.to_string());
    }
    if let Some(extra) = &config.custom_prompt {
        lines.push(format!("Additional instructions from the user: {}", extra));
    }

    lines.join("\n")
}

//=========================================================================================
// Response Parsing
//=========================================================================================

#[derive(Deserialize)]
struct QuizRecord {
    title: Option<String>,
    questions: Vec<QuestionRecord>,
}

#[derive(Deserialize)]
struct QuestionRecord {
    question: String,
    options: Vec<String>,
    #[serde(alias = "answer_index", alias = "correctIndex")]
    correct_index: usize,
    explanation: Option<String>,
}

impl QuizRecord {
    fn to_domain(self, title_hint: &str) -> Result<Quiz, String> {
        if self.questions.is_empty() {
            return Err("response contained no questions".to_string());
        }

        let mut questions = Vec::with_capacity(self.questions.len());
        for (i, q) in self.questions.into_iter().enumerate() {
            if q.options.len() < 2 {
                return Err(format!("question {} has fewer than two options", i + 1));
            }
            if q.correct_index >= q.options.len() {
                return Err(format!("question {} points at a missing option", i + 1));
            }
            questions.push(Question {
                prompt: q.question,
                options: q.options,
                correct_index: q.correct_index,
                explanation: q.explanation.filter(|e| !e.trim().is_empty()),
            });
        }

        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| title_hint.to_string());

        Ok(Quiz { title, questions })
    }
}

/// Removes a surrounding markdown code fence, if the model added one anyway.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses the model's reply. Malformed output is worth another try.
pub fn parse_quiz(raw: &str, title_hint: &str) -> Result<Quiz, GenerationError> {
    let record: QuizRecord = serde_json::from_str(strip_code_fence(raw)).map_err(|e| {
        GenerationError::transient(format!("{}: invalid JSON from model ({})", TRANSIENT_FAILURE_MARKER, e))
    })?;
    record
        .to_domain(title_hint)
        .map_err(|reason| GenerationError::transient(format!("{}: {}", TRANSIENT_FAILURE_MARKER, reason)))
}

fn build_error(e: OpenAIError) -> GenerationError {
    GenerationError::fatal(format!("Could not build generation request: {}", e))
}

//=========================================================================================
// `QuizGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuizGenerationService for OpenAiQuizAdapter {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<Quiz, GenerationError> {
        let instructions =
            build_instructions(request.config, request.title_hint, request.preformatted);

        let user_content = match request.content {
            ContentPayload::Text(text) => ChatCompletionRequestUserMessageContent::Text(format!(
                "{}\n\nMATERIAL:\n---\n{}\n---",
                instructions, text
            )),
            ContentPayload::Image(image) => ChatCompletionRequestUserMessageContent::Array(vec![
                ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText {
                        text: format!("{}\n\nThe material is the attached image.", instructions),
                    },
                ),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: format!("data:{};base64,{}", image.mime_type, image.base64_data),
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                ),
            ]),
        };

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_INSTRUCTIONS)
                    .build()
                    .map_err(build_error)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(user_content)
                    .build()
                    .map_err(build_error)?,
            ),
        ];

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.4)
            .build()
            .map_err(build_error)?;

        debug!("Requesting quiz from model {}", self.model);
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e: OpenAIError| {
                warn!("Quiz generation API call failed: {}", e);
                GenerationError::fatal(format!("Quiz service unavailable: {}", e))
            })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::transient(format!("{}: empty response from model", TRANSIENT_FAILURE_MARKER))
            })?;

        parse_quiz(&content, request.title_hint)
    }
}
