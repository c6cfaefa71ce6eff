//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{middleware::Locale, state::AppState};
use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use bytes::Bytes;
use quiz_core::{
    rate_limiter::now_millis, AggregateError, ConfigResolver, Difficulty, GenerationOutcome,
    Identity, InputFile, Question, Quiz, QuizConfiguration, SessionToken, SourceInput,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        generate_quiz_handler,
        quota_handler,
    ),
    components(
        schemas(GenerateQuizResponse, QuizDto, QuestionDto, ConfigDto, QuotaResponse, ErrorResponse)
    ),
    tags(
        (name = "Quiz Generator API", description = "Turns uploaded material into multiple-choice quizzes.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct QuestionDto {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: Option<String>,
}

impl From<&Question> for QuestionDto {
    fn from(q: &Question) -> Self {
        Self {
            prompt: q.prompt.clone(),
            options: q.options.clone(),
            correct_index: q.correct_index,
            explanation: q.explanation.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct QuizDto {
    pub title: String,
    pub questions: Vec<QuestionDto>,
}

impl From<&Quiz> for QuizDto {
    fn from(quiz: &Quiz) -> Self {
        Self {
            title: quiz.title.clone(),
            questions: quiz.questions.iter().map(QuestionDto::from).collect(),
        }
    }
}

/// The configuration a quiz was (or will be) generated with.
///
/// `num_questions == 0` with difficulty `ai_determined` lets the model decide both.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ConfigDto {
    pub num_questions: u32,
    pub difficulty: String,
    pub language: String,
    pub custom_prompt: Option<String>,
}

impl From<&QuizConfiguration> for ConfigDto {
    fn from(config: &QuizConfiguration) -> Self {
        Self {
            num_questions: config.num_questions,
            difficulty: config.difficulty.as_str().to_string(),
            language: config.language.clone(),
            custom_prompt: config.custom_prompt.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct GenerateQuizResponse {
    pub quiz: QuizDto,
    pub config: ConfigDto,
    pub title_suggestion: String,
    pub looks_preformatted: bool,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct QuotaResponse {
    pub authenticated: bool,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
    /// Only set when the anonymous quota was exhausted.
    pub limit: Option<u32>,
}

type ApiFailure = (StatusCode, Json<ErrorResponse>);

fn failure(status: StatusCode, message: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ErrorResponse {
            message: message.into(),
            limit: None,
        }),
    )
}

//=========================================================================================
// Multipart Parsing
//=========================================================================================

/// Everything a client may put in a `POST /quizzes` form.
#[derive(Debug, Default)]
pub struct QuizForm {
    pub files: Vec<InputFile>,
    pub text: Option<String>,
    pub prompt: Option<String>,
    pub mode: Option<String>,
    pub difficulty: Option<String>,
    pub num_questions: Option<String>,
    pub custom_prompt: Option<String>,
}

impl QuizForm {
    /// Picks the one source the form carries. Mixing kinds is rejected.
    pub fn source(&self) -> Result<SourceInput, String> {
        let text = self.text.as_deref().filter(|t| !t.trim().is_empty());
        let prompt = self.prompt.as_deref().filter(|p| !p.trim().is_empty());

        let given = [!self.files.is_empty(), text.is_some(), prompt.is_some()]
            .iter()
            .filter(|present| **present)
            .count();
        if given > 1 {
            return Err("Send either files, text or a prompt, not several".to_string());
        }

        if !self.files.is_empty() {
            Ok(SourceInput::Files(self.files.clone()))
        } else if let Some(text) = text {
            Ok(SourceInput::PastedText(text.to_string()))
        } else if let Some(prompt) = prompt {
            Ok(SourceInput::Prompt(prompt.to_string()))
        } else {
            Err("The form must include a file, text or a prompt".to_string())
        }
    }

    /// Applies the form's settings on top of the defaults for `language`.
    pub fn configuration(&self, language: &str) -> Result<QuizConfiguration, String> {
        let mut resolver = ConfigResolver::new(language);

        match self.mode.as_deref().map(|m| m.trim().to_ascii_lowercase()) {
            None => {}
            Some(mode) if mode == "ai" || mode == "ai_determined" => {
                resolver.switch_to_ai();
            }
            Some(mode) if mode == "manual" => {
                resolver.switch_to_manual();
            }
            Some(other) => return Err(format!("unknown mode '{}'", other)),
        }

        if let Some(raw) = self.difficulty.as_deref() {
            let difficulty: Difficulty = raw.parse()?;
            resolver.set_difficulty(difficulty);
        }
        if let Some(raw) = self.num_questions.as_deref() {
            let count: u32 = raw
                .trim()
                .parse()
                .map_err(|_| format!("num_questions must be a number, got '{}'", raw))?;
            resolver.set_num_questions(count);
        }
        resolver.set_custom_prompt(self.custom_prompt.clone());

        Ok(resolver.configuration().clone())
    }
}

async fn read_text(field: Field<'_>) -> Result<String, ApiFailure> {
    field
        .text()
        .await
        .map_err(|e| failure(StatusCode::BAD_REQUEST, format!("Failed to read form field: {}", e)))
}

async fn read_form(mut multipart: Multipart) -> Result<QuizForm, ApiFailure> {
    let mut form = QuizForm::default();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        failure(
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" | "files" => {
                let file_name = field.file_name().unwrap_or("untitled").to_string();
                let mime_type = field.content_type().unwrap_or_default().to_string();
                let data: Bytes = field.bytes().await.map_err(|e| {
                    failure(
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read file bytes: {}", e),
                    )
                })?;
                form.files.push(InputFile::new(file_name, mime_type, data));
            }
            "text" => form.text = Some(read_text(field).await?),
            "prompt" => form.prompt = Some(read_text(field).await?),
            "mode" => form.mode = Some(read_text(field).await?),
            "difficulty" => form.difficulty = Some(read_text(field).await?),
            "num_questions" => form.num_questions = Some(read_text(field).await?),
            "custom_prompt" => form.custom_prompt = Some(read_text(field).await?),
            other => warn!("Ignoring unknown form field '{}'", other),
        }
    }

    Ok(form)
}

fn intake_status(error: &AggregateError) -> StatusCode {
    match error {
        AggregateError::UnsupportedFileKind(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        AggregateError::ExtractionFailure(_) | AggregateError::EmptyContent => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AggregateError::Superseded => StatusCode::CONFLICT,
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Generate a quiz from uploaded files, pasted text or a topic prompt.
///
/// Accepts a multipart/form-data request. Send one or more `file` parts, a `text`
/// part or a `prompt` part, plus optional `mode`, `difficulty`, `num_questions`
/// and `custom_prompt` parts.
#[utoipa::path(
    post,
    path = "/quizzes",
    request_body(content_type = "multipart/form-data", description = "The material and settings."),
    responses(
        (status = 200, description = "Quiz generated", body = GenerateQuizResponse),
        (status = 400, description = "Malformed form or settings", body = ErrorResponse),
        (status = 415, description = "A file kind is not supported", body = ErrorResponse),
        (status = 422, description = "A file could not be read or the material is empty", body = ErrorResponse),
        (status = 429, description = "Anonymous daily quota reached", body = ErrorResponse),
        (status = 502, description = "The quiz could not be generated", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "Authenticated user id; skips the anonymous quota."),
        ("x-client-id" = Option<String>, Header, description = "Stable anonymous client id.")
    )
)]
pub async fn generate_quiz_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Extension(locale): Extension<Locale>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiFailure> {
    let form = read_form(multipart).await?;
    let source = form
        .source()
        .map_err(|msg| failure(StatusCode::BAD_REQUEST, msg))?;
    let config = form
        .configuration(&locale.0)
        .map_err(|msg| failure(StatusCode::BAD_REQUEST, msg))?;

    // A REST request is never replaced by a newer one.
    let session = SessionToken::detached();

    let content = app_state
        .aggregator()
        .aggregate(&source, &session)
        .await
        .map_err(|e| {
            warn!("Intake rejected: {}", e);
            failure(intake_status(&e), e.to_string())
        })?;

    let outcome = app_state
        .orchestrator()
        .generate(&content, &config, &identity, &session, None)
        .await;

    match outcome {
        GenerationOutcome::Success { quiz, config } => {
            info!("Returning quiz '{}' with {} question(s)", quiz.title, quiz.questions.len());
            Ok((
                StatusCode::OK,
                Json(GenerateQuizResponse {
                    quiz: QuizDto::from(&quiz),
                    config: ConfigDto::from(&config),
                    title_suggestion: content.title_suggestion,
                    looks_preformatted: content.looks_preformatted,
                }),
            ))
        }
        GenerationOutcome::RateLimited { limit } => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                message: format!("Daily limit of {} quizzes reached. Sign in to continue.", limit),
                limit: Some(limit),
            }),
        )),
        GenerationOutcome::Failure { message } => {
            error!("Quiz generation failed: {}", message);
            Err(failure(StatusCode::BAD_GATEWAY, message))
        }
        GenerationOutcome::Superseded => Err(failure(
            StatusCode::CONFLICT,
            "The request was replaced by a newer one",
        )),
    }
}

/// Report how many quizzes the caller may still generate today.
#[utoipa::path(
    get,
    path = "/quota",
    responses(
        (status = 200, description = "Remaining quota", body = QuotaResponse)
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "Authenticated user id."),
        ("x-client-id" = Option<String>, Header, description = "Stable anonymous client id.")
    )
)]
pub async fn quota_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    let limit = app_state.config.anonymous_daily_limit;
    let remaining = app_state
        .rate_limiter()
        .remaining(&identity, limit, now_millis())
        .await;

    let authenticated = matches!(identity, Identity::Authenticated { .. });
    Json(QuotaResponse {
        authenticated,
        limit: (!authenticated).then_some(limit),
        remaining,
    })
}
