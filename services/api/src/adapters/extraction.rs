//! services/api/src/adapters/extraction.rs
//!
//! This module contains the text-extraction adapter.
//! It implements the `TextExtractionService` port from the `core` crate.
//!
//! PDF and DOCX files are converted by the `pdftotext` and `pandoc` command-line
//! tools; images are read by an OpenAI-compatible vision model.

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
use quiz_core::ports::{PortError, PortResult, TextExtractionService};
use tokio::process::Command;
use tracing::debug;

const OCR_INSTRUCTIONS: &str = "You transcribe study material from images. Return ONLY the text visible in the image, preserving line breaks, headings, lists and formulas. Do not describe the image and do not add commentary. If there is no readable text, return an empty response.";

const UTF8_BOM: &str = "\u{feff}";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// Extracts text from uploads with local converters and a vision model for OCR.
#[derive(Clone)]
pub struct LocalTextExtractor {
    client: Client<OpenAIConfig>,
    ocr_model: String,
}

impl LocalTextExtractor {
    /// Creates a new `LocalTextExtractor`.
    pub fn new(client: Client<OpenAIConfig>, ocr_model: String) -> Self {
        Self { client, ocr_model }
    }

    /// Writes `bytes` to a temporary file and returns the converter's stdout.
    async fn convert_with(
        program: &str,
        args: &[&str],
        suffix: &str,
        bytes: &[u8],
    ) -> PortResult<String> {
        let file = tempfile::Builder::new()
            .prefix("quiz-upload-")
            .suffix(suffix)
            .tempfile()
            .map_err(|e| PortError::Extraction(format!("Failed to create temp file: {}", e)))?;
        tokio::fs::write(file.path(), bytes)
            .await
            .map_err(|e| PortError::Extraction(format!("Failed to stage upload: {}", e)))?;

        let output = Command::new(program)
            .args(args)
            .arg(file.path())
            .args(trailing_args(program))
            .output()
            .await
            .map_err(|e| PortError::Extraction(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(PortError::Extraction(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("{} produced {} bytes of text", program, output.stdout.len());
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// `pdftotext` writes to stdout only when told to with a trailing `-`.
fn trailing_args(program: &str) -> &'static [&'static str] {
    if program == "pdftotext" {
        &["-"]
    } else {
        &[]
    }
}

/// Strict UTF-8 decoding with the byte-order mark removed.
pub fn decode_plain_text(bytes: &[u8]) -> PortResult<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| PortError::Extraction(format!("File is not valid UTF-8 text: {}", e)))?;
    Ok(text.strip_prefix(UTF8_BOM).unwrap_or(text).to_string())
}

//=========================================================================================
// `TextExtractionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextExtractionService for LocalTextExtractor {
    async fn extract_pdf(&self, bytes: &[u8]) -> PortResult<String> {
        Self::convert_with("pdftotext", &["-layout", "-enc", "UTF-8"], ".pdf", bytes).await
    }

    async fn extract_docx(&self, bytes: &[u8]) -> PortResult<String> {
        Self::convert_with("pandoc", &["--from", "docx", "--to", "plain", "--wrap", "none"], ".docx", bytes)
            .await
    }

    async fn read_plain_text(&self, bytes: &[u8]) -> PortResult<String> {
        decode_plain_text(bytes)
    }

    /// Sends the image as a base64 data URL to the vision model.
    async fn ocr_image(&self, base64_data: &str, mime_type: &str) -> PortResult<String> {
        let image_part = ChatCompletionRequestUserMessageContentPart::ImageUrl(
            ChatCompletionRequestMessageContentPartImage {
                image_url: ImageUrl {
                    url: format!("data:{};base64,{}", mime_type, base64_data),
                    detail: Some(ImageDetail::High),
                },
            },
        );
        let text_part = ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText {
                text: "Transcribe the text in this image.".to_string(),
            },
        );

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(OCR_INSTRUCTIONS)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(vec![
                        text_part, image_part,
                    ]))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.ocr_model)
            .messages(messages)
            .temperature(0.0)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Extraction(e.to_string()))?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }
}
