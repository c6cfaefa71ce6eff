//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for live quiz generation.

use crate::web::rest::{ConfigDto, QuizDto};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// A file uploaded over the socket, base64-encoded.
#[derive(Deserialize, Debug)]
pub struct FileMessage {
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    pub data_base64: String,
}

/// The source material for a generation request. Only one kind can be sent.
#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceMessage {
    Files { files: Vec<FileMessage> },
    Text { text: String },
    Prompt { prompt: String },
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModeMessage {
    Ai,
    Manual,
}

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts a new generation with the connection's current configuration.
    /// Any generation still running on this connection is superseded.
    Generate { source: SourceMessage },

    SetMode { mode: ModeMessage },

    SetDifficulty { difficulty: String },

    SetNumQuestions { num_questions: u32 },

    /// The client's active UI locale changed.
    SetLanguage { language: String },

    SetCustomPrompt { prompt: Option<String> },
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The connection's configuration after a settings change.
    ConfigUpdated { config: ConfigDto },

    /// The material was aggregated and generation is starting.
    IntakeReady {
        title_suggestion: String,
        looks_preformatted: bool,
    },

    StateChanged { state: String },

    Progress {
        attempt: u32,
        max_attempts: u32,
        percent: u8,
    },

    /// Human-readable retry notice, e.g. "Retrying attempt 2 of 3".
    Retrying {
        attempt: u32,
        max_attempts: u32,
        message: String,
    },

    QuizReady { quiz: QuizDto, config: ConfigDto },

    RateLimited { limit: u32 },

    /// A newer request on this connection replaced the one that was running.
    Superseded,

    /// Reports an error to the client, which should display the message.
    Error { message: String },
}
