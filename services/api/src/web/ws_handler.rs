//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It keeps the connection's configuration and delegates generation requests
//! to background tasks.

use crate::web::{
    generation_task::{generation_process, send_server_message, WsSender},
    middleware::Locale,
    protocol::{ClientMessage, FileMessage, ModeMessage, ServerMessage, SourceMessage},
    rest::ConfigDto,
    state::{AppState, ConnectionState},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::StreamExt;
use quiz_core::{Difficulty, Identity, InputFile, SourceInput};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Extension(locale): Extension<Locale>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, identity, locale))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, identity: Identity, locale: Locale) {
    info!("New WebSocket connection established for {:?}", identity);

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // --- 1. Initialization Phase ---
    let mut connection = ConnectionState::new(locale.0);
    let hello = ServerMessage::ConfigUpdated {
        config: ConfigDto::from(connection.resolver.configuration()),
    };
    if !send_server_message(&ws_sender, &hello).await {
        error!("Failed to send initial configuration.");
        return;
    }

    // --- 2. Main Message Loop ---
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_text_message(
                    text.as_str(),
                    &app_state,
                    &identity,
                    &mut connection,
                    &ws_sender,
                    &mut tasks,
                )
                .await;
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
        tasks.retain(|handle| !handle.is_finished());
    }

    // --- 3. Cleanup ---
    // Nobody is listening any more; a running request must not record usage.
    connection.selection.clear();
    for handle in tasks {
        handle.abort();
    }
    info!("WebSocket connection closed.");
}

fn decode_source(source: SourceMessage) -> Result<SourceInput, String> {
    match source {
        SourceMessage::Files { files } => files
            .into_iter()
            .map(decode_file)
            .collect::<Result<Vec<_>, _>>()
            .map(SourceInput::Files),
        SourceMessage::Text { text } => Ok(SourceInput::PastedText(text)),
        SourceMessage::Prompt { prompt } => Ok(SourceInput::Prompt(prompt)),
    }
}

fn decode_file(file: FileMessage) -> Result<InputFile, String> {
    let bytes = STANDARD
        .decode(file.data_base64.trim())
        .map_err(|e| format!("{}: invalid base64 data ({})", file.name, e))?;
    Ok(InputFile::new(file.name, file.mime_type, bytes))
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    identity: &Identity,
    connection: &mut ConnectionState,
    ws_sender: &WsSender,
    tasks: &mut Vec<JoinHandle<()>>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            send_server_message(
                ws_sender,
                &ServerMessage::Error {
                    message: format!("Invalid message: {}", e),
                },
            )
            .await;
            return;
        }
    };

    let resolver = &mut connection.resolver;
    let updated = match client_msg {
        ClientMessage::Generate { source } => {
            let source = match decode_source(source) {
                Ok(source) => source,
                Err(message) => {
                    send_server_message(ws_sender, &ServerMessage::Error { message }).await;
                    return;
                }
            };

            // Selecting a new source supersedes whatever is still running.
            let session = connection.selection.select(source.clone());
            info!("Generate message received. Starting session {}.", session.id());
            let task = {
                let app_state = app_state.clone();
                let ws_sender = ws_sender.clone();
                let config = resolver.configuration().clone();
                let identity = identity.clone();
                tokio::spawn(async move {
                    generation_process(app_state, ws_sender, source, config, identity, session).await;
                })
            };
            tasks.push(task);
            return;
        }
        ClientMessage::SetMode { mode } => match mode {
            ModeMessage::Ai => resolver.switch_to_ai(),
            ModeMessage::Manual => resolver.switch_to_manual(),
        },
        ClientMessage::SetDifficulty { difficulty } => match difficulty.parse::<Difficulty>() {
            Ok(difficulty) => resolver.set_difficulty(difficulty),
            Err(message) => {
                send_server_message(ws_sender, &ServerMessage::Error { message }).await;
                return;
            }
        },
        ClientMessage::SetNumQuestions { num_questions } => resolver.set_num_questions(num_questions),
        ClientMessage::SetLanguage { language } => resolver.set_language(language),
        ClientMessage::SetCustomPrompt { prompt } => resolver.set_custom_prompt(prompt),
    };

    let message = ServerMessage::ConfigUpdated {
        config: ConfigDto::from(updated),
    };
    send_server_message(ws_sender, &message).await;
}
