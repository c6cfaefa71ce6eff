//! services/api/src/web/generation_task.rs
//!
//! This module contains the asynchronous "worker" function responsible for
//! one generation request on a WebSocket connection.

use crate::web::{
    protocol::ServerMessage,
    rest::{ConfigDto, QuizDto},
    state::AppState,
};
use axum::extract::ws::{Message, WebSocket};
use futures::{stream::SplitSink, SinkExt};
use quiz_core::{
    GenerationEvent, GenerationOutcome, GenerationState, Identity, QuizConfiguration,
    SessionToken, SourceInput,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

pub type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// Serializes and sends one message. Returns `false` if the socket is gone.
pub async fn send_server_message(ws_sender: &WsSender, message: &ServerMessage) -> bool {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return false;
        }
    };
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await
        .is_ok()
}

pub fn state_name(state: &GenerationState) -> &'static str {
    match state {
        GenerationState::Idle => "idle",
        GenerationState::Checking => "checking",
        GenerationState::Attempting { .. } => "attempting",
        GenerationState::RetryWaiting { .. } => "retry_waiting",
        GenerationState::Succeeded => "succeeded",
        GenerationState::Failed => "failed",
    }
}

fn event_to_message(event: GenerationEvent) -> ServerMessage {
    match event.clone() {
        GenerationEvent::StateChanged(state) => ServerMessage::StateChanged {
            state: state_name(&state).to_string(),
        },
        GenerationEvent::Progress(attempt) => ServerMessage::Progress {
            attempt: attempt.attempt_number + 1,
            max_attempts: attempt.max_attempts,
            percent: attempt.progress_percent,
        },
        GenerationEvent::Retrying {
            attempt,
            max_attempts,
        } => ServerMessage::Retrying {
            attempt,
            max_attempts,
            message: event.to_string(),
        },
    }
}

/// Aggregates `source`, then generates a quiz while streaming progress to the client.
///
/// Every message is dropped once `session` is no longer the connection's current one.
pub async fn generation_process(
    app_state: Arc<AppState>,
    ws_sender: WsSender,
    source: SourceInput,
    config: QuizConfiguration,
    identity: Identity,
    session: SessionToken,
) {
    let start_time = Instant::now();
    info!("Generation process {} started.", session.id());

    let content = match app_state.aggregator().aggregate(&source, &session).await {
        Ok(content) => content,
        Err(e) => {
            if session.is_current() {
                send_server_message(&ws_sender, &ServerMessage::Error { message: e.to_string() }).await;
            }
            info!("Generation process {} ended during intake: {}", session.id(), e);
            return;
        }
    };

    if !send_server_message(
        &ws_sender,
        &ServerMessage::IntakeReady {
            title_suggestion: content.title_suggestion.clone(),
            looks_preformatted: content.looks_preformatted,
        },
    )
    .await
    {
        error!("Client went away before generation started.");
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<GenerationEvent>();
    let forward_sender = ws_sender.clone();
    let forward_session = session.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !forward_session.is_current() {
                continue;
            }
            if !send_server_message(&forward_sender, &event_to_message(event)).await {
                break;
            }
        }
    });

    let outcome = app_state
        .orchestrator()
        .generate(&content, &config, &identity, &session, Some(tx))
        .await;

    // The orchestrator has dropped its sender; wait for the queued events to flush.
    if let Err(e) = forwarder.await {
        error!("Event forwarder crashed: {}", e);
    }

    let final_message = match outcome {
        GenerationOutcome::Success { quiz, config } => ServerMessage::QuizReady {
            quiz: QuizDto::from(&quiz),
            config: ConfigDto::from(&config),
        },
        GenerationOutcome::RateLimited { limit } => ServerMessage::RateLimited { limit },
        GenerationOutcome::Failure { message } => ServerMessage::Error { message },
        GenerationOutcome::Superseded => ServerMessage::Superseded,
    };

    if matches!(final_message, ServerMessage::Superseded) || session.is_current() {
        send_server_message(&ws_sender, &final_message).await;
    }
    info!(
        "⏱️ Generation process {} finished in {:?}",
        session.id(),
        start_time.elapsed()
    );
}
