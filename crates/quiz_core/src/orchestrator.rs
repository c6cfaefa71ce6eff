//! crates/quiz_core/src/orchestrator.rs
//!
//! Drives one generation request: quota check, bounded retries with linear
//! backoff, cosmetic progress reporting and usage recording on success.
//!
//! ```text
//! Idle -> Checking -> Attempting -> Succeeded
//!                        |   ^
//!                        v   |
//!                  RetryWaiting        (any other error) -> Failed
//! ```
//!
//! A superseded request also ends in `Failed`.

use crate::domain::{AggregatedContent, GenerationAttempt, GenerationOutcome, Identity, QuizConfiguration};
use crate::ports::{GenerationRequest, QuizGenerationService};
use crate::rate_limiter::{now_millis, RateLimiter};
use crate::session::SessionToken;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{error, info, warn};

//=========================================================================================
// Policy, States and Events
//=========================================================================================

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
    pub tick_interval: Duration,
    pub progress_step: u8,
    pub initial_progress: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1500),
            tick_interval: Duration::from_millis(500),
            progress_step: 5,
            initial_progress: 10,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, retry_number: u32) -> Duration {
        self.base_delay * retry_number
    }

    /// The cosmetic progress bar never passes this while an attempt is pending.
    pub fn progress_ceiling(&self, retry_number: u32) -> u8 {
        85u32.saturating_sub(5 * retry_number).min(100) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Checking,
    Attempting { attempt_number: u32 },
    RetryWaiting { attempt_number: u32, delay: Duration },
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationEvent {
    StateChanged(GenerationState),
    Progress(GenerationAttempt),
    /// `attempt` is 1-based and counts the upcoming try.
    Retrying { attempt: u32, max_attempts: u32 },
}

impl fmt::Display for GenerationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationEvent::StateChanged(state) => write!(f, "state: {:?}", state),
            GenerationEvent::Progress(p) => write!(f, "progress: {}%", p.progress_percent),
            GenerationEvent::Retrying {
                attempt,
                max_attempts,
            } => write!(f, "Retrying attempt {} of {}", attempt, max_attempts),
        }
    }
}

pub type EventSender = UnboundedSender<GenerationEvent>;

fn emit(events: Option<&EventSender>, event: GenerationEvent) {
    if let Some(tx) = events {
        // A closed receiver only means nobody is watching any more.
        let _ = tx.send(event);
    }
}

//=========================================================================================
// Progress Ticker
//=========================================================================================

/// Periodic task that nudges the progress bar while an attempt is pending.
///
/// Dropping the ticker cancels the task too, so an aborted request never
/// leaves it running.
struct ProgressTicker {
    cancel: CancellationToken,
    _guard: DropGuard,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    fn start(policy: RetryPolicy, attempt: GenerationAttempt, events: Option<EventSender>) -> Self {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let guard = cancel.clone().drop_guard();
        let ceiling = policy.progress_ceiling(attempt.attempt_number);

        let handle = tokio::spawn(async move {
            let mut progress = attempt.progress_percent.min(ceiling);
            let mut interval = tokio::time::interval(policy.tick_interval);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = interval.tick() => {
                        if progress >= ceiling {
                            continue;
                        }
                        progress = progress.saturating_add(policy.progress_step).min(ceiling);
                        emit(
                            events.as_ref(),
                            GenerationEvent::Progress(GenerationAttempt {
                                progress_percent: progress,
                                ..attempt
                            }),
                        );
                    }
                }
            }
        });

        Self {
            cancel,
            _guard: guard,
            handle,
        }
    }

    /// Cancels the ticker and waits until it has fully exited.
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("Progress ticker ended abnormally: {}", e);
        }
    }
}

//=========================================================================================
// Orchestrator
//=========================================================================================

pub struct GenerationOrchestrator {
    generator: Arc<dyn QuizGenerationService>,
    limiter: RateLimiter,
    limit: u32,
    policy: RetryPolicy,
}

impl GenerationOrchestrator {
    pub fn new(generator: Arc<dyn QuizGenerationService>, limiter: RateLimiter, limit: u32) -> Self {
        Self {
            generator,
            limiter,
            limit,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one generation request to a terminal outcome.
    ///
    /// Quota is only recorded on `Success`. When `session` stops being current
    /// the request ends as `Superseded` at the next resumption point.
    pub async fn generate(
        &self,
        content: &AggregatedContent,
        config: &QuizConfiguration,
        identity: &Identity,
        session: &SessionToken,
        events: Option<EventSender>,
    ) -> GenerationOutcome {
        let events = events.as_ref();
        emit(events, GenerationEvent::StateChanged(GenerationState::Idle));
        emit(events, GenerationEvent::StateChanged(GenerationState::Checking));

        if !self
            .limiter
            .check_and_consume(identity, self.limit, now_millis())
            .await
        {
            info!("Generation refused: anonymous quota of {} reached", self.limit);
            emit(events, GenerationEvent::StateChanged(GenerationState::Failed));
            return GenerationOutcome::RateLimited { limit: self.limit };
        }

        let max_attempts = self.policy.max_retries + 1;
        let mut retry_number = 0u32;

        loop {
            if !session.is_current() {
                emit(events, GenerationEvent::StateChanged(GenerationState::Failed));
                return GenerationOutcome::Superseded;
            }

            emit(
                events,
                GenerationEvent::StateChanged(GenerationState::Attempting {
                    attempt_number: retry_number,
                }),
            );
            let attempt = GenerationAttempt {
                attempt_number: retry_number,
                max_attempts,
                progress_percent: self.policy.initial_progress,
            };
            emit(events, GenerationEvent::Progress(attempt));

            let request = GenerationRequest {
                content: &content.payload,
                config,
                title_hint: &content.title_suggestion,
                preformatted: content.looks_preformatted,
            };

            let ticker = ProgressTicker::start(self.policy, attempt, events.cloned());
            let result = self.generator.generate(request).await;
            ticker.stop().await;

            if !session.is_current() {
                info!("Discarding generation result for superseded session {}", session.id());
                emit(events, GenerationEvent::StateChanged(GenerationState::Failed));
                return GenerationOutcome::Superseded;
            }

            match result {
                Ok(quiz) => {
                    info!(
                        "Quiz generated on attempt {}/{} with {} question(s)",
                        retry_number + 1,
                        max_attempts,
                        quiz.questions.len()
                    );
                    emit(
                        events,
                        GenerationEvent::Progress(GenerationAttempt {
                            progress_percent: 100,
                            ..attempt
                        }),
                    );
                    self.limiter.record_usage(identity, now_millis()).await;
                    emit(events, GenerationEvent::StateChanged(GenerationState::Succeeded));
                    return GenerationOutcome::Success {
                        quiz,
                        config: config.clone(),
                    };
                }
                Err(e) if e.is_transient() && retry_number < self.policy.max_retries => {
                    retry_number += 1;
                    let delay = self.policy.backoff(retry_number);
                    warn!(
                        "Transient generation failure ({}), retrying attempt {} of {} in {:?}",
                        e.message,
                        retry_number + 1,
                        max_attempts,
                        delay
                    );
                    emit(
                        events,
                        GenerationEvent::StateChanged(GenerationState::RetryWaiting {
                            attempt_number: retry_number,
                            delay,
                        }),
                    );
                    emit(
                        events,
                        GenerationEvent::Retrying {
                            attempt: retry_number + 1,
                            max_attempts,
                        },
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        "Generation failed after {} attempt(s): {}",
                        retry_number + 1,
                        e.message
                    );
                    emit(events, GenerationEvent::StateChanged(GenerationState::Failed));
                    return GenerationOutcome::Failure { message: e.message };
                }
            }
        }
    }
}
