//! services/api/src/web/state.rs
//!
//! Defines the application's shared and connection-specific states.

use crate::config::Config;
use quiz_core::{
    ports::{FormatDetectionService, KeyValueStore, QuizGenerationService, TextExtractionService},
    ConfigResolver, ContentAggregator, GenerationOrchestrator, IntakeSelection, RateLimiter,
    SessionTracker,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub extractor: Arc<dyn TextExtractionService>,
    pub detector: Arc<dyn FormatDetectionService>,
    pub generator: Arc<dyn QuizGenerationService>,
    pub store: Arc<dyn KeyValueStore>,
}

impl AppState {
    pub fn aggregator(&self) -> ContentAggregator {
        ContentAggregator::new(self.extractor.clone(), self.detector.clone())
    }

    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::new(self.store.clone())
    }

    pub fn orchestrator(&self) -> GenerationOrchestrator {
        GenerationOrchestrator::new(
            self.generator.clone(),
            self.rate_limiter(),
            self.config.anonymous_daily_limit,
        )
    }
}

//=========================================================================================
// ConnectionState (Specific to One WebSocket Connection)
//=========================================================================================

/// The state for a single, active WebSocket connection.
pub struct ConnectionState {
    pub resolver: ConfigResolver,
    pub selection: IntakeSelection,
}

impl ConnectionState {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            resolver: ConfigResolver::new(language),
            selection: IntakeSelection::new(SessionTracker::new()),
        }
    }
}
