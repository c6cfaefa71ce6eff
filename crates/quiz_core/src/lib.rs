pub mod aggregator;
pub mod config_resolver;
pub mod domain;
pub mod orchestrator;
pub mod ports;
pub mod rate_limiter;
pub mod session;
pub mod store;

pub use aggregator::{AggregateError, ContentAggregator, FileKind, FALLBACK_TITLE};
pub use config_resolver::{resolve, ConfigMode, ConfigResolver, ManualSettings, Resolution};
pub use domain::{
    AggregatedContent, ContentPayload, Difficulty, ExtractedUnit, GenerationAttempt,
    GenerationOutcome, Identity, ImagePayload, InputFile, Question, Quiz, QuizConfiguration,
    SourceInput,
};
pub use orchestrator::{
    EventSender, GenerationEvent, GenerationOrchestrator, GenerationState, RetryPolicy,
};
pub use ports::{
    ErrorKind, FormatDetectionService, GenerationError, GenerationRequest, KeyValueStore,
    PortError, PortResult, QuizGenerationService, TextExtractionService,
    TRANSIENT_FAILURE_MARKER,
};
pub use rate_limiter::{RateLimiter, ANONYMOUS_DAILY_LIMIT};
pub use session::{IntakeSelection, SessionToken, SessionTracker};
pub use store::InMemoryStore;
