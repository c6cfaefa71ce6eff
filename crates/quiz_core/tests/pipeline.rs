//! End-to-end checks of intake aggregation and generation orchestration
//! against in-memory fakes of every collaborator.

use async_trait::async_trait;
use quiz_core::{
    AggregateError, ContentAggregator, ContentPayload, FormatDetectionService, GenerationError,
    GenerationEvent, GenerationOrchestrator, GenerationOutcome, GenerationRequest,
    GenerationState, Identity, InMemoryStore, InputFile, KeyValueStore, PortError, PortResult,
    Question, Quiz, QuizConfiguration, QuizGenerationService, RateLimiter, SessionToken,
    SessionTracker, SourceInput, TextExtractionService, ANONYMOUS_DAILY_LIMIT,
    TRANSIENT_FAILURE_MARKER,
};
use quiz_core::{AggregatedContent, Difficulty};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

//=========================================================================================
// Fakes
//=========================================================================================

/// Plain text files are "extracted" as their UTF-8 content, after a delay
/// derived from the first byte so each file takes a different time.
#[derive(Default)]
struct FakeExtractor {
    ocr_text: Option<String>,
    fail_pdf: bool,
    supersede_with: Option<SessionTracker>,
}

impl FakeExtractor {
    fn text_of(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).to_string()
    }
}

#[async_trait]
impl TextExtractionService for FakeExtractor {
    async fn extract_pdf(&self, bytes: &[u8]) -> PortResult<String> {
        if self.fail_pdf {
            return Err(PortError::Extraction("corrupt xref table".into()));
        }
        Ok(format!("pdf:{}", Self::text_of(bytes)))
    }

    async fn extract_docx(&self, bytes: &[u8]) -> PortResult<String> {
        Ok(format!("docx:{}", Self::text_of(bytes)))
    }

    async fn read_plain_text(&self, bytes: &[u8]) -> PortResult<String> {
        if let Some(tracker) = &self.supersede_with {
            tracker.begin();
        }
        let delay_ms = bytes.first().map(|b| (*b as u64 % 10) * 100).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        Ok(Self::text_of(bytes))
    }

    async fn ocr_image(&self, _base64_data: &str, _mime_type: &str) -> PortResult<String> {
        self.ocr_text
            .clone()
            .ok_or_else(|| PortError::Extraction("vision model unavailable".into()))
    }
}

struct KeywordDetector {
    calls: AtomicUsize,
}

#[async_trait]
impl FormatDetectionService for KeywordDetector {
    async fn looks_like_formatted_quiz(&self, text: &str) -> PortResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.contains("A)") && text.contains("B)"))
    }
}

struct FailingDetector;

#[async_trait]
impl FormatDetectionService for FailingDetector {
    async fn looks_like_formatted_quiz(&self, _text: &str) -> PortResult<bool> {
        Err(PortError::Unexpected("detector crashed".into()))
    }
}

fn detector() -> Arc<KeywordDetector> {
    Arc::new(KeywordDetector {
        calls: AtomicUsize::new(0),
    })
}

struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<Quiz, GenerationError>>>,
    calls: Mutex<Vec<Instant>>,
    latency: Duration,
    supersede_with: Option<SessionTracker>,
}

impl ScriptedGenerator {
    fn new(script: Vec<Result<Quiz, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            supersede_with: None,
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuizGenerationService for ScriptedGenerator {
    async fn generate(&self, _request: GenerationRequest<'_>) -> Result<Quiz, GenerationError> {
        self.calls.lock().unwrap().push(Instant::now());
        if let Some(tracker) = &self.supersede_with {
            tracker.begin();
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::fatal("script exhausted")))
    }
}

fn sample_quiz() -> Quiz {
    Quiz {
        title: "Physics".into(),
        questions: vec![Question {
            prompt: "What is the unit of force?".into(),
            options: vec!["Newton".into(), "Joule".into()],
            correct_index: 0,
            explanation: None,
        }],
    }
}

fn transient() -> Result<Quiz, GenerationError> {
    Err(GenerationError::from_message(format!(
        "{}: model returned malformed JSON",
        TRANSIENT_FAILURE_MARKER
    )))
}

fn text_content() -> AggregatedContent {
    AggregatedContent {
        payload: ContentPayload::Text("Forces and motion".into()),
        looks_preformatted: false,
        title_suggestion: "physics_ch".into(),
    }
}

fn config() -> QuizConfiguration {
    QuizConfiguration {
        num_questions: 5,
        difficulty: Difficulty::Medium,
        language: "en".into(),
        custom_prompt: None,
    }
}

fn anon() -> Identity {
    Identity::Anonymous {
        client_id: "browser".into(),
    }
}

async fn used_quota(limiter: &RateLimiter) -> u32 {
    ANONYMOUS_DAILY_LIMIT
        - limiter
            .remaining(&anon(), ANONYMOUS_DAILY_LIMIT, quiz_core::rate_limiter::now_millis())
            .await
            .unwrap()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) -> Vec<GenerationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Once the request has settled no progress may follow and every sender is gone.
async fn assert_ticker_joined(rx: &mut mpsc::UnboundedReceiver<GenerationEvent>) {
    drain(rx);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
        rx.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
}

//=========================================================================================
// Aggregation
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn sections_follow_input_order_regardless_of_latency() {
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector());
    // Extraction delays are 700ms, 900ms and 300ms respectively.
    let input = SourceInput::Files(vec![
        InputFile::new("chapter_a.txt", "text/plain", b"9 alpha".to_vec()),
        InputFile::new("chapter_b.txt", "text/plain", b"1 beta".to_vec()),
        InputFile::new("chapter_c.txt", "text/plain", b"5 gamma".to_vec()),
    ]);

    let content = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();

    assert_eq!(
        content.payload,
        ContentPayload::Text(
            "=== chapter_a.txt ===\n\n9 alpha\n\n=== chapter_b.txt ===\n\n1 beta\n\n=== chapter_c.txt ===\n\n5 gamma"
                .into()
        )
    );
}

#[tokio::test]
async fn chapter_files_suggest_common_prefix_title() {
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector());
    let input = SourceInput::Files(vec![
        InputFile::new("physics_ch1.pdf", "application/pdf", b"one".to_vec()),
        InputFile::new("physics_ch2.pdf", "application/pdf", b"two".to_vec()),
        InputFile::new("physics_ch3.pdf", "application/pdf", b"three".to_vec()),
    ]);

    let content = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();

    assert_eq!(content.title_suggestion, "physics_ch");
}

#[tokio::test]
async fn pasted_text_uses_fallback_title_and_detector_flag() {
    let detector = detector();
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector.clone());
    let input = SourceInput::PastedText("  1. Pick one\nA) yes\nB) no  ".into());

    let first = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();
    let second = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();

    assert_eq!(first.title_suggestion, quiz_core::FALLBACK_TITLE);
    assert!(first.looks_preformatted);
    assert_eq!(first.looks_preformatted, second.looks_preformatted);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        first.payload,
        ContentPayload::Text("1. Pick one\nA) yes\nB) no".into())
    );
}

#[tokio::test]
async fn detector_errors_are_swallowed() {
    let aggregator =
        ContentAggregator::new(Arc::new(FakeExtractor::default()), Arc::new(FailingDetector));
    let content = aggregator
        .aggregate(
            &SourceInput::Prompt("The French revolution".into()),
            &SessionToken::detached(),
        )
        .await
        .unwrap();
    assert!(!content.looks_preformatted);
}

#[tokio::test(start_paused = true)]
async fn blank_inputs_are_rejected() {
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector());
    let token = SessionToken::detached();

    assert_eq!(
        aggregator
            .aggregate(&SourceInput::PastedText("   ".into()), &token)
            .await,
        Err(AggregateError::EmptyContent)
    );
    assert_eq!(
        aggregator.aggregate(&SourceInput::Files(vec![]), &token).await,
        Err(AggregateError::EmptyContent)
    );
    let blank_file = SourceInput::Files(vec![InputFile::new("empty.txt", "text/plain", Vec::new())]);
    assert_eq!(
        aggregator.aggregate(&blank_file, &token).await,
        Err(AggregateError::EmptyContent)
    );
}

#[tokio::test(start_paused = true)]
async fn unsupported_and_failed_files_are_named() {
    let aggregator = ContentAggregator::new(
        Arc::new(FakeExtractor {
            fail_pdf: true,
            ..Default::default()
        }),
        detector(),
    );
    let token = SessionToken::detached();

    let unsupported = SourceInput::Files(vec![
        InputFile::new("notes.txt", "text/plain", b"ok".to_vec()),
        InputFile::new("archive.zip", "application/zip", Vec::new()),
    ]);
    assert_eq!(
        aggregator.aggregate(&unsupported, &token).await,
        Err(AggregateError::UnsupportedFileKind("archive.zip".into()))
    );

    let broken = SourceInput::Files(vec![InputFile::new(
        "scan.pdf",
        "application/pdf",
        b"%PDF".to_vec(),
    )]);
    assert_eq!(
        aggregator.aggregate(&broken, &token).await,
        Err(AggregateError::ExtractionFailure("scan.pdf".into()))
    );
}

#[tokio::test]
async fn single_image_without_text_is_sent_as_image() {
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector());
    let input = SourceInput::Files(vec![InputFile::new(
        "diagram.png",
        "image/png",
        vec![0x89, 0x50, 0x4e, 0x47],
    )]);

    let content = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();

    match content.payload {
        ContentPayload::Image(image) => {
            assert_eq!(image.mime_type, "image/png");
            assert_eq!(image.base64_data, "iVBORw==");
        }
        other => panic!("expected image payload, got {:?}", other),
    }
    assert!(!content.looks_preformatted);
}

#[tokio::test]
async fn single_image_with_ocr_text_becomes_text() {
    let aggregator = ContentAggregator::new(
        Arc::new(FakeExtractor {
            ocr_text: Some("Photosynthesis converts light".into()),
            ..Default::default()
        }),
        detector(),
    );
    let input = SourceInput::Files(vec![InputFile::new("board.jpg", "image/jpeg", vec![1, 2, 3])]);

    let content = aggregator
        .aggregate(&input, &SessionToken::detached())
        .await
        .unwrap();

    assert_eq!(
        content.payload,
        ContentPayload::Text("=== board.jpg ===\n\nPhotosynthesis converts light".into())
    );
}

#[tokio::test(start_paused = true)]
async fn ocr_failure_among_several_files_is_an_extraction_failure() {
    let aggregator = ContentAggregator::new(Arc::new(FakeExtractor::default()), detector());
    let input = SourceInput::Files(vec![
        InputFile::new("notes.txt", "text/plain", b"0 text".to_vec()),
        InputFile::new("photo.png", "image/png", vec![1]),
    ]);

    assert_eq!(
        aggregator
            .aggregate(&input, &SessionToken::detached())
            .await,
        Err(AggregateError::ExtractionFailure("photo.png".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn superseded_intake_discards_partial_result() {
    let tracker = SessionTracker::new();
    let token = tracker.begin();
    let aggregator = ContentAggregator::new(
        Arc::new(FakeExtractor {
            supersede_with: Some(tracker.clone()),
            ..Default::default()
        }),
        detector(),
    );
    let input = SourceInput::Files(vec![InputFile::new("a.txt", "text/plain", b"0 a".to_vec())]);

    assert_eq!(
        aggregator.aggregate(&input, &token).await,
        Err(AggregateError::Superseded)
    );
}

//=========================================================================================
// Orchestration
//=========================================================================================

#[tokio::test(start_paused = true)]
async fn two_transient_failures_then_success() {
    let store = Arc::new(InMemoryStore::new());
    let limiter = RateLimiter::new(store.clone());
    let generator = Arc::new(ScriptedGenerator::new(vec![
        transient(),
        transient(),
        Ok(sample_quiz()),
    ]));
    let orchestrator =
        GenerationOrchestrator::new(generator.clone(), limiter.clone(), ANONYMOUS_DAILY_LIMIT);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(
            &text_content(),
            &config(),
            &anon(),
            &SessionToken::detached(),
            Some(tx),
        )
        .await;

    assert_eq!(
        outcome,
        GenerationOutcome::Success {
            quiz: sample_quiz(),
            config: config()
        }
    );

    let calls = generator.call_times();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1] - calls[0], Duration::from_millis(1500));
    assert_eq!(calls[2] - calls[1], Duration::from_millis(3000));
    assert_eq!(used_quota(&limiter).await, 1);

    let retries: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, GenerationEvent::Retrying { .. }))
        .map(|e| e.to_string())
        .collect();
    assert_eq!(
        retries,
        vec!["Retrying attempt 2 of 3", "Retrying attempt 3 of 3"]
    );
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_stops_immediately_without_quota() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let latency = Duration::from_secs(2);
    let generator = Arc::new(
        ScriptedGenerator::new(vec![
            Err(GenerationError::from_message("Invalid API key")),
            Ok(sample_quiz()),
        ])
        .with_latency(latency),
    );
    let orchestrator =
        GenerationOrchestrator::new(generator.clone(), limiter.clone(), ANONYMOUS_DAILY_LIMIT);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let started = Instant::now();

    let outcome = orchestrator
        .generate(&text_content(), &config(), &anon(), &SessionToken::detached(), Some(tx))
        .await;

    assert_eq!(
        outcome,
        GenerationOutcome::Failure {
            message: "Invalid API key".into()
        }
    );
    assert_eq!(generator.call_times().len(), 1);
    // Only the attempt itself took time; no backoff followed it.
    assert_eq!(started.elapsed(), latency);
    assert_eq!(used_quota(&limiter).await, 0);
    assert_ticker_joined(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let generator = Arc::new(
        ScriptedGenerator::new(vec![
            transient(),
            transient(),
            transient(),
            Ok(sample_quiz()),
        ])
        .with_latency(Duration::from_secs(2)),
    );
    let orchestrator =
        GenerationOrchestrator::new(generator.clone(), limiter.clone(), ANONYMOUS_DAILY_LIMIT);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(&text_content(), &config(), &anon(), &SessionToken::detached(), Some(tx))
        .await;

    assert!(matches!(outcome, GenerationOutcome::Failure { ref message } if message.contains(TRANSIENT_FAILURE_MARKER)));
    assert_eq!(
        generator.call_times().len() as u32,
        orchestrator.policy().max_retries + 1
    );
    assert_eq!(used_quota(&limiter).await, 0);
    assert_eq!(
        drain(&mut rx).last(),
        Some(&GenerationEvent::StateChanged(GenerationState::Failed))
    );
    assert_ticker_joined(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_quota_makes_no_attempts() {
    let store = Arc::new(InMemoryStore::new());
    let now = quiz_core::rate_limiter::now_millis();
    let ledger: Vec<i64> = (1..=5).map(|h| now - h * 60 * 60 * 1000).collect();
    store
        .write(
            "quiz_generation_usage:browser",
            &serde_json::to_string(&ledger).unwrap(),
        )
        .await
        .unwrap();
    let limiter = RateLimiter::new(store);
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(sample_quiz())]));
    let orchestrator =
        GenerationOrchestrator::new(generator.clone(), limiter.clone(), ANONYMOUS_DAILY_LIMIT);

    let outcome = orchestrator
        .generate(&text_content(), &config(), &anon(), &SessionToken::detached(), None)
        .await;

    assert_eq!(outcome, GenerationOutcome::RateLimited { limit: 5 });
    assert!(generator.call_times().is_empty());
    assert_eq!(used_quota(&limiter).await, 5);
}

#[tokio::test(start_paused = true)]
async fn authenticated_users_skip_the_ledger() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(sample_quiz())]));
    let orchestrator = GenerationOrchestrator::new(generator, limiter.clone(), 0);
    let user = Identity::Authenticated {
        user_id: uuid::Uuid::nil(),
    };

    let outcome = orchestrator
        .generate(&text_content(), &config(), &user, &SessionToken::detached(), None)
        .await;

    assert!(matches!(outcome, GenerationOutcome::Success { .. }));
    assert_eq!(used_quota(&limiter).await, 0);
}

#[tokio::test(start_paused = true)]
async fn progress_stays_under_ceiling_and_stops_when_attempt_settles() {
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let generator = Arc::new(
        ScriptedGenerator::new(vec![Ok(sample_quiz())]).with_latency(Duration::from_secs(60)),
    );
    let orchestrator = GenerationOrchestrator::new(generator, limiter, ANONYMOUS_DAILY_LIMIT);
    let (tx, mut rx) = mpsc::unbounded_channel();

    orchestrator
        .generate(&text_content(), &config(), &anon(), &SessionToken::detached(), Some(tx))
        .await;

    let events = drain(&mut rx);
    let pending: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            GenerationEvent::Progress(p) if p.progress_percent < 100 => Some(p.progress_percent),
            _ => None,
        })
        .collect();
    assert_eq!(pending.first(), Some(&10));
    assert_eq!(pending.iter().max(), Some(&85));
    assert!(pending.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        events.last(),
        Some(&GenerationEvent::StateChanged(GenerationState::Succeeded))
    );

    assert_ticker_joined(&mut rx).await;
}

#[tokio::test(start_paused = true)]
async fn superseded_request_does_not_record_usage() {
    let tracker = SessionTracker::new();
    let token = tracker.begin();
    let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()));
    let mut generator = ScriptedGenerator::new(vec![Ok(sample_quiz())]);
    generator.supersede_with = Some(tracker.clone());
    let orchestrator =
        GenerationOrchestrator::new(Arc::new(generator), limiter.clone(), ANONYMOUS_DAILY_LIMIT);

    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(&text_content(), &config(), &anon(), &token, Some(tx))
        .await;

    assert_eq!(outcome, GenerationOutcome::Superseded);
    assert_eq!(used_quota(&limiter).await, 0);
    assert_eq!(
        drain(&mut rx).last(),
        Some(&GenerationEvent::StateChanged(GenerationState::Failed))
    );
}

#[tokio::test(start_paused = true)]
async fn superseded_before_first_attempt_still_reaches_a_terminal_state() {
    let tracker = SessionTracker::new();
    let token = tracker.begin();
    tracker.begin();
    let generator = Arc::new(ScriptedGenerator::new(vec![Ok(sample_quiz())]));
    let orchestrator = GenerationOrchestrator::new(
        generator.clone(),
        RateLimiter::new(Arc::new(InMemoryStore::new())),
        ANONYMOUS_DAILY_LIMIT,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = orchestrator
        .generate(&text_content(), &config(), &anon(), &token, Some(tx))
        .await;

    assert_eq!(outcome, GenerationOutcome::Superseded);
    assert!(generator.call_times().is_empty());
    assert_eq!(
        drain(&mut rx).last(),
        Some(&GenerationEvent::StateChanged(GenerationState::Failed))
    );
}

/// A generator whose call never completes.
struct StalledGenerator;

#[async_trait]
impl QuizGenerationService for StalledGenerator {
    async fn generate(&self, _request: GenerationRequest<'_>) -> Result<Quiz, GenerationError> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn aborting_a_pending_request_stops_its_progress_ticker() {
    let orchestrator = Arc::new(GenerationOrchestrator::new(
        Arc::new(StalledGenerator),
        RateLimiter::new(Arc::new(InMemoryStore::new())),
        ANONYMOUS_DAILY_LIMIT,
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let request = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .generate(&text_content(), &config(), &anon(), &SessionToken::detached(), Some(tx))
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, GenerationEvent::Progress(p) if p.progress_percent > 10)));

    request.abort();
    assert!(request.await.unwrap_err().is_cancelled());

    let closed = tokio::time::timeout(Duration::from_secs(60 * 60), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "event channel stayed open after the request was aborted");
}
