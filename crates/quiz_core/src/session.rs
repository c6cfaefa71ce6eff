//! crates/quiz_core/src/session.rs
//!
//! Tracks which intake is the active one so that results from superseded
//! requests can be dropped instead of overwriting newer state.

use crate::domain::SourceInput;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out monotonically increasing session tokens. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    current: Arc<AtomicU64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new session, invalidating every token issued before.
    pub fn begin(&self) -> SessionToken {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        SessionToken {
            id,
            current: self.current.clone(),
        }
    }
}

/// Identifies one intake/generation session.
#[derive(Debug, Clone)]
pub struct SessionToken {
    id: u64,
    current: Arc<AtomicU64>,
}

impl SessionToken {
    /// A token that no tracker will ever supersede.
    pub fn detached() -> Self {
        SessionTracker::new().begin()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.id
    }
}

/// The user's current source selection.
///
/// Selecting a new source replaces the previous one wholesale and starts a new
/// session, so at most one of files / pasted text / prompt is ever active.
#[derive(Debug, Default)]
pub struct IntakeSelection {
    tracker: SessionTracker,
    source: Option<SourceInput>,
}

impl IntakeSelection {
    pub fn new(tracker: SessionTracker) -> Self {
        Self {
            tracker,
            source: None,
        }
    }

    pub fn select(&mut self, source: SourceInput) -> SessionToken {
        self.source = Some(source);
        self.tracker.begin()
    }

    pub fn clear(&mut self) {
        self.source = None;
        self.tracker.begin();
    }

    pub fn source(&self) -> Option<&SourceInput> {
        self.source.as_ref()
    }
}
