use crate::engine::Recognizer;
use crate::error::RecognitionError;
use crate::ink::Ink;
use crate::messages::TaskId;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Ink together with the text it was recognized as
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedContent {
    pub ink: Ink,
    pub text: String,
}

/// One outstanding call to a recognizer
///
/// The task:
/// - Owns an immutable ink snapshot, never the live buffer
/// - Calls the recognizer exactly once
/// - Never yields a result after `cancel()`, even if the call succeeded
///
/// Cancellation is cooperative: the flag is checked when the call returns
/// and again whenever the result is read.
pub struct RecognitionTask {
    id: TaskId,
    recognizer: Arc<dyn Recognizer>,
    ink: Ink,
    started: AtomicBool,
    cancelled: AtomicBool,
    done: AtomicBool,
    result: OnceLock<RecognizedContent>,
}

impl RecognitionTask {
    pub fn new(
        id: TaskId,
        recognizer: Arc<dyn Recognizer>,
        ink: Ink,
    ) -> Result<Self, RecognitionError> {
        if ink.is_empty() {
            return Err(RecognitionError::EmptyInk);
        }

        Ok(Self {
            id,
            recognizer,
            ink,
            started: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            result: OnceLock::new(),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn ink(&self) -> &Ink {
        &self.ink
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Committable result, `None` until done and forever after cancellation.
    pub fn result(&self) -> Option<&RecognizedContent> {
        if self.is_cancelled() {
            return None;
        }
        self.result.get()
    }

    /// Submit the ink to the recognizer.
    ///
    /// Resolves with `Ok(None)` when the task was cancelled or the recognizer
    /// produced no candidates, and with the top candidate's text otherwise.
    pub async fn run(&self) -> Result<Option<String>, RecognitionError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RecognitionError::AlreadyStarted);
        }

        tracing::debug!(
            "Task {}: recognizing {} strokes",
            self.id,
            self.ink.strokes().len()
        );

        let candidates = self
            .recognizer
            .recognize(&self.ink)
            .await
            .map_err(RecognitionError::Engine)?;

        if self.is_cancelled() {
            tracing::debug!("Task {}: cancelled, dropping {} candidates", self.id, candidates.len());
            return Ok(None);
        }

        let Some(top) = candidates.into_iter().next() else {
            tracing::debug!("Task {}: no candidates", self.id);
            return Ok(None);
        };

        let content = RecognizedContent {
            ink: self.ink.clone(),
            text: top.text,
        };
        let text = content.text.clone();
        let _ = self.result.set(content);
        self.done.store(true, Ordering::SeqCst);

        tracing::info!("Task {}: result: {}", self.id, text);
        Ok(Some(text))
    }
}
