//! Test doubles for the recognition engine and the model repository.

use crate::engine::{Candidate, RecognitionEngine, Recognizer};
use crate::ink::Ink;
use crate::model::{DownloadConditions, ModelIdentifier, ModelKind};
use crate::repository::ModelRepository;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub struct ScriptedReply {
    outcome: Result<Vec<Candidate>, String>,
    gate: Option<oneshot::Receiver<()>>,
}

impl ScriptedReply {
    pub fn candidates(texts: &[&str]) -> Self {
        Self {
            outcome: Ok(texts.iter().map(|t| Candidate::new(*t)).collect()),
            gate: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            gate: None,
        }
    }

    /// Reply held back until the returned sender fires
    pub fn gated(candidates: Vec<Candidate>) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        let reply = Self {
            outcome: Ok(candidates),
            gate: Some(rx),
        };
        (reply, tx)
    }
}

/// Recognizer answering from a queue of scripted replies
///
/// An empty queue answers with no candidates.
#[derive(Default)]
pub struct ScriptedRecognizer {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: Mutex<Vec<Ink>>,
    closed: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Ink> {
        self.calls.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for ScriptedRecognizer {
    async fn recognize(&self, ink: &Ink) -> Result<Vec<Candidate>> {
        self.calls.lock().unwrap().push(ink.clone());
        let reply = self.replies.lock().unwrap().pop_front();

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        if let Some(gate) = reply.gate {
            let _ = gate.await;
        }
        reply.outcome.map_err(|e| anyhow::anyhow!(e))
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Engine handing out one shared scripted recognizer for every model
pub struct ScriptedEngine {
    pub recognizer: Arc<ScriptedRecognizer>,
    bound: Mutex<Vec<ModelIdentifier>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            recognizer: Arc::new(ScriptedRecognizer::new()),
            bound: Mutex::new(Vec::new()),
        }
    }

    pub fn bound_models(&self) -> Vec<ModelIdentifier> {
        self.bound.lock().unwrap().clone()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn recognizer(&self, model: &ModelIdentifier) -> Arc<dyn Recognizer> {
        self.bound.lock().unwrap().push(model.clone());
        self.recognizer.clone()
    }
}

/// In-memory model repository counting every call
#[derive(Default)]
pub struct FakeRepository {
    downloaded: Mutex<HashSet<ModelIdentifier>>,
    pub calls: AtomicUsize,
    pub fail_downloads: AtomicBool,
    pub fail_deletes: AtomicBool,
    last_conditions: Mutex<Option<DownloadConditions>>,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_downloaded(tags: &[&str]) -> Self {
        let repo = Self::new();
        repo.downloaded.lock().unwrap().extend(
            tags.iter()
                .map(|t| ModelIdentifier::from_language_tag(t).unwrap()),
        );
        repo
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_conditions(&self) -> Option<DownloadConditions> {
        *self.last_conditions.lock().unwrap()
    }
}

#[async_trait]
impl ModelRepository for FakeRepository {
    async fn is_downloaded(&self, model: &ModelIdentifier) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.downloaded.lock().unwrap().contains(model))
    }

    async fn download(
        &self,
        model: &ModelIdentifier,
        conditions: DownloadConditions,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_conditions.lock().unwrap() = Some(conditions);
        if self.fail_downloads.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset");
        }
        self.downloaded.lock().unwrap().insert(model.clone());
        Ok(())
    }

    async fn delete(&self, model: &ModelIdentifier) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("disk busy");
        }
        self.downloaded.lock().unwrap().remove(model);
        Ok(())
    }

    async fn list_downloaded(&self, _kind: ModelKind) -> Result<HashSet<ModelIdentifier>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.downloaded.lock().unwrap().clone())
    }
}
