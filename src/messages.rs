use crate::error::{RecognitionError, RegistryError};
use crate::ink::{Ink, TouchEvent};
use crate::services::RecognizedContent;
use serde::Serialize;
use std::collections::BTreeSet;
use tokio::sync::oneshot;

/// Identity of one recognition task within an orchestrator
pub type TaskId = u64;

/// Commands for the Orchestrator service
pub enum OrchestratorCommand {
    Touch(TouchEvent),
    Recognize,
    Reset,
    SetActiveModel {
        tag: String,
        reply: oneshot::Sender<Result<String, RegistryError>>,
    },
    Download(oneshot::Sender<Result<String, RegistryError>>),
    DeleteActiveModel(oneshot::Sender<Result<String, RegistryError>>),
    IsActiveModelDownloaded(oneshot::Sender<Result<bool, RegistryError>>),
    RefreshDownloadedModels,
    SetClearAfterRecognition(bool),
    SetTriggerAfterInput(bool),
    Session(oneshot::Sender<SessionSnapshot>),
    Shutdown(oneshot::Sender<()>),

    // Completions posted back by spawned work
    RecognitionFinished {
        task_id: TaskId,
        outcome: Result<Option<String>, RecognitionError>,
    },
    ModelOperationFinished {
        operation: ModelOperation,
        outcome: Result<String, RegistryError>,
        reply: oneshot::Sender<Result<String, RegistryError>>,
    },
    DownloadedModelsListed(Result<BTreeSet<String>, RegistryError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOperation {
    Download,
    Delete,
}

/// Orchestrator state (observable via watch channel)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    PendingTrigger,
    Recognizing,
    /// Set by shutdown; a reset returns to `Idle` without passing through here
    Closed,
}

/// Change notifications delivered to subscribers, in the order they happened
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    StatusChanged {
        status: String,
    },
    ContentChanged {
        committed: Vec<RecognizedContent>,
        current_ink: Ink,
    },
    DownloadedModelsChanged {
        language_tags: BTreeSet<String>,
    },
}

/// Point-in-time view of an orchestrator session
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: OrchestratorState,
    pub status: String,
    pub current_ink: Ink,
    pub committed: Vec<RecognizedContent>,
    pub active_model: Option<String>,
    pub tasks_started: u64,
    pub stale_results_discarded: u64,
}
