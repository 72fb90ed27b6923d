use super::model_registry::ModelRegistry;
use super::recognition_task::{RecognitionTask, RecognizedContent};
use crate::error::{OrchestratorError, RecognitionError, RegistryError};
use crate::ink::{InkBuffer, TouchEvent};
use crate::messages::{
    ModelOperation, Notification, OrchestratorCommand, OrchestratorState, SessionSnapshot, TaskId,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

const COMMAND_CAPACITY: usize = 64;

pub const MSG_INK_UNCHANGED: &str = "No recognition, ink unchanged or empty";
pub const MSG_RECOGNIZER_NOT_SET: &str = "Recognizer not set";
pub const MSG_NO_RESULT: &str = "No recognition result";
pub const MSG_DOWNLOAD_STARTED: &str = "Download started.";

/// When recognition runs and what happens to the ink afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognitionSettings {
    pub clear_current_ink_after_recognition: bool,
    pub trigger_recognition_after_input: bool,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            clear_current_ink_after_recognition: true,
            trigger_recognition_after_input: false,
        }
    }
}

/// Turns touch input into committed, recognized content
///
/// This service:
/// - Owns the ink buffer, the committed content and the model registry
/// - Decides when to start a recognition task and cancels the one it replaces
/// - Runs recognition and model operations as spawned tasks whose
///   completions come back through its own mailbox
/// - Publishes status, content and downloaded-model changes to subscribers
///
/// All state changes happen inside `run`, one command at a time. At most one
/// recognition task is outstanding, and only that task may commit.
pub struct Orchestrator {
    cmd_rx: mpsc::Receiver<OrchestratorCommand>,
    cmd_tx: mpsc::WeakSender<OrchestratorCommand>,
    events: broadcast::Sender<Notification>,
    state_tx: watch::Sender<OrchestratorState>,
    settings: RecognitionSettings,
    registry: ModelRegistry,
    buffer: InkBuffer,
    committed: Vec<RecognizedContent>,
    outstanding: Option<Arc<RecognitionTask>>,
    ink_changed: bool,
    status: String,
    next_task_id: TaskId,
    tasks_started: u64,
    stale_results_discarded: u64,
}

impl Orchestrator {
    pub fn new(
        registry: ModelRegistry,
        settings: RecognitionSettings,
        notification_capacity: usize,
    ) -> (Self, OrchestratorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(notification_capacity);
        let (state_tx, state_rx) = watch::channel(OrchestratorState::Idle);

        let orchestrator = Self {
            cmd_rx,
            cmd_tx: cmd_tx.downgrade(),
            events: events.clone(),
            state_tx,
            settings,
            registry,
            buffer: InkBuffer::new(),
            committed: Vec::new(),
            outstanding: None,
            ink_changed: false,
            status: String::new(),
            next_task_id: 1,
            tasks_started: 0,
            stale_results_discarded: 0,
        };

        let handle = OrchestratorHandle {
            tx: cmd_tx,
            events,
            state_rx,
        };

        (orchestrator, handle)
    }

    pub async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            if !self.handle_command(cmd) {
                break;
            }
        }

        self.close();
        tracing::info!("Orchestrator stopped");
    }

    /// Returns `false` once the orchestrator should stop.
    fn handle_command(&mut self, cmd: OrchestratorCommand) -> bool {
        match cmd {
            OrchestratorCommand::Touch(event) => self.handle_touch(event),
            OrchestratorCommand::Recognize => self.request_recognition(),
            OrchestratorCommand::Reset => self.reset(),
            OrchestratorCommand::SetActiveModel { tag, reply } => {
                let result = self.set_active_model(&tag);
                let _ = reply.send(result);
            }
            OrchestratorCommand::Download(reply) => self.download(reply),
            OrchestratorCommand::DeleteActiveModel(reply) => self.delete_active_model(reply),
            OrchestratorCommand::IsActiveModelDownloaded(reply) => {
                let registry = self.registry.clone();
                tokio::spawn(async move {
                    let _ = reply.send(registry.is_active_model_downloaded().await);
                });
            }
            OrchestratorCommand::RefreshDownloadedModels => self.refresh_downloaded_models(),
            OrchestratorCommand::SetClearAfterRecognition(enabled) => {
                self.settings.clear_current_ink_after_recognition = enabled;
            }
            OrchestratorCommand::SetTriggerAfterInput(enabled) => {
                self.settings.trigger_recognition_after_input = enabled;
            }
            OrchestratorCommand::Session(reply) => {
                let _ = reply.send(self.session());
            }
            OrchestratorCommand::Shutdown(reply) => {
                self.close();
                let _ = reply.send(());
                return false;
            }
            OrchestratorCommand::RecognitionFinished { task_id, outcome } => {
                self.finish_recognition(task_id, outcome)
            }
            OrchestratorCommand::ModelOperationFinished {
                operation,
                outcome,
                reply,
            } => self.finish_model_operation(operation, outcome, reply),
            OrchestratorCommand::DownloadedModelsListed(result) => match result {
                Ok(language_tags) => {
                    let _ = self
                        .events
                        .send(Notification::DownloadedModelsChanged { language_tags });
                }
                Err(e) => tracing::warn!("Failed to list downloaded models: {}", e),
            },
        }

        true
    }

    fn handle_touch(&mut self, event: TouchEvent) {
        match self.buffer.apply(&event) {
            Ok(true) => {
                self.ink_changed = true;
                if self.settings.trigger_recognition_after_input {
                    self.request_recognition();
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("Ignoring {:?} touch event: {}", event.action, e),
        }
    }

    fn request_recognition(&mut self) {
        self.set_state(OrchestratorState::PendingTrigger);
        self.try_trigger();
    }

    /// Start a task for the current ink, replacing any outstanding one.
    fn try_trigger(&mut self) {
        let ink = self.buffer.snapshot();
        if !self.ink_changed || ink.is_empty() {
            self.set_status(MSG_INK_UNCHANGED);
            self.settle_state();
            return;
        }

        let Some(recognizer) = self.registry.active_recognizer() else {
            self.set_status(MSG_RECOGNIZER_NOT_SET);
            self.settle_state();
            return;
        };

        self.cancel_outstanding();

        let task_id = self.next_task_id;
        let task = match RecognitionTask::new(task_id, recognizer, ink) {
            Ok(task) => Arc::new(task),
            Err(e) => {
                tracing::warn!("Not starting recognition: {}", e);
                self.settle_state();
                return;
            }
        };

        self.next_task_id += 1;
        self.tasks_started += 1;
        self.ink_changed = false;
        self.outstanding = Some(task.clone());
        self.set_state(OrchestratorState::Recognizing);

        tracing::info!("Starting recognition task {}", task_id);
        self.spawn_completion(async move {
            let outcome = task.run().await;
            OrchestratorCommand::RecognitionFinished { task_id, outcome }
        });
    }

    fn finish_recognition(
        &mut self,
        task_id: TaskId,
        outcome: Result<Option<String>, RecognitionError>,
    ) {
        let Some(task) = self.outstanding.take_if(|t| t.id() == task_id) else {
            self.stale_results_discarded += 1;
            tracing::debug!("Discarding result of superseded task {}", task_id);
            return;
        };

        match outcome {
            Ok(Some(_)) => match task.result() {
                Some(content) => {
                    self.status = format!("Successful recognition: {}", content.text);
                    self.committed.push(content.clone());
                    if self.settings.clear_current_ink_after_recognition {
                        self.buffer.clear();
                        self.ink_changed = false;
                    }
                }
                None => {
                    self.ink_changed = true;
                    self.status = MSG_NO_RESULT.to_string();
                }
            },
            Ok(None) => {
                // nothing was committed, the same ink may be submitted again
                self.ink_changed = true;
                self.status = MSG_NO_RESULT.to_string();
            }
            Err(e) => {
                tracing::warn!("Recognition task {} failed: {}", task_id, e);
                self.ink_changed = true;
                self.status = format!("Recognition failed: {}", e);
            }
        }

        self.set_state(OrchestratorState::Idle);
        self.publish_content();
        self.publish_status();
    }

    fn reset(&mut self) {
        tracing::debug!("Resetting session");
        self.cancel_outstanding();

        self.buffer.clear();
        self.committed.clear();
        self.ink_changed = false;
        self.status.clear();

        self.set_state(OrchestratorState::Idle);
        self.publish_content();
        self.publish_status();
    }

    fn set_active_model(&mut self, tag: &str) -> Result<String, RegistryError> {
        // the registry releases the recognizer an outstanding task would be using
        self.cancel_outstanding();
        self.settle_state();

        let result = self.registry.select_model(tag);
        self.ink_changed = true;

        match &result {
            Ok(message) => self.set_status(message.clone()),
            Err(e) => self.set_status(e.to_string()),
        }
        result
    }

    fn download(&mut self, reply: oneshot::Sender<Result<String, RegistryError>>) {
        if self.registry.active_model().is_some() {
            self.set_status(MSG_DOWNLOAD_STARTED);
        }

        let registry = self.registry.clone();
        self.spawn_completion(async move {
            let outcome = registry.download_active_model().await;
            OrchestratorCommand::ModelOperationFinished {
                operation: ModelOperation::Download,
                outcome,
                reply,
            }
        });
    }

    fn delete_active_model(&mut self, reply: oneshot::Sender<Result<String, RegistryError>>) {
        let registry = self.registry.clone();
        self.spawn_completion(async move {
            let outcome = registry.delete_active_model().await;
            OrchestratorCommand::ModelOperationFinished {
                operation: ModelOperation::Delete,
                outcome,
                reply,
            }
        });
    }

    fn finish_model_operation(
        &mut self,
        operation: ModelOperation,
        outcome: Result<String, RegistryError>,
        reply: oneshot::Sender<Result<String, RegistryError>>,
    ) {
        match &outcome {
            Ok(message) => {
                self.set_status(message.clone());
                if self.registry.active_model().is_some() {
                    self.refresh_downloaded_models();
                }
            }
            Err(e) => self.set_status(format!("{:?} failed: {}", operation, e)),
        }
        let _ = reply.send(outcome);
    }

    fn refresh_downloaded_models(&mut self) {
        let registry = self.registry.clone();
        self.spawn_completion(async move {
            OrchestratorCommand::DownloadedModelsListed(
                registry.list_downloaded_model_languages().await,
            )
        });
    }

    fn cancel_outstanding(&mut self) {
        if let Some(task) = self.outstanding.take() {
            tracing::debug!("Cancelling recognition task {}", task.id());
            task.cancel();
        }
    }

    fn close(&mut self) {
        self.cancel_outstanding();
        self.set_state(OrchestratorState::Closed);
    }

    /// Run `work` off the orchestrator and feed its completion back in.
    fn spawn_completion<F>(&self, work: F)
    where
        F: Future<Output = OrchestratorCommand> + Send + 'static,
    {
        let Some(tx) = self.cmd_tx.upgrade() else {
            tracing::debug!("No handles left, dropping background work");
            return;
        };

        tokio::spawn(async move {
            let cmd = work.await;
            if tx.send(cmd).await.is_err() {
                tracing::debug!("Orchestrator gone before completion was delivered");
            }
        });
    }

    fn settle_state(&mut self) {
        let state = if self.outstanding.is_some() {
            OrchestratorState::Recognizing
        } else {
            OrchestratorState::Idle
        };
        self.set_state(state);
    }

    /// Watchers are only woken by an actual transition.
    fn set_state(&self, state: OrchestratorState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
        self.publish_status();
    }

    fn publish_status(&self) {
        tracing::debug!("Status: {}", self.status);
        let _ = self.events.send(Notification::StatusChanged {
            status: self.status.clone(),
        });
    }

    fn publish_content(&self) {
        let _ = self.events.send(Notification::ContentChanged {
            committed: self.committed.clone(),
            current_ink: self.buffer.snapshot(),
        });
    }

    fn session(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: *self.state_tx.borrow(),
            status: self.status.clone(),
            current_ink: self.buffer.snapshot(),
            committed: self.committed.clone(),
            active_model: self
                .registry
                .active_model()
                .map(|m| m.language_tag().to_string()),
            tasks_started: self.tasks_started,
            stale_results_discarded: self.stale_results_discarded,
        }
    }
}

/// Handle for communicating with the Orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchestratorCommand>,
    events: broadcast::Sender<Notification>,
    state_rx: watch::Receiver<OrchestratorState>,
}

impl OrchestratorHandle {
    /// Subscribe to status, content and downloaded-model notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn state(&self) -> watch::Receiver<OrchestratorState> {
        self.state_rx.clone()
    }

    async fn send(&self, cmd: OrchestratorCommand) -> Result<(), OrchestratorError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| OrchestratorError::Closed)
    }

    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<T>) -> OrchestratorCommand,
    ) -> Result<T, OrchestratorError> {
        let (reply, rx) = oneshot::channel();
        self.send(cmd(reply)).await?;
        rx.await.map_err(|_| OrchestratorError::Closed)
    }

    pub async fn add_touch_event(&self, event: TouchEvent) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::Touch(event)).await
    }

    pub async fn recognize(&self) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::Recognize).await
    }

    pub async fn reset(&self) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::Reset).await
    }

    pub async fn set_active_model(&self, tag: &str) -> Result<String, OrchestratorError> {
        let tag = tag.to_string();
        Ok(self
            .request(|reply| OrchestratorCommand::SetActiveModel { tag, reply })
            .await??)
    }

    pub async fn download(&self) -> Result<String, OrchestratorError> {
        Ok(self.request(OrchestratorCommand::Download).await??)
    }

    pub async fn delete_active_model(&self) -> Result<String, OrchestratorError> {
        Ok(self.request(OrchestratorCommand::DeleteActiveModel).await??)
    }

    pub async fn is_active_model_downloaded(&self) -> Result<bool, OrchestratorError> {
        Ok(self
            .request(OrchestratorCommand::IsActiveModelDownloaded)
            .await??)
    }

    pub async fn refresh_downloaded_models_status(&self) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::RefreshDownloadedModels).await
    }

    pub async fn set_clear_current_ink_after_recognition(
        &self,
        enabled: bool,
    ) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::SetClearAfterRecognition(enabled))
            .await
    }

    pub async fn set_trigger_recognition_after_input(
        &self,
        enabled: bool,
    ) -> Result<(), OrchestratorError> {
        self.send(OrchestratorCommand::SetTriggerAfterInput(enabled))
            .await
    }

    pub async fn session(&self) -> Result<SessionSnapshot, OrchestratorError> {
        self.request(OrchestratorCommand::Session).await
    }

    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.request(OrchestratorCommand::Shutdown).await
    }
}
