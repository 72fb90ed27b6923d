//! Handwriting recognition orchestration for note taking.
//!
//! Touch samples go into an [`Orchestrator`], which turns them into ink,
//! runs recognition against the selected model in the background and
//! publishes the committed text to subscribers.

pub mod config;
pub mod engine;
pub mod error;
pub mod ink;
pub mod messages;
pub mod model;
pub mod repository;
pub mod services;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use engine::{Candidate, CommandEngine, RecognitionEngine, Recognizer};
pub use error::{InkError, OrchestratorError, RecognitionError, RegistryError};
pub use ink::{Ink, InkBuffer, Point, Stroke, TouchAction, TouchEvent};
pub use messages::{Notification, OrchestratorState, SessionSnapshot};
pub use model::{
    DownloadConditions, LanguageTagParser, ModelCategory, ModelIdentifier, ModelIdentifierParser,
    ModelKind,
};
pub use repository::{LocalModelRepository, ModelRepository};
pub use services::{
    ModelRegistry, Orchestrator, OrchestratorHandle, RecognitionSettings, RecognitionTask,
    RecognizedContent,
};
