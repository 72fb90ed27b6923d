/// Ink buffer misuse (touch events out of order)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InkError {
    #[error("Invalid ink state: {0}")]
    InvalidState(&'static str),
}

/// Model registry failures
///
/// `NoActiveModel`, `ModelParse` and `UnknownModel` are user-facing messages,
/// `Repository` wraps a failure reported by the model repository service.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No active model")]
    NoActiveModel,

    #[error("Failed to parse language '{tag}'")]
    ModelParse { tag: String },

    #[error("No model for language: {tag}")]
    UnknownModel { tag: String },

    #[error("Model repository failure: {0:#}")]
    Repository(anyhow::Error),
}

/// Recognition task failures
///
/// A cancelled task is not an error: it resolves without a result.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Refusing to recognize empty ink")]
    EmptyInk,

    #[error("Recognition task already started")]
    AlreadyStarted,

    #[error("Recognition engine failure: {0:#}")]
    Engine(anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Orchestrator is closed")]
    Closed,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
