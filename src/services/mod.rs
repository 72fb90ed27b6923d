pub mod model_registry;
pub mod orchestrator;
pub mod recognition_task;

pub use model_registry::ModelRegistry;
pub use orchestrator::{Orchestrator, OrchestratorHandle, RecognitionSettings};
pub use recognition_task::{RecognitionTask, RecognizedContent};
