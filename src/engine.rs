use crate::ink::Ink;
use crate::model::ModelIdentifier;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// One ranked recognition candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    #[serde(default)]
    pub score: Option<f32>,
}

impl Candidate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            score: None,
        }
    }
}

/// A recognizer bound to one model
///
/// Candidates are returned best first.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, ink: &Ink) -> Result<Vec<Candidate>>;

    /// Release engine-side resources. Calls already in flight may still complete.
    fn close(&self) {}
}

/// Creates recognizers for models
pub trait RecognitionEngine: Send + Sync {
    fn recognizer(&self, model: &ModelIdentifier) -> Arc<dyn Recognizer>;
}

/// Recognition engine backed by an external command
///
/// For every recognition the command:
/// - Runs through `sh -c` with `INKSCRIBE_MODEL_TAG` and `INKSCRIBE_MODEL_DIR` set
/// - Receives the ink as JSON on stdin
/// - Prints a JSON array of ranked candidates on stdout
pub struct CommandEngine {
    command: String,
    models_dir: PathBuf,
}

impl CommandEngine {
    pub fn new(command: impl Into<String>, models_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            models_dir: models_dir.into(),
        }
    }
}

impl RecognitionEngine for CommandEngine {
    fn recognizer(&self, model: &ModelIdentifier) -> Arc<dyn Recognizer> {
        Arc::new(CommandRecognizer {
            command: self.command.clone(),
            model: model.clone(),
            model_dir: self.models_dir.join(model.language_tag()),
        })
    }
}

struct CommandRecognizer {
    command: String,
    model: ModelIdentifier,
    model_dir: PathBuf,
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self, ink: &Ink) -> Result<Vec<Candidate>> {
        tracing::debug!(
            "Running recognizer for {} ({} strokes)",
            self.model,
            ink.strokes().len()
        );

        let payload = serde_json::to_vec(ink).context("Failed to serialize ink")?;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("INKSCRIBE_MODEL_TAG", self.model.language_tag())
            .env("INKSCRIBE_MODEL_DIR", &self.model_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn recognizer: {}", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .context("Failed to get recognizer stdin")?;

        // feed stdin while draining stdout so neither side can fill its pipe and stall
        let write_ink = async move {
            let written = stdin.write_all(&payload).await;
            drop(stdin);
            written
        };
        let (written, output) = tokio::join!(write_ink, child.wait_with_output());

        match written {
            Ok(()) => {}
            // the command answered without reading all of its input
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                tracing::debug!("Recognizer closed stdin early");
            }
            Err(e) => return Err(e).context("Failed to write ink to recognizer"),
        }

        let output = output.context("Failed to wait on recognizer")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Recognizer exited with {}: {}", output.status, stderr.trim());
        }

        let candidates: Vec<Candidate> = serde_json::from_slice(&output.stdout)
            .context("Failed to parse recognizer output")?;

        tracing::debug!("Recognizer returned {} candidates", candidates.len());
        Ok(candidates)
    }
}
