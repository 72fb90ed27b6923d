use crate::model::{DownloadConditions, ModelIdentifier, ModelKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;

const MANIFEST_FILE: &str = "manifest.json";

/// Presence, download and deletion of recognition models
#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn is_downloaded(&self, model: &ModelIdentifier) -> Result<bool>;

    async fn download(&self, model: &ModelIdentifier, conditions: DownloadConditions)
    -> Result<()>;

    async fn delete(&self, model: &ModelIdentifier) -> Result<()>;

    async fn list_downloaded(&self, kind: ModelKind) -> Result<HashSet<ModelIdentifier>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    language_tag: ModelIdentifier,
    kind: ModelKind,
}

/// Model repository on the local filesystem
///
/// Each installed model is a directory `<root>/<tag>/` holding a
/// `manifest.json`. Downloads run the fetch command into a temporary
/// directory next to the installed models and move it into place once the
/// command succeeds, so a half-fetched model is never reported as present.
pub struct LocalModelRepository {
    root: PathBuf,
    fetch_command: Option<String>,
}

impl LocalModelRepository {
    pub fn new(root: impl Into<PathBuf>, fetch_command: Option<String>) -> Self {
        Self {
            root: root.into(),
            fetch_command,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, model: &ModelIdentifier) -> PathBuf {
        self.root.join(model.language_tag())
    }

    async fn read_manifest(dir: &Path) -> Option<Manifest> {
        let contents = tokio::fs::read(dir.join(MANIFEST_FILE)).await.ok()?;
        match serde_json::from_slice(&contents) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                tracing::warn!("Ignoring unreadable manifest in {:?}: {}", dir, e);
                None
            }
        }
    }

    async fn fetch_into(&self, model: &ModelIdentifier, staging: &Path) -> Result<()> {
        let command = self
            .fetch_command
            .as_deref()
            .context("No download command configured")?;

        tracing::info!("Fetching model {} with: {}", model, command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("INKSCRIBE_MODEL_TAG", model.language_tag())
            .env("INKSCRIBE_MODEL_DIR", staging)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to spawn download command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "Download command exited with {}: {}",
                output.status,
                stderr.trim()
            );
        }

        Ok(())
    }

    /// Move a staged model into place. The staging directory is removed if the move fails.
    async fn install(staging: TempDir, target: &Path) -> Result<()> {
        tokio::fs::rename(staging.path(), target)
            .await
            .with_context(|| format!("Failed to install model into {:?}", target))?;
        let _ = staging.keep();
        Ok(())
    }
}

#[async_trait]
impl ModelRepository for LocalModelRepository {
    async fn is_downloaded(&self, model: &ModelIdentifier) -> Result<bool> {
        Ok(Self::read_manifest(&self.model_dir(model)).await.is_some())
    }

    async fn download(
        &self,
        model: &ModelIdentifier,
        conditions: DownloadConditions,
    ) -> Result<()> {
        if conditions.require_wifi || conditions.require_charging {
            tracing::warn!(
                "Local repository cannot check download conditions {:?}, downloading anyway",
                conditions
            );
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create models directory: {:?}", self.root))?;

        let staging = tempfile::Builder::new()
            .prefix(".inkscribe-download-")
            .tempdir_in(&self.root)
            .context("Failed to create staging directory")?;

        self.fetch_into(model, staging.path()).await?;

        let manifest = Manifest {
            language_tag: model.clone(),
            kind: ModelKind::DigitalInk,
        };
        let contents = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
        tokio::fs::write(staging.path().join(MANIFEST_FILE), contents)
            .await
            .context("Failed to write manifest")?;

        let target = self.model_dir(model);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&target)
                .await
                .with_context(|| format!("Failed to replace existing model at {:?}", target))?;
        }

        Self::install(staging, &target).await?;

        tracing::info!("Installed model {} at {:?}", model, target);
        Ok(())
    }

    async fn delete(&self, model: &ModelIdentifier) -> Result<()> {
        let dir = self.model_dir(model);
        tokio::fs::remove_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to delete model directory: {:?}", dir))?;

        tracing::info!("Deleted model {}", model);
        Ok(())
    }

    async fn list_downloaded(&self, kind: ModelKind) -> Result<HashSet<ModelIdentifier>> {
        let mut models = HashSet::new();

        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(models),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read models directory: {:?}", self.root));
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read models directory entry")?
        {
            if let Some(manifest) = Self::read_manifest(&entry.path()).await {
                if manifest.kind == kind {
                    models.insert(manifest.language_tag);
                }
            }
        }

        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(tag: &str) -> ModelIdentifier {
        ModelIdentifier::from_language_tag(tag).unwrap()
    }

    fn repository(root: &Path) -> LocalModelRepository {
        LocalModelRepository::new(
            root.join("models"),
            Some(r#"echo "$INKSCRIBE_MODEL_TAG" > "$INKSCRIBE_MODEL_DIR/weights.bin""#.to_string()),
        )
    }

    #[tokio::test]
    async fn test_download_installs_model() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());
        let en = model("en-US");

        assert!(!repo.is_downloaded(&en).await.unwrap());
        repo.download(&en, DownloadConditions::default()).await.unwrap();
        assert!(repo.is_downloaded(&en).await.unwrap());

        let weights = std::fs::read_to_string(repo.root().join("en-US").join("weights.bin")).unwrap();
        assert_eq!(weights.trim(), "en-US");

        // no staging directories are left behind
        let names: Vec<String> = std::fs::read_dir(repo.root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["en-US".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_nothing_installed() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalModelRepository::new(dir.path(), Some("exit 1".to_string()));
        let de = model("de");

        assert!(repo.download(&de, DownloadConditions::default()).await.is_err());
        assert!(!repo.is_downloaded(&de).await.unwrap());
        assert!(repo.list_downloaded(ModelKind::DigitalInk).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_removes_staging() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::Builder::new()
            .prefix(".inkscribe-download-")
            .tempdir_in(dir.path())
            .unwrap();
        std::fs::write(staging.path().join(MANIFEST_FILE), "{}").unwrap();
        let staged = staging.path().to_path_buf();

        let target = dir.path().join("missing-parent").join("en-US");
        assert!(LocalModelRepository::install(staging, &target).await.is_err());
        assert!(!staged.exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_download_without_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalModelRepository::new(dir.path(), None);

        let err = repo
            .download(&model("fr"), DownloadConditions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No download command"));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let repo = repository(dir.path());

        assert!(repo.list_downloaded(ModelKind::DigitalInk).await.unwrap().is_empty());

        for tag in ["en-US", "zxx-Zsye-x-emoji"] {
            repo.download(&model(tag), DownloadConditions::default()).await.unwrap();
        }
        std::fs::create_dir_all(repo.root().join("stray")).unwrap();

        let listed = repo.list_downloaded(ModelKind::DigitalInk).await.unwrap();
        assert_eq!(listed, HashSet::from([model("en-US"), model("zxx-Zsye-x-emoji")]));

        repo.delete(&model("en-US")).await.unwrap();
        let listed = repo.list_downloaded(ModelKind::DigitalInk).await.unwrap();
        assert_eq!(listed, HashSet::from([model("zxx-Zsye-x-emoji")]));

        assert!(repo.delete(&model("en-US")).await.is_err());
    }
}
