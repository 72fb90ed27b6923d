use crate::engine::{RecognitionEngine, Recognizer};
use crate::error::RegistryError;
use crate::model::{DownloadConditions, ModelIdentifier, ModelIdentifierParser, ModelKind};
use crate::repository::ModelRepository;
use std::collections::BTreeSet;
use std::sync::Arc;

pub const MSG_MODEL_NOT_SELECTED: &str = "Model not selected.";
pub const MSG_DOWNLOADED: &str = "Downloaded model successfully";
pub const MSG_MODEL_NOT_SET: &str = "Model not set";
pub const MSG_NOT_DOWNLOADED: &str = "Model not downloaded yet";
pub const MSG_DELETED: &str = "Model successfully deleted";

#[derive(Clone)]
struct ActiveModel {
    identifier: ModelIdentifier,
    recognizer: Arc<dyn Recognizer>,
}

/// Tracks the selected model and runs model operations against the repository
///
/// Cloning is cheap; a clone carries the current selection and can be moved
/// into a spawned task to run one of the async operations.
#[derive(Clone)]
pub struct ModelRegistry {
    engine: Arc<dyn RecognitionEngine>,
    repository: Arc<dyn ModelRepository>,
    parser: Arc<dyn ModelIdentifierParser>,
    conditions: DownloadConditions,
    active: Option<ActiveModel>,
}

impl ModelRegistry {
    pub fn new(
        engine: Arc<dyn RecognitionEngine>,
        repository: Arc<dyn ModelRepository>,
        parser: Arc<dyn ModelIdentifierParser>,
    ) -> Self {
        Self {
            engine,
            repository,
            parser,
            conditions: DownloadConditions::default(),
            active: None,
        }
    }

    pub fn with_download_conditions(mut self, conditions: DownloadConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn active_model(&self) -> Option<&ModelIdentifier> {
        self.active.as_ref().map(|m| &m.identifier)
    }

    pub fn active_recognizer(&self) -> Option<Arc<dyn Recognizer>> {
        self.active.as_ref().map(|m| m.recognizer.clone())
    }

    /// Select the model for `tag`, binding a fresh recognizer to it.
    ///
    /// The previous model is released before the tag is parsed, so a failed
    /// selection leaves no active model.
    pub fn select_model(&mut self, tag: &str) -> Result<String, RegistryError> {
        if let Some(previous) = self.active.take() {
            tracing::debug!("Releasing model {}", previous.identifier);
            previous.recognizer.close();
        }

        let identifier = match self.parser.parse(tag) {
            Ok(Some(identifier)) => identifier,
            Ok(None) => {
                tracing::warn!("No model for language '{}'", tag);
                return Err(RegistryError::UnknownModel {
                    tag: tag.to_string(),
                });
            }
            Err(e) => {
                tracing::error!("Failed to parse language '{}': {}", tag, e);
                return Err(RegistryError::ModelParse {
                    tag: tag.to_string(),
                });
            }
        };

        let recognizer = self.engine.recognizer(&identifier);
        tracing::info!("Model set for language '{}' ('{}')", tag, identifier);
        self.active = Some(ActiveModel {
            identifier,
            recognizer,
        });

        Ok(format!("Model set for language: {}", tag))
    }

    pub async fn is_active_model_downloaded(&self) -> Result<bool, RegistryError> {
        let model = self.active_model().ok_or(RegistryError::NoActiveModel)?;
        self.repository
            .is_downloaded(model)
            .await
            .map_err(RegistryError::Repository)
    }

    pub async fn delete_active_model(&self) -> Result<String, RegistryError> {
        let Some(model) = self.active_model() else {
            tracing::info!("{}", MSG_MODEL_NOT_SET);
            return Ok(MSG_MODEL_NOT_SET.to_string());
        };

        let result = self.delete_if_downloaded(model).await;

        if let Err(e) = &result {
            tracing::error!("Error while deleting model {}: {}", model, e);
        }
        result
    }

    async fn delete_if_downloaded(&self, model: &ModelIdentifier) -> Result<String, RegistryError> {
        if !self.is_active_model_downloaded().await? {
            return Ok(MSG_NOT_DOWNLOADED.to_string());
        }
        self.repository
            .delete(model)
            .await
            .map_err(RegistryError::Repository)?;
        tracing::info!("Model {} successfully deleted", model);
        Ok(MSG_DELETED.to_string())
    }

    pub async fn download_active_model(&self) -> Result<String, RegistryError> {
        let Some(model) = self.active_model() else {
            return Ok(MSG_MODEL_NOT_SELECTED.to_string());
        };

        match self.repository.download(model, self.conditions).await {
            Ok(()) => {
                tracing::info!("Model {} download succeeded", model);
                Ok(MSG_DOWNLOADED.to_string())
            }
            Err(e) => {
                tracing::error!("Error while downloading model {}: {:#}", model, e);
                Err(RegistryError::Repository(e))
            }
        }
    }

    pub async fn list_downloaded_model_languages(&self) -> Result<BTreeSet<String>, RegistryError> {
        let models = self
            .repository
            .list_downloaded(ModelKind::DigitalInk)
            .await
            .map_err(RegistryError::Repository)?;

        let languages: BTreeSet<String> = models
            .into_iter()
            .map(|m| m.language_tag().to_string())
            .collect();
        tracing::info!("Downloaded models for languages: {:?}", languages);
        Ok(languages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LanguageTagParser;
    use crate::testing::{FakeRepository, ScriptedEngine};
    use std::sync::atomic::Ordering;

    fn registry(repository: Arc<FakeRepository>) -> (ModelRegistry, Arc<ScriptedEngine>) {
        let engine = Arc::new(ScriptedEngine::new());
        let registry = ModelRegistry::new(
            engine.clone(),
            repository,
            Arc::new(LanguageTagParser::new()),
        );
        (registry, engine)
    }

    #[test]
    fn test_select_model_binds_recognizer() {
        let (mut registry, engine) = registry(Arc::new(FakeRepository::new()));

        let message = registry.select_model("en-us").unwrap();
        assert_eq!(message, "Model set for language: en-us");
        assert_eq!(registry.active_model().unwrap().language_tag(), "en-US");
        assert!(registry.active_recognizer().is_some());
        assert_eq!(engine.bound_models().len(), 1);
    }

    #[test]
    fn test_reselect_releases_previous_recognizer() {
        let (mut registry, engine) = registry(Arc::new(FakeRepository::new()));

        registry.select_model("en").unwrap();
        registry.select_model("de").unwrap();
        assert_eq!(engine.recognizer.closed(), 1);
        assert_eq!(registry.active_model().unwrap().language_tag(), "de");
    }

    #[tokio::test]
    async fn test_unparseable_tag_leaves_no_active_model() {
        let repository = Arc::new(FakeRepository::new());
        let (mut registry, _) = registry(repository.clone());
        registry.select_model("en").unwrap();

        let err = registry.select_model("unparseable-tag").unwrap_err();
        assert!(matches!(err, RegistryError::ModelParse { .. }));
        assert_eq!(err.to_string(), "Failed to parse language 'unparseable-tag'");
        assert!(registry.active_model().is_none());

        assert!(matches!(
            registry.is_active_model_downloaded().await,
            Err(RegistryError::NoActiveModel)
        ));
        assert_eq!(repository.calls(), 0);
    }

    #[test]
    fn test_unknown_catalog_model() {
        let engine = Arc::new(ScriptedEngine::new());
        let catalog = [ModelIdentifier::from_language_tag("en").unwrap()];
        let mut registry = ModelRegistry::new(
            engine,
            Arc::new(FakeRepository::new()),
            Arc::new(LanguageTagParser::with_catalog(catalog)),
        );

        let err = registry.select_model("fr").unwrap_err();
        assert_eq!(err.to_string(), "No model for language: fr");
        assert!(registry.active_model().is_none());
    }

    #[tokio::test]
    async fn test_download_without_model_skips_repository() {
        let repository = Arc::new(FakeRepository::new());
        let (registry, _) = registry(repository.clone());

        assert_eq!(
            registry.download_active_model().await.unwrap(),
            MSG_MODEL_NOT_SELECTED
        );
        assert_eq!(repository.calls(), 0);
    }

    #[tokio::test]
    async fn test_download_uses_configured_conditions() {
        let repository = Arc::new(FakeRepository::new());
        let (registry, _) = registry(repository.clone());
        let conditions = DownloadConditions {
            require_wifi: true,
            require_charging: false,
        };
        let mut registry = registry.with_download_conditions(conditions);
        registry.select_model("en-US").unwrap();

        assert_eq!(registry.download_active_model().await.unwrap(), MSG_DOWNLOADED);
        assert!(registry.is_active_model_downloaded().await.unwrap());
        assert_eq!(repository.last_conditions(), Some(conditions));
    }

    #[tokio::test]
    async fn test_download_failure_is_surfaced() {
        let repository = Arc::new(FakeRepository::new());
        repository.fail_downloads.store(true, Ordering::SeqCst);
        let (mut registry, _) = registry(repository);
        registry.select_model("en").unwrap();

        let err = registry.download_active_model().await.unwrap_err();
        assert!(matches!(err, RegistryError::Repository(_)));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_delete_outcomes() {
        let repository = Arc::new(FakeRepository::with_downloaded(&["en"]));
        let (mut registry, _) = registry(repository.clone());

        assert_eq!(registry.delete_active_model().await.unwrap(), MSG_MODEL_NOT_SET);
        assert_eq!(repository.calls(), 0);

        registry.select_model("de").unwrap();
        assert_eq!(registry.delete_active_model().await.unwrap(), MSG_NOT_DOWNLOADED);

        registry.select_model("en").unwrap();
        assert_eq!(registry.delete_active_model().await.unwrap(), MSG_DELETED);
        assert!(!registry.is_active_model_downloaded().await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_failure_is_surfaced() {
        let repository = Arc::new(FakeRepository::with_downloaded(&["en"]));
        repository.fail_deletes.store(true, Ordering::SeqCst);
        let (mut registry, _) = registry(repository);
        registry.select_model("en").unwrap();

        assert!(matches!(
            registry.delete_active_model().await,
            Err(RegistryError::Repository(_))
        ));
    }

    #[tokio::test]
    async fn test_list_downloaded_languages() {
        let repository = Arc::new(FakeRepository::with_downloaded(&["en-US", "zxx-Zsye-x-emoji"]));
        let (registry, _) = registry(repository);

        let languages = registry.list_downloaded_model_languages().await.unwrap();
        assert_eq!(
            languages.into_iter().collect::<Vec<_>>(),
            vec!["en-US".to_string(), "zxx-Zsye-x-emoji".to_string()]
        );
    }
}
