use crate::model::{DownloadConditions, ModelIdentifier};
use crate::services::RecognitionSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_clear_after_recognition")]
    pub clear_current_ink_after_recognition: bool,

    #[serde(default)]
    pub trigger_recognition_after_input: bool,

    #[serde(default)]
    pub default_model: Option<String>,

    /// Known model tags; empty means any well-formed tag is accepted
    #[serde(default)]
    pub available_models: Vec<String>,

    #[serde(default)]
    pub models_dir: Option<PathBuf>,

    #[serde(default = "default_recognizer_command")]
    pub recognizer_command: String,

    #[serde(default)]
    pub download_command: Option<String>,

    #[serde(default)]
    pub download_requires_wifi: bool,

    #[serde(default)]
    pub download_requires_charging: bool,

    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
}

fn default_clear_after_recognition() -> bool {
    true
}

fn default_recognizer_command() -> String {
    "inkscribe-recognize".to_string()
}

fn default_notification_capacity() -> usize {
    64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clear_current_ink_after_recognition: default_clear_after_recognition(),
            trigger_recognition_after_input: false,
            default_model: None,
            available_models: Vec::new(),
            models_dir: None,
            recognizer_command: default_recognizer_command(),
            download_command: None,
            download_requires_wifi: false,
            download_requires_charging: false,
            notification_capacity: default_notification_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/inkscribe/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        Ok(xdg_dir("XDG_CONFIG_HOME", ".config")?
            .join("inkscribe")
            .join("config.json"))
    }

    /// Directory holding installed models
    pub fn models_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(xdg_dir("XDG_DATA_HOME", ".local/share")?
                .join("inkscribe")
                .join("models")),
        }
    }

    pub fn recognition_settings(&self) -> RecognitionSettings {
        RecognitionSettings {
            clear_current_ink_after_recognition: self.clear_current_ink_after_recognition,
            trigger_recognition_after_input: self.trigger_recognition_after_input,
        }
    }

    pub fn download_conditions(&self) -> DownloadConditions {
        DownloadConditions {
            require_wifi: self.download_requires_wifi,
            require_charging: self.download_requires_charging,
        }
    }

    /// Parsed `available_models`
    pub fn catalog(&self) -> Result<Vec<ModelIdentifier>> {
        self.available_models
            .iter()
            .map(|tag| {
                ModelIdentifier::from_language_tag(tag)
                    .with_context(|| format!("Invalid entry in available_models: {}", tag))
            })
            .collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.recognizer_command.trim().is_empty() {
            return Err(anyhow::anyhow!("recognizer_command cannot be empty"));
        }

        if self.notification_capacity == 0 {
            return Err(anyhow::anyhow!("notification_capacity must be at least 1"));
        }

        let catalog = self.catalog()?;

        if let Some(tag) = &self.default_model {
            let model = ModelIdentifier::from_language_tag(tag)
                .with_context(|| format!("Invalid default_model: {}", tag))?;
            if !catalog.is_empty() && !catalog.contains(&model) {
                return Err(anyhow::anyhow!(
                    "default_model {} is not listed in available_models",
                    tag
                ));
            }
        }

        Ok(())
    }
}

fn xdg_dir(var: &str, home_fallback: &str) -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(var) {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(home_fallback))
}
