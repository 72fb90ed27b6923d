use inkscribe::{
    CommandEngine, Config, LanguageTagParser, LocalModelRepository, ModelCategory,
    ModelRegistry, Notification, Orchestrator, OrchestratorHandle, TouchEvent,
};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// One line of input from the editor driving this process
#[derive(Debug, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
enum Request {
    Touch(TouchEvent),
    Recognize,
    Reset,
    SelectModel { tag: String },
    Download,
    Delete,
    IsDownloaded,
    Refresh,
    Session,
    ListModels,
    SetClearAfterRecognition { enabled: bool },
    SetTriggerAfterInput { enabled: bool },
    Quit,
}

#[derive(Debug, Serialize)]
struct Response {
    response: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl Response {
    fn message(response: &'static str, result: Result<String, impl std::fmt::Display>) -> Self {
        match result {
            Ok(message) => Self {
                response,
                ok: true,
                message: Some(message),
                data: None,
            },
            Err(e) => Self::error(response, e),
        }
    }

    fn data(response: &'static str, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                response,
                ok: true,
                message: None,
                data: Some(value),
            },
            Err(e) => Self::error(response, e),
        }
    }

    fn error(response: &'static str, e: impl std::fmt::Display) -> Self {
        Self {
            response,
            ok: false,
            message: Some(e.to_string()),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct CatalogEntry {
    tag: String,
    label: String,
    category: ModelCategory,
    downloaded: bool,
}

fn emit(value: &impl Serialize) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::error!("Failed to serialize output: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the notification stream
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    tracing::info!("Starting inkscribe");

    let config = Config::load()?;
    config.validate()?;

    run_app(config).await
}

async fn run_app(config: Config) -> Result<()> {
    let models_dir = config.models_dir()?;
    let catalog = config.catalog()?;

    let engine = Arc::new(CommandEngine::new(
        config.recognizer_command.clone(),
        models_dir.clone(),
    ));
    let repository = Arc::new(LocalModelRepository::new(
        models_dir,
        config.download_command.clone(),
    ));
    let parser = if catalog.is_empty() {
        LanguageTagParser::new()
    } else {
        LanguageTagParser::with_catalog(catalog.clone())
    };

    let registry = ModelRegistry::new(engine, repository, Arc::new(parser))
        .with_download_conditions(config.download_conditions());
    let (orchestrator, handle) = Orchestrator::new(
        registry,
        config.recognition_settings(),
        config.notification_capacity,
    );
    let mut notifications = handle.subscribe();
    tokio::spawn(orchestrator.run());

    if let Some(tag) = &config.default_model {
        if let Err(e) = handle.set_active_model(tag).await {
            tracing::warn!("Failed to select default model {}: {}", tag, e);
        }
    }
    handle.refresh_downloaded_models_status().await?;

    let mut downloaded: BTreeSet<String> = BTreeSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("Ready, reading requests from stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match serde_json::from_str::<Request>(&line) {
                    Ok(Request::Quit) => break,
                    Ok(request) => {
                        if let Err(e) = handle_request(&handle, request, &catalog, &downloaded).await {
                            tracing::error!("Error handling request: {}", e);
                        }
                    }
                    Err(e) => emit(&Response::error("invalid_request", e)),
                },
                Ok(None) => {
                    tracing::info!("stdin closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to read stdin: {}", e);
                    break;
                }
            },
            event = notifications.recv() => match event {
                Ok(notification) => {
                    if let Notification::DownloadedModelsChanged { language_tags } = &notification {
                        downloaded = language_tags.clone();
                    }
                    emit(&notification);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} notifications", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        tracing::debug!("Orchestrator already stopped: {}", e);
    }
    tracing::info!("inkscribe shutdown complete");
    Ok(())
}

async fn handle_request(
    handle: &OrchestratorHandle,
    request: Request,
    catalog: &[inkscribe::ModelIdentifier],
    downloaded: &BTreeSet<String>,
) -> Result<()> {
    tracing::debug!("Request: {:?}", request);

    match request {
        Request::Touch(event) => handle.add_touch_event(event).await?,
        Request::Recognize => handle.recognize().await?,
        Request::Reset => handle.reset().await?,
        Request::Refresh => handle.refresh_downloaded_models_status().await?,
        Request::SetClearAfterRecognition { enabled } => {
            handle.set_clear_current_ink_after_recognition(enabled).await?
        }
        Request::SetTriggerAfterInput { enabled } => {
            handle.set_trigger_recognition_after_input(enabled).await?
        }
        Request::SelectModel { tag } => {
            let result = handle.set_active_model(&tag).await;
            emit(&Response::message("select_model", result));
        }
        // model operations can take a while, keep reading input meanwhile
        Request::Download => {
            let handle = handle.clone();
            tokio::spawn(async move {
                emit(&Response::message("download", handle.download().await));
            });
        }
        Request::Delete => {
            let handle = handle.clone();
            tokio::spawn(async move {
                emit(&Response::message("delete", handle.delete_active_model().await));
            });
        }
        Request::IsDownloaded => {
            let handle = handle.clone();
            tokio::spawn(async move {
                let response = match handle.is_active_model_downloaded().await {
                    Ok(downloaded) => Response::data("is_downloaded", downloaded),
                    Err(e) => Response::error("is_downloaded", e),
                };
                emit(&response);
            });
        }
        Request::Session => {
            let session = handle.session().await?;
            emit(&Response::data("session", session));
        }
        Request::ListModels => {
            let entries: Vec<CatalogEntry> = catalog
                .iter()
                .map(|model| CatalogEntry {
                    tag: model.language_tag().to_string(),
                    label: model.label(),
                    category: model.category(),
                    downloaded: downloaded.contains(model.language_tag()),
                })
                .collect();
            emit(&Response::data("list_models", entries));
        }
        Request::Quit => {}
    }

    Ok(())
}
