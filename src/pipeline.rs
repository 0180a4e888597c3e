//! One generation run: preferences in, wallpaper out.
//!
//! Runs never overlap, inside one process or (with a run lock file) across processes.
//! A failed run leaves the store exactly as it found it: the new image path and history
//! entry are committed together in a single write.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::error::PipelineError;
use crate::images::generate_image;
use crate::lock::FileLock;
use crate::prompts::generate_prompts;
use crate::store::{self, HistoryEntry, Store, prepend_history, record_run};
use crate::wallpaper::WallpaperSetter;

/// What a caller gets back from a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    /// whether an image was produced and recorded
    pub success: bool,
    /// the produced image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// the prompt it was produced from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// why the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    fn succeeded(image_path: String, prompt: String) -> Self {
        Self {
            success: true,
            image_path: Some(image_path),
            prompt: Some(prompt),
            error: None,
        }
    }

    fn failed(err: &PipelineError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            ..Default::default()
        }
    }
}

/// Ties the generators, the store and the wallpaper setter together.
#[derive(Debug)]
pub struct Pipeline<S, W> {
    client: reqwest::Client,
    settings: Settings,
    store: S,
    wallpaper: W,
    in_flight: Mutex<()>,
    run_lock: Option<PathBuf>,
}

impl<S: Store, W: WallpaperSetter> Pipeline<S, W> {
    /// Builds a pipeline with its own HTTP client.
    pub fn new(settings: Settings, store: S, wallpaper: W) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
            store,
            wallpaper,
            in_flight: Mutex::new(()),
            run_lock: None,
        }
    }

    /// Also refuse to run while another process holds the lock file at `path`.
    pub fn with_run_lock(mut self, path: PathBuf) -> Self {
        self.run_lock = Some(path);
        self
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The wallpaper setter.
    pub fn wallpaper(&self) -> &W {
        &self.wallpaper
    }

    /// The settings runs use.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Produces a new image, applies it and records it.
    ///
    /// Called from both the scheduler and manual triggers. If a run is already going this
    /// one is turned away rather than queued.
    pub async fn run_generation(&self) -> PipelineResult {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("Ignoring generation request, a run is already in progress");
            return PipelineResult::failed(&PipelineError::Busy);
        };
        let _run_lock = match &self.run_lock {
            Some(path) => match FileLock::try_acquire(path).await {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => {
                    warn!("Ignoring generation request, another process is generating");
                    return PipelineResult::failed(&PipelineError::Busy);
                }
                Err(err) => {
                    error!("Could not take the run lock {}: {err}", path.display());
                    return PipelineResult::failed(&err);
                }
            },
            None => None,
        };

        match self.run_locked().await {
            Ok((image_path, prompt)) => PipelineResult::succeeded(image_path, prompt),
            Err(err) => {
                error!("Error generating affirmation: {err}");
                PipelineResult::failed(&err)
            }
        }
    }

    async fn run_locked(&self) -> Result<(String, String), PipelineError> {
        let preferences = store::load_preferences(&self.store).await?;
        // read up front so a broken history fails the run before anything is written
        let history = store::history(&self.store).await?;

        info!("Generating affirmation prompts...");
        let prompts = generate_prompts(
            &self.client,
            &self.settings,
            &preferences.goals,
            &preferences.areas,
        )
        .await?;
        let prompt = prompts.into_iter().next().ok_or_else(|| {
            PipelineError::Configuration("prompt generation returned no prompts".to_string())
        })?;

        info!("Generating image with affirmation...");
        let artifact = generate_image(&self.client, &self.settings, &prompt).await?;
        let image_path = artifact.path.to_string_lossy().to_string();

        let history = prepend_history(
            history,
            HistoryEntry::now(image_path.clone(), prompt.clone()),
        );
        if let Err(err) = record_run(&self.store, &image_path, &history).await {
            if let Err(remove_err) = tokio::fs::remove_file(&artifact.path).await {
                warn!("Could not remove unrecorded image {image_path}: {remove_err}");
            }
            return Err(err);
        }

        info!("Setting as wallpaper...");
        if !self.wallpaper.set_wallpaper(&artifact.path).await {
            warn!("Wallpaper could not be applied, keeping the generated image anyway");
        }

        info!("Affirmation generated: {image_path}");
        Ok((image_path, prompt))
    }

    /// Re-applies the stored current image. Returns whether anything was applied.
    pub async fn apply_current_wallpaper(&self) -> Result<bool, PipelineError> {
        match store::current_image_path(&self.store).await? {
            Some(path) => Ok(self.wallpaper.set_wallpaper(Path::new(&path)).await),
            None => {
                info!("No wallpaper image available yet");
                Ok(false)
            }
        }
    }
}
