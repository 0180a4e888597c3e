//! Applying an image as the desktop wallpaper.

use std::future::Future;
use std::path::Path;

use tracing::{error, info, warn};

/// Anything that can put an image on the desktop. Returns whether it worked.
pub trait WallpaperSetter: Send + Sync {
    /// Applies the image at the absolute `path`.
    fn set_wallpaper(&self, path: &Path) -> impl Future<Output = bool> + Send;
}

/// Uses the operating system's wallpaper API.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemWallpaper;

impl WallpaperSetter for SystemWallpaper {
    async fn set_wallpaper(&self, path: &Path) -> bool {
        let absolute = match std::path::absolute(path) {
            Ok(absolute) => absolute,
            Err(err) => {
                error!("Could not resolve wallpaper path {}: {err}", path.display());
                return false;
            }
        };
        info!("Setting wallpaper to: {}", absolute.display());

        let result = tokio::task::spawn_blocking(move || apply(&absolute)).await;
        match result {
            Ok(Ok(())) => {
                info!("Wallpaper set successfully");
                true
            }
            Ok(Err(message)) => {
                error!("Error setting wallpaper: {message}");
                false
            }
            Err(err) => {
                error!("Wallpaper task failed: {err}");
                false
            }
        }
    }
}

fn apply(path: &Path) -> Result<(), String> {
    let path_str = path
        .to_str()
        .ok_or_else(|| format!("{} is not valid UTF-8", path.display()))?;
    apply_with(
        || wallpaper::set_from_path(path_str).map_err(|err| err.to_string()),
        || wallpaper::set_mode(wallpaper::Mode::Crop).map_err(|err| err.to_string()),
    )
}

/// Sets the image, then the fit mode. The image being set is what counts.
fn apply_with(
    set_image: impl FnOnce() -> Result<(), String>,
    set_mode: impl FnOnce() -> Result<(), String>,
) -> Result<(), String> {
    set_image()?;
    if let Err(message) = set_mode() {
        warn!("Wallpaper applied but the crop mode could not be set: {message}");
    }
    Ok(())
}

/// Never touches the desktop, for headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledWallpaper;

impl WallpaperSetter for DisabledWallpaper {
    async fn set_wallpaper(&self, path: &Path) -> bool {
        info!(
            "Wallpaper updates are disabled, not applying {}",
            path.display()
        );
        false
    }
}

/// Picks the setter based on the `--no-wallpaper` flag.
#[derive(Clone, Copy, Debug)]
pub enum Wallpaper {
    /// operating system setter
    System(SystemWallpaper),
    /// no-op setter
    Disabled(DisabledWallpaper),
}

impl Wallpaper {
    /// The system setter, or the no-op one when `disabled`.
    pub fn new(disabled: bool) -> Self {
        if disabled {
            Self::Disabled(DisabledWallpaper)
        } else {
            Self::System(SystemWallpaper)
        }
    }
}

impl WallpaperSetter for Wallpaper {
    async fn set_wallpaper(&self, path: &Path) -> bool {
        match self {
            Self::System(setter) => setter.set_wallpaper(path).await,
            Self::Disabled(setter) => setter.set_wallpaper(path).await,
        }
    }
}
