//! Image generation against a chat-completions style image model.
//!
//! A request is tried up to [`IMAGE_MAX_ATTEMPTS`] times. Rate limiting backs off
//! exponentially with jitter, transport and 5xx failures retry straight away, any other
//! 4xx stops immediately.

pub mod normalize;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{FallbackPolicy, Settings};
use crate::constants::{
    BACKOFF_BASE, BACKOFF_JITTER_MS, IMAGE_MAX_ATTEMPTS, WALLPAPER_ASPECT_RATIO,
};
use crate::error::PipelineError;
use crate::fallback::render_fallback;
use crate::prompts::ChatMessage;

/// File types we write into the images directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactFormat {
    /// Remote-rendered image
    Png,
    /// Local placeholder
    Svg,
}

impl ArtifactFormat {
    /// File extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Svg => "svg",
        }
    }
}

/// A generated image that has been written to disk.
#[derive(Clone, Debug)]
pub struct ImageArtifact {
    /// absolute path of the written file
    pub path: PathBuf,
    /// exactly what was written
    pub bytes: Vec<u8>,
    /// png or svg
    pub format: ArtifactFormat,
}

/// Request body for the image model
#[derive(Serialize, Debug)]
struct ImageRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    modalities: [&'a str; 2],
    image_config: ImageConfig<'a>,
}

#[derive(Serialize, Debug)]
struct ImageConfig<'a> {
    aspect_ratio: &'a str,
}

/// Tracks where a single generation call is in its retry budget.
#[derive(Debug, Default)]
struct GenerationAttempt {
    number: u32,
    last_error: Option<PipelineError>,
}

/// How long to wait before retrying after the `attempt`th (zero-indexed) 429.
pub fn backoff_delay(attempt: u32, jitter: Duration) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt) + jitter
}

fn random_jitter() -> Duration {
    Duration::from_millis(rand::random_range(0..BACKOFF_JITTER_MS))
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Writes `bytes` into the freshly created file at `path`, removing it again if the write
/// fails part way.
async fn fill_artifact<W: AsyncWrite + Unpin>(
    mut file: W,
    path: &Path,
    bytes: &[u8],
) -> Result<(), PipelineError> {
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if let Err(err) = written {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(path).await {
            warn!("Could not remove partial image {}: {remove_err}", path.display());
        }
        return Err(err.into());
    }
    Ok(())
}

/// Writes `bytes` to `<dir>/<prefix>-<unix-ms>.<ext>`, creating `dir` if needed.
///
/// Never overwrites: if the name is taken the timestamp is bumped until it isn't.
pub async fn write_artifact(
    dir: &Path,
    prefix: &str,
    format: ArtifactFormat,
    bytes: Vec<u8>,
) -> Result<ImageArtifact, PipelineError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut timestamp = now_millis();
    loop {
        let path = dir.join(format!("{prefix}-{timestamp}.{}", format.extension()));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => {
                fill_artifact(file, &path, &bytes).await?;
                return Ok(ImageArtifact {
                    path,
                    bytes,
                    format,
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => timestamp += 1,
            Err(err) => return Err(err.into()),
        }
    }
}

fn status_error(status: StatusCode, attempt: u32, body: &[u8]) -> PipelineError {
    let body = String::from_utf8_lossy(body).to_string();
    if status == StatusCode::TOO_MANY_REQUESTS {
        PipelineError::RateLimited {
            attempts: attempt + 1,
        }
    } else if status.is_client_error() {
        PipelineError::Client { status, body }
    } else {
        PipelineError::Server { status, body }
    }
}

fn transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_builder() {
        PipelineError::Configuration(format!("Could not build image request: {err}"))
    } else {
        PipelineError::Transport(err.to_string())
    }
}

async fn send_once(
    client: &reqwest::Client,
    settings: &Settings,
    api_key: &str,
    req_body: &ImageRequest<'_>,
    attempt: u32,
) -> Result<Vec<u8>, PipelineError> {
    let resp = client
        .post(settings.image_endpoint.clone())
        .bearer_auth(api_key)
        .timeout(settings.request_timeout)
        .json(req_body)
        .send()
        .await
        .map_err(transport_error)?;

    let status = resp.status();
    let bytes = resp.bytes().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(status_error(status, attempt, &bytes));
    }
    Ok(bytes.to_vec())
}

/// Posts the prompt to the image model, retrying within the attempt budget, and returns
/// the body of the first successful response.
async fn request_image(
    client: &reqwest::Client,
    settings: &Settings,
    prompt: &str,
) -> Result<Vec<u8>, PipelineError> {
    let api_key = settings.api_key()?;
    let req_body = ImageRequest {
        model: &settings.image_model,
        messages: [ChatMessage {
            role: "user",
            content: prompt,
        }],
        modalities: ["image", "text"],
        image_config: ImageConfig {
            aspect_ratio: WALLPAPER_ASPECT_RATIO,
        },
    };

    let mut attempt = GenerationAttempt::default();
    while attempt.number < IMAGE_MAX_ATTEMPTS {
        match send_once(client, settings, api_key, &req_body, attempt.number).await {
            Ok(body) => return Ok(body),
            Err(err) => {
                let is_last = attempt.number + 1 >= IMAGE_MAX_ATTEMPTS;
                if !err.is_transient() || is_last {
                    return Err(err);
                }
                if matches!(err, PipelineError::RateLimited { .. }) {
                    let delay = backoff_delay(attempt.number, random_jitter());
                    warn!(
                        "Image request rate limited (attempt {}/{IMAGE_MAX_ATTEMPTS}), retrying in {}ms",
                        attempt.number + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(
                        "Image request failed (attempt {}/{IMAGE_MAX_ATTEMPTS}), retrying: {err}",
                        attempt.number + 1
                    );
                }
                attempt.last_error = Some(err);
                attempt.number += 1;
            }
        }
    }

    Err(attempt.last_error.unwrap_or(PipelineError::RateLimited {
        attempts: IMAGE_MAX_ATTEMPTS,
    }))
}

async fn generate_remote(
    client: &reqwest::Client,
    settings: &Settings,
    prompt: &str,
) -> Result<ImageArtifact, PipelineError> {
    let body = request_image(client, settings, prompt).await?;
    let image = normalize::extract_image(client, settings.request_timeout, &body).await?;

    match image::guess_format(&image.bytes) {
        Ok(image::ImageFormat::Png) => {}
        Ok(other) => warn!("Provider returned {other:?} rather than PNG, saving it anyway"),
        Err(err) => warn!("Could not recognise the returned image format: {err}"),
    }

    let artifact = write_artifact(
        &settings.images_dir,
        "affirmation",
        ArtifactFormat::Png,
        image.bytes,
    )
    .await?;
    info!(
        "Image saved to {} (found via {})",
        artifact.path.display(),
        image.strategy
    );
    Ok(artifact)
}

/// Renders `prompt` into a new file in the images directory.
///
/// When the provider can't be reached and the settings ask for it, a local placeholder is
/// rendered instead; otherwise the failure is returned. Malformed responses and
/// configuration problems are always returned.
pub async fn generate_image(
    client: &reqwest::Client,
    settings: &Settings,
    prompt: &str,
) -> Result<ImageArtifact, PipelineError> {
    debug!("Generating image for prompt: {prompt}");
    match generate_remote(client, settings, prompt).await {
        Ok(artifact) => Ok(artifact),
        Err(err) if settings.fallback == FallbackPolicy::Placeholder && err.is_unreachable() => {
            warn!("Image generation failed, rendering a placeholder instead: {err}");
            render_fallback(prompt, &settings.images_dir).await
        }
        Err(err) => Err(err),
    }
}
