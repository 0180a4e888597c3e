//! Local placeholder wallpaper: the affirmation in white over a purple gradient.

use std::path::Path;

use tracing::info;

use crate::constants::{DEFAULT_AFFIRMATION, FALLBACK_HEIGHT, FALLBACK_WIDTH};
use crate::error::PipelineError;
use crate::images::{ArtifactFormat, ImageArtifact, write_artifact};

/// The affirmation half of a `"<text>: <scene>"` prompt.
pub fn affirmation_text(prompt: &str) -> &str {
    prompt
        .split_once(':')
        .map(|(text, _)| text.trim())
        .filter(|text| !text.is_empty())
        .unwrap_or(DEFAULT_AFFIRMATION)
}

/// Builds the placeholder SVG document for `text`.
pub fn render_svg(text: &str) -> String {
    format!(
        r##"<svg width="{width}" height="{height}" viewBox="0 0 {width} {height}" xmlns="http://www.w3.org/2000/svg">
  <defs>
    <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
      <stop offset="0%" stop-color="#667eea" stop-opacity="1" />
      <stop offset="100%" stop-color="#764ba2" stop-opacity="1" />
    </linearGradient>
  </defs>
  <rect width="{width}" height="{height}" fill="url(#grad)" />
  <text x="50%" y="50%" font-family="Arial, sans-serif" font-size="72" font-weight="bold" fill="white" text-anchor="middle" dominant-baseline="middle">{text}</text>
</svg>
"##,
        width = FALLBACK_WIDTH,
        height = FALLBACK_HEIGHT,
        text = html_escape::encode_text(text),
    )
}

/// Writes a placeholder for `prompt` as `affirmation-fallback-<unix-ms>.svg`.
pub async fn render_fallback(prompt: &str, images_dir: &Path) -> Result<ImageArtifact, PipelineError> {
    let svg = render_svg(affirmation_text(prompt));
    let artifact = write_artifact(
        images_dir,
        "affirmation-fallback",
        ArtifactFormat::Svg,
        svg.into_bytes(),
    )
    .await?;
    info!("Fallback image created: {}", artifact.path.display());
    Ok(artifact)
}
