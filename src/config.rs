//! Config handling

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use tracing::log::LevelFilter;
use url::Url;

use crate::constants::{
    DEFAULT_ENDPOINT, DEFAULT_IMAGE_MODEL, DEFAULT_REQUEST_TIMEOUT_SECONDS, DEFAULT_TEXT_MODEL,
    IMAGES_DIR_NAME,
};
use crate::error::PipelineError;

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// What the image generator does when the provider can't be reached.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum FallbackPolicy {
    /// Return the error to the caller, nothing is written.
    #[default]
    Surface,
    /// Render a local SVG placeholder instead.
    Placeholder,
}

/// Everything the generators need to talk to the providers and write files.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Bearer credential for both endpoints
    pub api_key: Option<String>,
    /// Chat endpoint used to write prompts
    pub text_endpoint: Url,
    /// Model used to write prompts
    pub text_model: String,
    /// Chat endpoint used to render images
    pub image_endpoint: Url,
    /// Model used to render images
    pub image_model: String,
    /// Absolute directory generated images are written to
    pub images_dir: PathBuf,
    /// Per-attempt request timeout
    pub request_timeout: Duration,
    /// Placeholder-or-error choice for unreachable providers
    pub fallback: FallbackPolicy,
}

impl Settings {
    /// Defaults against the public endpoint, writing images below `data_dir`.
    pub fn new(api_key: Option<String>, data_dir: &Path) -> Result<Self, PipelineError> {
        let endpoint = Url::parse(DEFAULT_ENDPOINT)
            .map_err(|err| PipelineError::Configuration(err.to_string()))?;
        Ok(Self {
            api_key,
            text_endpoint: endpoint.clone(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_endpoint: endpoint,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            images_dir: std::path::absolute(data_dir.join(IMAGES_DIR_NAME))?,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECONDS),
            fallback: FallbackPolicy::default(),
        })
    }

    /// Returns the credential, or the one error that is allowed out of the prompt generator.
    pub fn api_key(&self) -> Result<&str, PipelineError> {
        self.api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration("OPENROUTER_API_KEY is not set".to_string())
            })
    }
}
