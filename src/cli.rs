//! CLI parser
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use crate::config::{FallbackPolicy, Settings};
use crate::constants::{
    DEFAULT_ENDPOINT, DEFAULT_IMAGE_MODEL, DEFAULT_REQUEST_TIMEOUT_SECONDS, DEFAULT_TEXT_MODEL,
    STORE_FILE_NAME,
};
use crate::error::PipelineError;

#[derive(Parser, Debug)]
#[command(name = "affirmwall")]
/// CLI Options
pub struct CliOptions {
    #[clap(long, help = "Enable debug logging", env = "AFFIRMWALL_DEBUG")]
    /// Enable debug logging. Env: AFFIRMWALL_DEBUG
    pub debug: bool,

    #[clap(long, default_value = "./affirmwall-data", env = "AFFIRMWALL_DATA_DIR")]
    /// Holds the store and the generated images, defaults to `./affirmwall-data`.
    /// Env: AFFIRMWALL_DATA_DIR
    pub data_dir: PathBuf,

    #[clap(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    /// API key for the text and image endpoints. Env: OPENROUTER_API_KEY
    pub openrouter_api_key: Option<String>,

    #[clap(long, default_value = DEFAULT_TEXT_MODEL, env = "AFFIRMWALL_TEXT_MODEL")]
    /// Model that writes the affirmation prompts
    pub text_model: String,

    #[clap(long, default_value = DEFAULT_IMAGE_MODEL, env = "AFFIRMWALL_IMAGE_MODEL")]
    /// Model that renders the wallpaper
    pub image_model: String,

    #[clap(long, default_value = DEFAULT_ENDPOINT, env = "AFFIRMWALL_TEXT_ENDPOINT")]
    /// Chat completions endpoint for prompts
    pub text_endpoint: Url,

    #[clap(long, default_value = DEFAULT_ENDPOINT, env = "AFFIRMWALL_IMAGE_ENDPOINT")]
    /// Chat completions endpoint for images
    pub image_endpoint: Url,

    #[clap(long, value_enum, default_value_t = FallbackPolicy::Surface, env = "AFFIRMWALL_FALLBACK")]
    /// What to do when the image provider can't be reached: `surface` the error or
    /// render a local `placeholder`.
    pub fallback: FallbackPolicy,

    #[clap(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECONDS, env = "AFFIRMWALL_REQUEST_TIMEOUT_SECS")]
    /// Per-attempt request timeout, in seconds
    pub request_timeout_secs: u64,

    #[clap(long, env = "AFFIRMWALL_NO_WALLPAPER")]
    /// Generate images without touching the desktop. Env: AFFIRMWALL_NO_WALLPAPER
    pub no_wallpaper: bool,

    #[command(subcommand)]
    /// What to do
    pub command: Command,
}

#[derive(Subcommand, Debug)]
/// Subcommands
pub enum Command {
    /// Save goals, areas and a schedule, then generate the first wallpaper
    Onboard {
        #[clap(long = "goal", required = true)]
        /// A personal goal, repeat for more
        goals: Vec<String>,
        #[clap(long = "area", required = true)]
        /// A confidence area to improve, repeat for more
        areas: Vec<String>,
        #[clap(long, default_value = crate::constants::DEFAULT_SCHEDULE)]
        /// Cron expression for scheduled runs
        schedule: String,
    },
    /// Generate a new wallpaper now
    Generate,
    /// Apply the current wallpaper again
    Apply,
    /// Show stored preferences and schedule
    Settings,
    /// Change the generation schedule, a running `affirmwall run` re-arms within a minute
    Schedule {
        /// Cron expression, eg `0 6 * * *`
        expression: String,
    },
    /// List past wallpapers, newest first
    History,
    /// Run in the background, generating on the stored schedule
    Run,
}

impl CliOptions {
    /// Where the JSON store lives.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE_NAME)
    }

    /// Turns the options into generator settings.
    pub fn settings(&self) -> Result<Settings, PipelineError> {
        let mut settings = Settings::new(self.openrouter_api_key.clone(), &self.data_dir)?;
        settings.text_endpoint = self.text_endpoint.clone();
        settings.text_model = self.text_model.clone();
        settings.image_endpoint = self.image_endpoint.clone();
        settings.image_model = self.image_model.clone();
        settings.request_timeout = Duration::from_secs(self.request_timeout_secs);
        settings.fallback = self.fallback;
        Ok(settings)
    }
}
