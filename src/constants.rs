//! Shared constants for things
//!

use std::time::Duration;

/// Default chat-completions endpoint used for both text and image generation.
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used to write the affirmation prompts
pub const DEFAULT_TEXT_MODEL: &str = "openai/gpt-4.1-mini";

/// Model used to render the wallpaper
pub const DEFAULT_IMAGE_MODEL: &str = "google/gemini-2.5-flash-image-preview";

/// Aspect ratio hint sent with every image request, wallpapers are widescreen.
pub const WALLPAPER_ASPECT_RATIO: &str = "16:9";

/// Sent as `HTTP-Referer` so the provider can attribute requests.
pub const APP_REFERER: &str = "https://github.com/affirmwall/affirmwall";

/// Sent as `X-Title`.
pub const APP_TITLE: &str = "Affirmation Screensaver";

/// Cron expression used until the user picks one: every day at 06:00.
pub const DEFAULT_SCHEDULE: &str = "0 6 * * *";

/// Max entries kept in the image history.
pub const HISTORY_LIMIT: usize = 30;

/// Total attempts made against the image endpoint.
pub const IMAGE_MAX_ATTEMPTS: u32 = 3;

/// Base unit of the rate-limit backoff, doubled per attempt.
pub const BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Upper bound (exclusive) of the random jitter added to each backoff.
pub const BACKOFF_JITTER_MS: u64 = 1000;

/// Per-attempt timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Subdirectory of the data directory holding generated images.
pub const IMAGES_DIR_NAME: &str = "generated-images";

/// File name of the JSON store inside the data directory.
pub const STORE_FILE_NAME: &str = "store.json";

/// Lock file, inside the data directory, held for the length of a generation run.
pub const RUN_LOCK_FILE_NAME: &str = "generation.lock";

/// How often the daemon checks the store for a changed schedule.
pub const SCHEDULE_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Affirmation used by the placeholder renderer when the prompt has no colon.
pub const DEFAULT_AFFIRMATION: &str = "I Am Confident";

/// Placeholder canvas size.
pub const FALLBACK_WIDTH: u32 = 1920;
/// Placeholder canvas size.
pub const FALLBACK_HEIGHT: u32 = 1080;
