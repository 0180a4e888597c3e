//! Error handling

use reqwest::StatusCode;

/// Failures raised while producing an affirmation wallpaper.
#[derive(Debug)]
pub enum PipelineError {
    /// A deployment defect, such as a missing API credential
    Configuration(String),
    /// The provider kept answering 429 until attempts ran out
    RateLimited {
        /// how many attempts were made
        attempts: u32,
    },
    /// A 4xx response other than 429
    Client {
        /// response status
        status: StatusCode,
        /// response body, for diagnostics
        body: String,
    },
    /// A 5xx response
    Server {
        /// response status
        status: StatusCode,
        /// response body, for diagnostics
        body: String,
    },
    /// Timeout, refused connection, or a broken body
    Transport(String),
    /// 2xx but nothing in the body could be turned into image bytes
    ResponseShape {
        /// normalization strategies that were attempted, in order
        tried: Vec<&'static str>,
        /// extra context, eg a JSON parse failure
        detail: Option<String>,
    },
    /// Filesystem failures
    Io(std::io::Error),
    /// The persisted store could not be read or written
    Store(String),
    /// An invalid cron expression
    Schedule(String),
    /// Another generation run holds the in-flight guard
    Busy,
}

impl PipelineError {
    /// Errors worth another attempt inside the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Server { .. } | Self::Transport(_)
        )
    }

    /// Errors meaning the provider could not be reached or refused us, as opposed to
    /// answering with something malformed. Only these may be papered over with a
    /// local placeholder image.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Client { .. }
                | Self::Server { .. }
                | Self::Transport(_)
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "Configuration error: {message}"),
            Self::RateLimited { attempts } => {
                write!(f, "Rate limited by provider after {attempts} attempts")
            }
            Self::Client { status, body } => write!(f, "Provider rejected request {status}: {body}"),
            Self::Server { status, body } => write!(f, "Provider error {status}: {body}"),
            Self::Transport(message) => write!(f, "Transport error: {message}"),
            Self::ResponseShape { tried, detail } => {
                write!(f, "No image data in response (tried {})", tried.join(", "))?;
                if let Some(detail) = detail {
                    write!(f, ": {detail}")?;
                }
                Ok(())
            }
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Store(message) => write!(f, "Store error: {message}"),
            Self::Schedule(message) => write!(f, "Invalid schedule: {message}"),
            Self::Busy => write!(f, "A generation run is already in progress"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Store(err.to_string())
    }
}
