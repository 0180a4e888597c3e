//! Persisted key-value store for preferences, the schedule and generation history.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::constants::{DEFAULT_SCHEDULE, HISTORY_LIMIT};
use crate::error::PipelineError;
use crate::lock::{FileLock, lock_path_for};

/// The keys the store knows about.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum StoreKey {
    /// What the user is working towards
    UserGoals,
    /// Where the user wants more confidence
    ConfidenceAreas,
    /// Cron expression for scheduled runs
    GenerationSchedule,
    /// Path of the image last produced
    CurrentImagePath,
    /// Past runs, newest first
    ImageHistory,
    /// Set once onboarding has been saved
    OnboardingComplete,
}

impl StoreKey {
    /// Name used in the persisted document.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserGoals => "userGoals",
            Self::ConfidenceAreas => "confidenceAreas",
            Self::GenerationSchedule => "generationSchedule",
            Self::CurrentImagePath => "currentImagePath",
            Self::ImageHistory => "imageHistory",
            Self::OnboardingComplete => "onboardingComplete",
        }
    }
}

/// What the user told us about themselves.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// personal goals
    pub goals: Vec<String>,
    /// confidence areas to improve
    pub areas: Vec<String>,
}

/// One past generation run. Never modified once written.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// image file that was produced
    pub path: String,
    /// prompt it was produced from
    pub prompt: String,
    /// RFC 3339 / ISO-8601 time of the run
    pub timestamp: String,
}

impl HistoryEntry {
    /// Creates an entry stamped with the current time.
    pub fn now(path: String, prompt: String) -> Self {
        Self {
            path,
            prompt,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Places `entry` at the front of `history`, dropping the oldest beyond [`HISTORY_LIMIT`].
pub fn prepend_history(mut history: Vec<HistoryEntry>, entry: HistoryEntry) -> Vec<HistoryEntry> {
    history.insert(0, entry);
    history.truncate(HISTORY_LIMIT);
    history
}

/// Async key-value persistence.
pub trait Store: Send + Sync {
    /// Reads a key, `None` when it has never been set.
    fn get(&self, key: StoreKey)
    -> impl Future<Output = Result<Option<Value>, PipelineError>> + Send;

    /// Replaces several keys at once. Either every value is stored or none is.
    fn set_many(
        &self,
        values: Vec<(StoreKey, Value)>,
    ) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Replaces the value of a key.
    fn set(&self, key: StoreKey, value: Value)
    -> impl Future<Output = Result<(), PipelineError>> + Send {
        self.set_many(vec![(key, value)])
    }
}

async fn get_typed<S: Store, T: DeserializeOwned>(
    store: &S,
    key: StoreKey,
) -> Result<Option<T>, PipelineError> {
    match store.get(key).await? {
        Some(Value::Null) | None => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|err| PipelineError::Store(format!("{} is malformed: {err}", key.as_str()))),
    }
}

async fn set_typed<S: Store, T: Serialize>(
    store: &S,
    key: StoreKey,
    value: &T,
) -> Result<(), PipelineError> {
    store.set(key, serde_json::to_value(value)?).await
}

/// Reads goals and areas, empty when onboarding hasn't happened.
pub async fn load_preferences<S: Store>(store: &S) -> Result<Preferences, PipelineError> {
    Ok(Preferences {
        goals: get_typed(store, StoreKey::UserGoals).await?.unwrap_or_default(),
        areas: get_typed(store, StoreKey::ConfidenceAreas)
            .await?
            .unwrap_or_default(),
    })
}

/// Saves goals and areas.
pub async fn save_preferences<S: Store>(
    store: &S,
    preferences: &Preferences,
) -> Result<(), PipelineError> {
    set_typed(store, StoreKey::UserGoals, &preferences.goals).await?;
    set_typed(store, StoreKey::ConfidenceAreas, &preferences.areas).await
}

/// The stored cron expression, or the daily default.
pub async fn schedule<S: Store>(store: &S) -> Result<String, PipelineError> {
    Ok(get_typed(store, StoreKey::GenerationSchedule)
        .await?
        .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string()))
}

/// Saves the cron expression. Validate it first.
pub async fn set_schedule<S: Store>(store: &S, schedule: &str) -> Result<(), PipelineError> {
    set_typed(store, StoreKey::GenerationSchedule, &schedule).await
}

/// Path of the most recent image, if any.
pub async fn current_image_path<S: Store>(store: &S) -> Result<Option<String>, PipelineError> {
    get_typed(store, StoreKey::CurrentImagePath).await
}

/// Records the most recent image.
pub async fn set_current_image_path<S: Store>(store: &S, path: &str) -> Result<(), PipelineError> {
    set_typed(store, StoreKey::CurrentImagePath, &path).await
}

/// Records a finished run: the new current image and the updated history, in one write.
pub async fn record_run<S: Store>(
    store: &S,
    path: &str,
    history: &[HistoryEntry],
) -> Result<(), PipelineError> {
    store
        .set_many(vec![
            (StoreKey::CurrentImagePath, serde_json::to_value(path)?),
            (StoreKey::ImageHistory, serde_json::to_value(history)?),
        ])
        .await
}

/// Past runs, newest first.
pub async fn history<S: Store>(store: &S) -> Result<Vec<HistoryEntry>, PipelineError> {
    Ok(get_typed(store, StoreKey::ImageHistory)
        .await?
        .unwrap_or_default())
}

/// Replaces the history.
pub async fn set_history<S: Store>(
    store: &S,
    history: &[HistoryEntry],
) -> Result<(), PipelineError> {
    set_typed(store, StoreKey::ImageHistory, &history).await
}

/// Whether onboarding has been saved.
pub async fn onboarding_complete<S: Store>(store: &S) -> Result<bool, PipelineError> {
    Ok(get_typed(store, StoreKey::OnboardingComplete)
        .await?
        .unwrap_or(false))
}

/// Marks onboarding as done (or not).
pub async fn set_onboarding_complete<S: Store>(
    store: &S,
    complete: bool,
) -> Result<(), PipelineError> {
    set_typed(store, StoreKey::OnboardingComplete, &complete).await
}

/// In-process store, nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<StoreKey, Value>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, PipelineError> {
        Ok(self.values.lock().await.get(&key).cloned())
    }

    async fn set_many(&self, values: Vec<(StoreKey, Value)>) -> Result<(), PipelineError> {
        self.values.lock().await.extend(values);
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Nothing is cached: every read goes to the file, and every write happens under an
/// exclusive lock on `<file>.lock`, re-reads the file, applies the change and replaces the
/// file through a temporary sibling and a rename. Several processes can share one file
/// without losing each other's writes.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    writer: Mutex<()>,
}

async fn read_document(path: &Path) -> Result<serde_json::Map<String, Value>, PipelineError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) => Ok(map),
            _ => Err(PipelineError::Store(format!(
                "{} does not hold a JSON object",
                path.display()
            ))),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::Map::new()),
        Err(err) => Err(err.into()),
    }
}

impl JsonFileStore {
    /// Opens `path`, checking it holds a JSON object. A missing file reads as empty.
    pub async fn open(path: &Path) -> Result<Self, PipelineError> {
        read_document(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: lock_path_for(path),
            writer: Mutex::new(()),
        })
    }

    /// Where the document lives.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &serde_json::Map<String, Value>) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Saved store to {}", self.path.display());
        Ok(())
    }
}

impl Store for JsonFileStore {
    async fn get(&self, key: StoreKey) -> Result<Option<Value>, PipelineError> {
        Ok(read_document(&self.path).await?.remove(key.as_str()))
    }

    async fn set_many(&self, values: Vec<(StoreKey, Value)>) -> Result<(), PipelineError> {
        let _writer = self.writer.lock().await;
        let _lock = FileLock::acquire(&self.lock_path).await?;
        let mut document = read_document(&self.path).await?;
        for (key, value) in values {
            document.insert(key.as_str().to_string(), value);
        }
        self.persist(&document).await
    }
}
