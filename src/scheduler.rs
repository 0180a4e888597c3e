//! Cron-style trigger for scheduled generation runs.

use std::future::Future;

use chrono::{DateTime, Local, TimeZone};
use croner::Cron;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::store::{self, Store};

/// A validated five-field cron expression.
pub struct Schedule {
    expression: String,
    cron: Cron,
}

impl std::fmt::Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Schedule").field(&self.expression).finish()
    }
}

impl Schedule {
    /// Parses `expression`, rejecting anything croner won't accept.
    pub fn parse(expression: &str) -> Result<Self, PipelineError> {
        let expression = expression.trim();
        let cron = Cron::new(expression)
            .parse()
            .map_err(|err| PipelineError::Schedule(format!("{expression:?}: {err}")))?;
        Ok(Self {
            expression: expression.to_string(),
            cron,
        })
    }

    /// The expression as given, trimmed.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First firing strictly after `from`.
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Result<DateTime<Tz>, PipelineError> {
        self.cron
            .find_next_occurrence(from, false)
            .map_err(|err| PipelineError::Schedule(format!("{}: {err}", self.expression)))
    }
}

/// The stored schedule, when it differs from the `armed` expression.
///
/// Another process (`affirmwall schedule`) may have changed it since the daemon started.
pub async fn stored_schedule_change<S: Store>(
    store: &S,
    armed: &str,
) -> Result<Option<Schedule>, PipelineError> {
    let stored = store::schedule(store).await?;
    if stored.trim() == armed {
        return Ok(None);
    }
    Schedule::parse(&stored).map(Some)
}

/// Owns the background task that fires the callback.
#[derive(Debug, Default)]
pub struct Scheduler {
    task: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// A scheduler with nothing armed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `schedule`, replacing whatever was armed before.
    pub fn start<F, Fut>(&mut self, schedule: Schedule, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        info!("Initializing scheduler with: {}", schedule.expression());
        self.task = Some(tokio::spawn(async move {
            loop {
                let now = Local::now();
                let next = match schedule.next_after(&now) {
                    Ok(next) => next,
                    Err(err) => {
                        error!("Scheduler has no next run, stopping: {err}");
                        return;
                    }
                };
                info!("Next scheduled generation at {next}");
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                info!("Scheduled affirmation generation triggered");
                callback().await;
            }
        }));
        info!("Scheduler started successfully");
    }

    /// Disarms the current schedule, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Scheduler stopped");
        }
    }

    /// Whether a schedule is armed.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
