use std::sync::Arc;

use affirmwall::cli::{CliOptions, Command};
use affirmwall::config::setup_logging;
use affirmwall::constants::{RUN_LOCK_FILE_NAME, SCHEDULE_RELOAD_INTERVAL};
use affirmwall::pipeline::Pipeline;
use affirmwall::scheduler::{Schedule, Scheduler, stored_schedule_change};
use affirmwall::store::{self, JsonFileStore, Preferences};
use affirmwall::wallpaper::Wallpaper;
use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

type AppPipeline = Pipeline<JsonFileStore, Wallpaper>;

async fn generate(pipeline: &AppPipeline) -> Result<()> {
    let result = pipeline.run_generation().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        bail!(
            "Generation failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn onboard(
    pipeline: &AppPipeline,
    goals: Vec<String>,
    areas: Vec<String>,
    schedule: &str,
) -> Result<()> {
    let schedule = Schedule::parse(schedule)?;
    let store = pipeline.store();
    store::save_preferences(store, &Preferences { goals, areas }).await?;
    store::set_schedule(store, schedule.expression()).await?;
    store::set_onboarding_complete(store, true).await?;
    info!("Onboarding saved, generating the first affirmation");
    generate(pipeline).await
}

async fn show_settings(pipeline: &AppPipeline) -> Result<()> {
    let store = pipeline.store();
    let preferences = store::load_preferences(store).await?;
    let settings = serde_json::json!({
        "goals": preferences.goals,
        "areas": preferences.areas,
        "schedule": store::schedule(store).await?,
        "onboardingComplete": store::onboarding_complete(store).await?,
        "apiKeys": {
            "openrouter": pipeline.settings().api_key().is_ok(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn arm(scheduler: &mut Scheduler, schedule: Schedule, pipeline: &Arc<AppPipeline>) {
    let scheduled = Arc::clone(pipeline);
    scheduler.start(schedule, move || {
        let pipeline = Arc::clone(&scheduled);
        async move {
            let result = pipeline.run_generation().await;
            if !result.success {
                error!(
                    "Scheduled generation failed: {}",
                    result.error.unwrap_or_default()
                );
            }
        }
    });
}

async fn run_daemon(pipeline: Arc<AppPipeline>) -> Result<()> {
    if !store::onboarding_complete(pipeline.store()).await? {
        bail!("Onboarding has not been completed, run `affirmwall onboard` first");
    }
    let schedule = Schedule::parse(&store::schedule(pipeline.store()).await?)?;
    let mut armed = schedule.expression().to_string();

    let mut scheduler = Scheduler::new();
    arm(&mut scheduler, schedule, &pipeline);

    let mut reload = tokio::time::interval(SCHEDULE_RELOAD_INTERVAL);
    reload.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("Failed to listen for shutdown signal")?;
                break;
            }
            _ = reload.tick() => {
                match stored_schedule_change(pipeline.store(), &armed).await {
                    Ok(Some(schedule)) => {
                        info!("Schedule changed to {}, re-arming", schedule.expression());
                        armed = schedule.expression().to_string();
                        arm(&mut scheduler, schedule, &pipeline);
                    }
                    Ok(None) => {}
                    Err(err) => warn!("Keeping schedule {armed}: {err}"),
                }
            }
        }
    }

    info!("Shutting down");
    scheduler.stop();
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = CliOptions::parse();

    if let Err(err) = setup_logging(cli.debug) {
        eprintln!("Continuing without logging: {err}");
    }

    let settings = cli.settings()?;
    let store = JsonFileStore::open(&cli.store_path())
        .await
        .with_context(|| format!("Failed to open {}", cli.store_path().display()))?;
    let pipeline = Arc::new(
        Pipeline::new(settings, store, Wallpaper::new(cli.no_wallpaper))
            .with_run_lock(cli.data_dir.join(RUN_LOCK_FILE_NAME)),
    );

    match cli.command {
        Command::Onboard {
            goals,
            areas,
            schedule,
        } => onboard(&pipeline, goals, areas, &schedule).await,
        Command::Generate => generate(&pipeline).await,
        Command::Apply => {
            if !pipeline.apply_current_wallpaper().await? {
                bail!("No wallpaper was applied");
            }
            Ok(())
        }
        Command::Settings => show_settings(&pipeline).await,
        Command::Schedule { expression } => {
            let schedule = Schedule::parse(&expression)?;
            store::set_schedule(pipeline.store(), schedule.expression()).await?;
            info!("Schedule updated to {}", schedule.expression());
            Ok(())
        }
        Command::History => {
            let history = store::history(pipeline.store()).await?;
            println!("{}", serde_json::to_string_pretty(&history)?);
            Ok(())
        }
        Command::Run => run_daemon(pipeline).await,
    }
}
