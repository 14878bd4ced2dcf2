//! perfmoded - runs the policy engine against a line-oriented event feed.
//!
//! Usage: `perfmoded [settings.json] < events`
//!
//! Foreground transitions are read from stdin (see `stdin_source`) once the
//! engine is running. The daemon stops on Ctrl-C or when stdin closes.

mod log_bus;
mod stdin_source;

use anyhow::Context;
use log_bus::LogEventBus;
use perfmode_engine::{
    ChannelEventSource, EngineDeps, EngineSettings, MemoizedHomeApps, PolicyEngine,
    StaticHomeApps,
};
use perfmode_events::EngineState;
use perfmode_policy::StdFileAccess;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,perfmode=debug")),
        )
        .init();

    let settings = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => EngineSettings::from_file(&path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };

    tracing::info!(
        config = %settings.config_path.display(),
        control = %settings.control_path.display(),
        "Starting perfmode daemon"
    );

    let source = Arc::new(ChannelEventSource::new());
    let home = MemoizedHomeApps::new(StaticHomeApps::new(settings.home_packages.clone()));
    let engine = PolicyEngine::new(
        settings,
        EngineDeps {
            files: Arc::new(StdFileAccess),
            source: source.clone(),
            bus: Arc::new(LogEventBus::new(true)),
            home: Arc::new(home),
        },
    );

    engine.activate();

    tokio::select! {
        ready = wait_until_running(&engine) => ready?,
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            tracing::info!("interrupt received before the engine started");
            engine.deactivate().await;
            return Ok(());
        }
    }

    let feed = {
        let source = Arc::clone(&source);
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            stdin_source::pump(stdin, &source).await
        })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for Ctrl-C")?;
            tracing::info!("interrupt received");
        }
        fed = feed => {
            match fed {
                Ok(Ok(count)) => tracing::info!(count, "event feed closed"),
                Ok(Err(e)) => tracing::warn!(error = %e, "event feed failed"),
                Err(e) => tracing::warn!(error = %e, "event feed task failed"),
            }
        }
    }

    engine.deactivate().await;
    tracing::info!("perfmode daemon stopped");
    Ok(())
}

/// Wait for the engine to subscribe to its event source. Transitions pushed
/// before then would be dropped.
async fn wait_until_running(engine: &PolicyEngine) -> anyhow::Result<()> {
    let mut status = engine.subscribe();
    status
        .wait_for(|status| status.state == EngineState::Running)
        .await
        .context("engine status channel closed")?;
    Ok(())
}
