//! `arngit-watch`: auto-push the repository in the current directory.
//!
//! Trigger, threshold, interval and remote come from the `watch_*` config
//! keys. Runs until Ctrl-C.

use std::sync::Arc;

use arngit::update::GithubReleases;
use arngit::watcher::LogListener;
use arngit::{Engine, EngineOptions};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arngit=info,arngit_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = Engine::open(EngineOptions::default()).await?;
    engine
        .start_update_checks(Arc::new(GithubReleases::new()))
        .await;

    let cwd = std::env::current_dir()?;
    let git = Arc::new(engine.git_for(&cwd).await);
    if !git.has_credentials() {
        info!("No active account; pushing with git's own credentials");
    }

    let options = engine.config().await.watch_options();
    let watcher = match engine
        .watcher(git.clone(), git, options, Arc::new(LogListener))
        .await
    {
        Ok(watcher) => watcher,
        Err(e) => {
            engine.shutdown().await;
            return Err(anyhow::anyhow!("{} [{}] {}", e, e.code(), e.hint()));
        }
    };

    info!("{}", watcher.config().summary());
    let handle = watcher.spawn();

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping watcher");
    handle.stop();
    handle.join().await?;

    engine.shutdown().await;
    Ok(())
}
