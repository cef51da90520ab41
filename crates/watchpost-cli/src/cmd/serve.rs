use anyhow::{bail, Context, Result};
use std::path::Path;
use watchpost_core::config::{Config, WarnLevel};
use watchpost_core::Engine;

pub fn run(config_path: &Path, port: u16) -> Result<()> {
    let config = Config::load_or_default(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => tracing::warn!("{}", w.message),
            WarnLevel::Error => tracing::error!("{}", w.message),
        }
    }
    if Config::has_errors(&warnings) {
        bail!("refusing to start: config has errors");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let engine = Engine::from_config(&config).context("failed to build engine")?;
        let report = engine.seed(&config.seed).await.context("failed to load seed")?;
        let timers = engine.scheduler.start().await?;
        tracing::info!(jobs = report.jobs, timers, "scheduler started");

        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        let actual_port = listener.local_addr()?.port();
        println!("watchpost API → http://localhost:{actual_port}/api  (PID {})", std::process::id());

        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let result = watchpost_server::serve_on(engine.clone(), listener, shutdown).await;

        engine.shutdown().await;
        tracing::info!("scheduler stopped");
        result
    })
}
