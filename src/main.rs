use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use runbox::{
    api::{self, AppState},
    config::AppConfig,
    metrics::MetricsRegistry,
    pipeline::{Pipeline, clamp_timeout, stage::ProcessStageRunner, workspace::WorkspaceManager},
    runtime::{RegistryError, RuntimeRegistry},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to build config")?;
    init_tracing(&config.log_level);

    let registry = Arc::new(load_registry(&config).context("failed to load runtime catalog")?);
    std::fs::create_dir_all(&config.workspace_root).with_context(|| {
        format!(
            "failed to create workspace root {}",
            config.workspace_root.display()
        )
    })?;

    let metrics = Arc::new(MetricsRegistry::new());
    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        WorkspaceManager::new(config.workspace_root.clone()),
        Arc::new(ProcessStageRunner::new(config.max_output_bytes)),
        metrics.clone(),
    ));

    let state = AppState::new(
        registry.clone(),
        pipeline,
        metrics,
        clamp_timeout(config.run_timeout_ms),
        clamp_timeout(config.compile_timeout_ms),
    );
    let app = api::routes(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %config.bind_addr, runtimes = registry.len(), "runbox listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn load_registry(config: &AppConfig) -> Result<RuntimeRegistry, RegistryError> {
    match &config.runtimes_path {
        Some(path) => RuntimeRegistry::from_json_file(path),
        None => RuntimeRegistry::builtin(),
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},hyper=warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
