//! Weft Sync - keeps a local workspace in step with a shared directory.

use std::sync::Arc;

use weft_engine::{Project, Workspace};
use weft_sync::{
    init_tracing, AutosaveFile, DirectoryRemote, SyncConfig, SyncService, TokioClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SyncConfig::from_env()?;
    tracing::info!(
        remote_dir = %config.remote_dir.display(),
        autosave = %config.autosave_path.display(),
        "Starting Weft Sync"
    );

    let autosave = AutosaveFile::new(&config.autosave_path);
    let workspace = match autosave.load().await? {
        Some(envelope) => envelope.workspace,
        None => {
            tracing::info!(project = %config.default_project, "no autosave, starting fresh");
            Workspace::new().with_active_project(Project::new(
                config.default_project.as_str(),
                config.default_project.as_str(),
            ))
        }
    };

    let mut service = SyncService::new(
        workspace,
        config.engine.clone(),
        Arc::new(DirectoryRemote::new(&config.remote_dir)),
        autosave,
        Arc::new(TokioClock::new()),
    )
    .with_pull_interval(config.pull_interval);

    let (_subscriber, mut notices) = service.subscribe();
    tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            tracing::debug!(?notice, "notice delivered");
        }
    });

    service.start().await;
    let reports = service.pull_all().await?;
    tracing::info!(projects = reports.len(), "initial pull complete");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    if let Some(report) = service.shutdown().await? {
        tracing::info!(
            pushed = report.pushed.len(),
            failed = report.failed.len(),
            "final flush"
        );
    }
    Ok(())
}
