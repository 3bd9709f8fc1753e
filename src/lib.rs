pub mod api;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod separator;
pub mod stems;
pub mod upload;

use std::sync::Arc;

use api::{ApiContext, ServerError};
use config::Settings;
use jobs::JobSweeper;
use separator::{SpleeterCli, StemSeparator};

/// Run the service until Ctrl-C or SIGTERM.
///
/// Builds a multi-threaded runtime with `WORKERS` worker threads, prepares
/// the working directories, serves the API and runs the retention sweeper.
pub fn run(settings: Settings) -> Result<(), ServerError> {
    // Flushes the file log on drop.
    let _log_guard = logging::init_tracing(&settings);

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.workers.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(serve(settings))
}

async fn serve(settings: Settings) -> Result<(), ServerError> {
    settings.validate()?;
    settings.ensure_directories()?;
    // Nothing from a previous run can still be processing these.
    jobs::purge_stale_uploads(&settings.upload_dir);

    let separator = Arc::new(SpleeterCli::from_settings(&settings)?);
    tracing::info!(
        separator = separator.name(),
        command = %settings.spleeter_command,
        model_dir = %settings.model_dir.display(),
        timeout_secs = settings.process_timeout,
        "Separator configured"
    );

    let addr = settings.bind_addr();
    let ctx = ApiContext::new(settings, separator);

    let mut sweeper = ctx.settings.output_retention().map(|retention| {
        JobSweeper::start(
            ctx.jobs.clone(),
            ctx.settings.output_dir.clone(),
            ctx.settings.upload_dir.clone(),
            retention,
            ctx.settings.cleanup_interval(),
        )
    });

    let mut server = api::start_server(ctx, &addr).await?;
    tracing::info!(addr = %server.local_addr(), "Listening");

    api::shutdown_signal().await;

    server.shutdown();
    server.wait().await;
    if let Some(sweeper) = sweeper.as_mut() {
        sweeper.shutdown().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
