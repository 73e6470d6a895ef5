// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use server_node_r::business::{LegoRenewer, LocalEngine, PanelClient, SystemSampler};
use server_node_r::config::{self, FileConfig, NodeEntry};
use server_node_r::controller::{ControllerFactory, GenerationFactory};
use server_node_r::logger::{self, log};
use server_node_r::{Collaborators, Controller, ControllerError, Supervisor};

/// Each generation gets a fresh engine; nodes of one generation share it
/// along with the renewer and sampler, and get their own panel client.
fn generation_factory() -> GenerationFactory {
    let cert = Arc::new(LegoRenewer::default());
    let sampler = Arc::new(SystemSampler::new());

    Box::new(move || {
        controller_factory(Arc::new(LocalEngine::new()), cert.clone(), sampler.clone())
    })
}

fn controller_factory(
    engine: Arc<LocalEngine>,
    cert: Arc<LegoRenewer>,
    sampler: Arc<SystemSampler>,
) -> ControllerFactory {
    Box::new(move |node: &NodeEntry| {
        let api = PanelClient::new(node.api_config.clone())
            .map_err(|e| ControllerError::Config(format!("{:#}", e)))?;
        let deps = Collaborators {
            api: Arc::new(api),
            engine: engine.clone(),
            cert: cert.clone(),
            sampler: sampler.clone(),
        };
        Ok(Controller::new(node.controller_config.clone(), deps))
    })
}

/// Cancel `token` on SIGINT/SIGTERM (Ctrl-C elsewhere)
fn spawn_shutdown_listener(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => log::info!("SIGINT received, shutting down..."),
                _ = sigterm.recv() => log::info!("SIGTERM received, shutting down..."),
            }
            token.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            log::info!("Shutdown signal received...");
            token.cancel();
        });
    }

    Ok(())
}

#[cfg(unix)]
async fn reload(supervisor: &mut Supervisor, path: &std::path::Path) {
    let config = match FileConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            log::error!(error = %e, path = %path.display(), "Reload aborted, config invalid");
            return;
        }
    };

    match supervisor.reload(&config).await {
        Ok(n) => log::info!(nodes = n, "Reload complete"),
        Err(e) => log::error!(error = %e, "Reload failed, no nodes running"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::CliArgs::parse_args();
    let file_config = FileConfig::load(&cli.config)?;

    logger::init_logger(logger::resolve_level(
        cli.log_mode.as_deref(),
        file_config.log.level.as_deref(),
    ));

    log::info!(
        config = %cli.config.display(),
        nodes = file_config.nodes.len(),
        "Starting node controller"
    );

    let mut supervisor = Supervisor::new(generation_factory());
    supervisor.start(&file_config).await?;

    let cancel_token = CancellationToken::new();
    spawn_shutdown_listener(cancel_token.clone())?;

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sighup = signal(SignalKind::hangup())?;
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = sighup.recv() => {
                    log::info!("SIGHUP received, reloading configuration");
                    reload(&mut supervisor, &cli.config).await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    cancel_token.cancelled().await;

    supervisor.close().await;
    log::info!("Shutdown complete");
    Ok(())
}
