// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use secretsync::config::{Args, Config};
use secretsync::controller::Controller;
use secretsync::kubernetes::create_client;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting {}", banner());

    let args = Args::parse();
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: source_namespace={}, type={}, blacklist={:?}",
        config.source_namespace, config.type_tag, config.blacklist
    );

    let client = create_client(args.kubeconfig.as_deref()).await?;
    info!("Connected to Kubernetes cluster");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let controller = Controller::new(config);
    if let Err(e) = controller.run(client, shutdown).await {
        error!("Controller stopped with error: {}", e);
        std::process::exit(1);
    }

    info!("Controller stopped");
    Ok(())
}

fn banner() -> String {
    format!("secretsync controller version {}", env!("CARGO_PKG_VERSION"))
}

async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Received shutdown signal");
    shutdown.cancel();
}
