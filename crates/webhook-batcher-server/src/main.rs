// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, net::SocketAddr, process, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use webhook_batcher::{
    accumulator::Accumulator, config::Config, forwarder::HttpForwarder, intake,
    server::IntakeServer, supervisor::Supervisor,
};

const LISTEN_HOST: [u8; 4] = [0, 0, 0, 0];

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on webhook batcher startup: {e}");
            process::exit(1);
        }
    };
    info!(
        batch_size = config.batch_size,
        batch_interval = ?config.batch_interval,
        post_endpoint = %config.post_endpoint,
        "Starting webhook batcher"
    );

    let forwarder = match HttpForwarder::new(&config) {
        Ok(f) => Arc::new(f),
        Err(e) => {
            error!("Error building http client for post endpoint: {e}");
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    let (intake, rx) = intake::channel(config.intake_queue_capacity);
    let accumulator = Accumulator::from_config(rx, &config);
    let supervisor = Supervisor::new(accumulator, forwarder);
    let mut supervisor_handle = tokio::spawn(supervisor.run());

    let addr = SocketAddr::from((LISTEN_HOST, config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Error binding webhook server to {addr}: {e}");
            process::exit(1);
        }
    };
    let server = IntakeServer::new(Arc::clone(&config), intake, shutdown.clone());
    let mut server_handle = tokio::spawn(async move {
        if let Err(e) = server.serve(listener).await {
            error!("Webhook server error: {e}");
        }
    });

    tokio::select! {
        finished = &mut supervisor_handle => {
            shutdown.cancel();
            let _ = server_handle.await;
            match finished {
                Ok(Ok(())) => {
                    info!("Cycle supervisor stopped");
                }
                Ok(Err(e)) => {
                    error!("Stopping webhook batcher: {e}");
                    process::exit(1);
                }
                Err(e) => {
                    error!("Cycle supervisor task failed: {e}");
                    process::exit(1);
                }
            }
        }
        _ = &mut server_handle => {
            error!("Webhook server stopped unexpectedly");
            shutdown.cancel();
            let _ = supervisor_handle.await;
            process::exit(1);
        }
        () = shutdown_signal() => {
            info!("Received shutdown signal, flushing pending records");
            shutdown.cancel();
            let _ = server_handle.await;
            match supervisor_handle.await {
                Ok(Ok(())) => info!("All accepted records were flushed"),
                Ok(Err(e)) => {
                    error!("Unable to flush pending records on shutdown: {e}");
                    process::exit(1);
                }
                Err(e) => {
                    error!("Cycle supervisor task failed: {e}");
                    process::exit(1);
                }
            }
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
