use std::{future::IntoFuture, process};

use statico::{
    cache,
    config::{self, Command},
    error::ServeError,
    http::{self, AppState},
    invalidate, metrics, telemetry,
    util::bytes::format_budget,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &ServeError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), ServeError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| ServeError::server("main.config", err.to_string()))?;

    telemetry::init(&settings.logging)
        .map_err(|err| ServeError::server("main.telemetry", err.to_string()))?;

    match cli_args.command {
        Some(Command::Serve(_)) | None => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), ServeError> {
    let metrics_handle = if settings.metrics.enable {
        Some(
            metrics::install()
                .map_err(|err| ServeError::server("main.metrics", err.to_string()))?,
        )
    } else {
        None
    };

    let state = AppState::new(settings, metrics_handle)?;

    info!(
        addr = %state.settings.server.addr,
        root = %state.canonical_root.display(),
        cache_budget = %format_budget(state.settings.cache.size_bytes),
        cache_ttl_secs = state.settings.cache.ttl.as_secs(),
        strategy = ?state.settings.cache.strategy,
        versioning = state.settings.versioning.enable,
        watcher = state.settings.watcher.enable,
        max_header_bytes = state.settings.limits.max_header_bytes,
        "starting statico"
    );

    let sweeper = cache::spawn_sweeper(state.cache.clone(), state.settings.cache.ttl);
    let watcher = if state.settings.watcher.enable {
        Some(invalidate::spawn_watcher(
            (*state.canonical_root).clone(),
            state.cache.clone(),
            state.versions.clone(),
        )?)
    } else {
        None
    };

    let addr = state.settings.server.addr;
    let shutdown_timeout = state.settings.timeouts.shutdown;
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| ServeError::from_io("main.bind", &addr.to_string(), err))?;
    info!(addr = %addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = shutdown_rx.await;
    });
    let mut server_task = tokio::spawn(server.into_future());

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received; draining in-flight requests");
            let _ = shutdown_tx.send(());

            match tokio::time::timeout(shutdown_timeout, &mut server_task).await {
                Ok(Ok(Ok(()))) => info!("server drained"),
                Ok(Ok(Err(err))) => warn!(error = %err, "server error during shutdown"),
                Ok(Err(err)) => warn!(error = %err, "server task failed during shutdown"),
                Err(_) => {
                    warn!(
                        timeout_secs = shutdown_timeout.as_secs(),
                        "shutdown timeout exceeded; aborting in-flight requests"
                    );
                    server_task.abort();
                }
            }
        }
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    return Err(ServeError::server("main.serve", err.to_string()));
                }
                Err(err) => {
                    return Err(ServeError::server("main.serve", err.to_string()));
                }
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    sweeper.stop().await;
    info!("statico stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
