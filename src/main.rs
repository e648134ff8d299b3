use std::{io::Read, path::Path, process, sync::Arc};

use mdrelay::{
    application::{
        error::AppError, plugins::PluginClient, registry::PluginRegistry,
        render::OverrideRenderService,
    },
    config::{self, Command, ServeArgs, Settings},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        plugins::HttpPluginClient,
        telemetry,
    },
};
use tokio::{signal, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
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

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let client: Arc<dyn PluginClient> = Arc::new(HttpPluginClient::new()?);
    let registry = PluginRegistry::new(client.clone(), settings.discovery.clone());
    let renderer = OverrideRenderService::new(client, settings.plugins.timeout);

    if settings.discovery.routes.is_none() {
        warn!(
            target = "mdrelay::discovery",
            "no route table configured; documents render without plugins"
        );
    }

    match command {
        Command::Serve(_) => run_serve(&settings, registry, renderer).await,
        Command::Render(args) => run_render(args.file.as_deref(), &registry, &renderer).await,
        Command::Plugins(_) => run_plugins(&registry).await,
    }
}

async fn run_serve(
    settings: &Settings,
    registry: PluginRegistry,
    renderer: OverrideRenderService,
) -> Result<(), AppError> {
    let state = HttpState {
        registry: Arc::new(registry),
        renderer: Arc::new(renderer),
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "mdrelay::server",
        addr = %settings.server.addr,
        "listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        },
    );
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => {
            return flatten_server_result(joined);
        }
        _ = shutdown_signal() => {}
    }

    info!(
        target = "mdrelay::server",
        grace_seconds = settings.server.graceful_shutdown.as_secs(),
        "draining in-flight requests"
    );
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
        Ok(joined) => {
            flatten_server_result(joined)?;
            info!(target = "mdrelay::server", "graceful shutdown completed");
            Ok(())
        }
        Err(_) => {
            server.abort();
            warn!(
                target = "mdrelay::server",
                "shutdown timeout exceeded, dropping remaining connections"
            );
            Ok(())
        }
    }
}

fn flatten_server_result(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_render(
    file: Option<&Path>,
    registry: &PluginRegistry,
    renderer: &OverrideRenderService,
) -> Result<(), AppError> {
    let markdown = match file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(InfraError::from)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(InfraError::from)?;
            buffer
        }
    };

    let plugins = registry.discover().await?;
    let html = renderer.render(&markdown, &plugins).await?;
    print!("{html}");
    Ok(())
}

async fn run_plugins(registry: &PluginRegistry) -> Result<(), AppError> {
    let plugins = registry.discover().await?;
    let json = serde_json::to_string_pretty(&plugins)
        .map_err(|err| AppError::unexpected(format!("failed to encode plugin list: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(target = "mdrelay::server", error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "mdrelay::server", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!(target = "mdrelay::server", "received Ctrl+C");
        },
        _ = terminate => {
            info!(target = "mdrelay::server", "received SIGTERM");
        },
    }
}
