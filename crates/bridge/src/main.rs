use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use gb_bridge::cli::{self, Cli, Command, ConfigCommand};
use gb_bridge::dispatch::Dispatcher;
use gb_bridge::{bootstrap, observer};
use gb_domain::config::{Config, LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let (mut config, config_path) = cli::load_config()?;
            init_tracing(&config.logging);
            config.apply_env_overrides();
            run_server(config, config_path).await
        }
        Some(Command::Status { json }) => {
            init_cli_tracing();
            let (mut config, _) = cli::load_config()?;
            config.apply_env_overrides();
            cli::status::run(&config, json).await
        }
        Some(Command::Send {
            command,
            params,
            timeout_ms,
        }) => {
            init_cli_tracing();
            let (mut config, _) = cli::load_config()?;
            config.apply_env_overrides();
            cli::send::run(&config, &command, params.as_deref(), timeout_ms).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (mut config, config_path) = cli::load_config()?;
            let override_issues = config.apply_env_overrides();
            if !cli::config::validate(&config, &config_path, override_issues) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (mut config, _) = cli::load_config()?;
            config.apply_env_overrides();
            cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("godot-bridge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Tracing for the long-running `serve` command. Always writes to stderr:
/// stdout carries replies.
fn init_tracing(logging: &LoggingConfig) {
    let default_filter = logging
        .filter
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or("info,gb_connection=debug");
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.compact())
            .init(),
    }
}

/// Quiet, human-readable tracing for one-shot CLI commands.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Hold the editor connection and serve stdin until EOF or a signal.
async fn run_server(config: Config, config_path: String) -> anyhow::Result<()> {
    tracing::info!(
        config = %config_path,
        version = env!("CARGO_PKG_VERSION"),
        "godot-bridge starting"
    );

    let (conn, _strategy) = bootstrap::build_connection(&config.connection)?;
    let event_log = observer::spawn(conn.subscribe());

    // The editor may start after us; retries continue in the background and
    // the failure itself reaches the event log.
    if let Err(e) = conn.connect().await {
        tracing::debug!(url = %conn.url(), error = %e, "initial connect failed");
    }

    let dispatcher = Dispatcher::new(conn.clone());
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let result = dispatcher
        .run(stdin, tokio::io::stdout(), shutdown_signal())
        .await;

    conn.disconnect();
    drop(dispatcher);
    drop(conn);
    observer::drain(event_log).await;
    tracing::info!("godot-bridge stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await;
                tracing::info!("received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
