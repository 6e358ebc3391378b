pub mod config;
pub mod send;
pub mod status;

use std::path::Path;

use clap::{Parser, Subcommand};

use gb_domain::config::Config;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "GODOT_BRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "godot-bridge.toml";

/// godot-bridge: command channel to a running Godot editor.
#[derive(Debug, Parser)]
#[command(name = "godot-bridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Hold the editor connection and serve JSON-lines requests on stdio
    /// (default when no subcommand is given).
    Serve,
    /// Connect once and report handshake info and diagnostics.
    Status {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Send a single command to the editor and print its result.
    Send {
        /// Command name (e.g. "get_scene_tree").
        command: String,
        /// Command params as a JSON object.
        params: Option<String>,
        /// Reply deadline in milliseconds (defaults to the configured
        /// command timeout).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `GODOT_BRIDGE_CONFIG` (or
/// `godot-bridge.toml` by default). A missing file means defaults.
///
/// Environment host/port overrides are *not* applied here: callers apply
/// them once tracing is up so invalid values get logged.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

    let config = if Path::new(&config_path).exists() {
        Config::from_toml_file(Path::new(&config_path))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["godot-bridge"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn send_parses_params_and_timeout() {
        let cli = Cli::try_parse_from([
            "godot-bridge",
            "send",
            "get_node",
            r#"{"path":"/root"}"#,
            "--timeout-ms",
            "500",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Send {
                command,
                params,
                timeout_ms,
            }) => {
                assert_eq!(command, "get_node");
                assert_eq!(params.as_deref(), Some(r#"{"path":"/root"}"#));
                assert_eq!(timeout_ms, Some(500));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_json_flag() {
        let cli = Cli::try_parse_from(["godot-bridge", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Status { json: true })));
    }

    #[test]
    fn config_subcommands() {
        let cli = Cli::try_parse_from(["godot-bridge", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
    }
}
