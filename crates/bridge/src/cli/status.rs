use serde::Serialize;

use gb_connection::{ConnectionDiagnostics, HandshakeResult, HandshakeStatus};
use gb_domain::config::Config;

use crate::bootstrap;

#[derive(Debug, Serialize)]
struct StatusReport {
    bridge_version: &'static str,
    environment: &'static str,
    url: String,
    connected: bool,
    versions_match: bool,
    handshake: Option<HandshakeResult>,
    diagnostics: ConnectionDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Make one connection attempt (no retries) and print what we learned.
pub async fn run(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut conn_config = config.connection.clone();
    conn_config.auto_reconnect = false;
    let (conn, strategy) = bootstrap::build_connection(&conn_config)?;

    let error = conn.connect().await.err().map(|e| e.to_string());
    let report = StatusReport {
        bridge_version: env!("CARGO_PKG_VERSION"),
        environment: strategy.environment,
        url: conn.url().to_owned(),
        connected: conn.is_connected(),
        versions_match: conn.versions_match(),
        handshake: conn.handshake(),
        diagnostics: conn.diagnostics(),
        error,
    };
    conn.disconnect();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

fn render(report: &StatusReport) -> String {
    let mut out = format!(
        "godot-bridge {}\nTarget:   {} ({})\n",
        report.bridge_version, report.url, report.environment
    );

    match (&report.handshake, report.connected) {
        (Some(hs), true) => {
            out.push_str("State:    connected\n");
            let addon = if report.versions_match {
                format!("{} (matches)", hs.addon_version)
            } else {
                format!("{} (bridge is {})", hs.addon_version, report.bridge_version)
            };
            out.push_str(&format!("Addon:    {addon}\n"));
            out.push_str(&format!("Godot:    {}\n", hs.godot_version));
            if !hs.project_name.is_empty() || !hs.project_path.is_empty() {
                out.push_str(&format!("Project:  {} ({})\n", hs.project_name, hs.project_path));
            }
            if hs.status != HandshakeStatus::Success {
                out.push_str(&format!(
                    "Handshake: {} (addon may be outdated)\n",
                    hs.status.as_str()
                ));
            }
        }
        _ => {
            out.push_str(&format!("State:    {}\n", report.diagnostics.current_state));
            out.push_str(&report.diagnostics.render());
            out.push('\n');
        }
    }
    out
}
