//! Target host resolution.
//!
//! When the bridge runs inside WSL the editor usually runs on the Windows
//! side, reachable through the VM's default gateway rather than
//! `localhost`. Resolution priority:
//!
//! 1. explicit host (`GODOT_HOST` or `connection.host`)
//! 2. WSL default gateway (`/proc/net/route`, then `/etc/resolv.conf` on WSL2)
//! 3. [`gb_protocol::DEFAULT_HOST`]

use std::fs;
use std::net::Ipv4Addr;

use serde::Serialize;

/// Network environment the process runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Wsl2,
    Wsl1,
    Linux,
    Windows,
    Macos,
}

/// Gateway lookup result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayInfo {
    pub environment: Environment,
    pub gateway_ip: Option<Ipv4Addr>,
    /// File the gateway was read from.
    pub source: Option<&'static str>,
}

/// Summary of how the connection target was chosen, for logs and `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStrategy {
    /// `"wsl"` or `"native"`.
    pub environment: &'static str,
    pub target_host: String,
    pub ws_url: String,
}

const PROC_VERSION: &str = "/proc/version";
const PROC_OSRELEASE: &str = "/proc/sys/kernel/osrelease";
const PROC_ROUTE: &str = "/proc/net/route";
const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Whether the process runs under Windows Subsystem for Linux.
pub fn is_wsl() -> bool {
    if !cfg!(target_os = "linux") {
        return false;
    }
    if wsl_env_present() {
        return true;
    }
    mentions_microsoft(PROC_VERSION) || mentions_microsoft(PROC_OSRELEASE)
}

fn wsl_env_present() -> bool {
    std::env::var_os("WSL_DISTRO_NAME").is_some() || std::env::var_os("WSL_INTEROP").is_some()
}

fn mentions_microsoft(path: &str) -> bool {
    fs::read_to_string(path)
        .map(|s| s.to_ascii_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

fn detect_wsl_version() -> Option<Environment> {
    if wsl_env_present() {
        return match fs::read_to_string(PROC_VERSION) {
            Ok(v) if v.to_ascii_lowercase().contains("microsoft") => Some(Environment::Wsl2),
            Ok(_) => None,
            Err(_) => Some(Environment::Wsl1),
        };
    }
    // Kernel release alone cannot tell WSL1 from WSL2; WSL2 is the common case.
    mentions_microsoft(PROC_OSRELEASE).then_some(Environment::Wsl2)
}

/// Resolve the default gateway of the current environment.
///
/// Only Linux (including WSL) is supported; other platforms report their
/// environment with no gateway.
pub fn resolve_gateway() -> GatewayInfo {
    if cfg!(target_os = "windows") {
        return GatewayInfo {
            environment: Environment::Windows,
            gateway_ip: None,
            source: None,
        };
    }
    if cfg!(target_os = "macos") {
        return GatewayInfo {
            environment: Environment::Macos,
            gateway_ip: None,
            source: None,
        };
    }

    let wsl = detect_wsl_version();
    let environment = wsl.unwrap_or(Environment::Linux);

    match fs::read_to_string(PROC_ROUTE) {
        Ok(table) => {
            if let Some(ip) = parse_route_table(&table) {
                tracing::debug!(ip = %ip, "gateway resolved from {PROC_ROUTE}");
                return GatewayInfo {
                    environment,
                    gateway_ip: Some(ip),
                    source: Some(PROC_ROUTE),
                };
            }
        }
        Err(e) => tracing::debug!(error = %e, "failed to read {PROC_ROUTE}"),
    }

    if wsl == Some(Environment::Wsl2) {
        match fs::read_to_string(RESOLV_CONF) {
            Ok(conf) => {
                if let Some(ip) = parse_resolv_conf(&conf) {
                    tracing::debug!(ip = %ip, "gateway resolved from {RESOLV_CONF}");
                    return GatewayInfo {
                        environment,
                        gateway_ip: Some(ip),
                        source: Some(RESOLV_CONF),
                    };
                }
            }
            Err(e) => tracing::debug!(error = %e, "failed to read {RESOLV_CONF}"),
        }
    }

    GatewayInfo {
        environment,
        gateway_ip: None,
        source: None,
    }
}

/// Find the default route's gateway in `/proc/net/route` content.
pub fn parse_route_table(content: &str) -> Option<Ipv4Addr> {
    content.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let iface = fields.next()?;
        let destination = fields.next()?;
        let gateway = fields.next()?;
        if iface == "Iface" || destination != "00000000" {
            return None;
        }
        hex_to_ipv4(gateway)
    })
}

/// Decode the little-endian hex address format of `/proc/net/route`
/// (`"0101A8C0"` → `192.168.1.1`).
pub fn hex_to_ipv4(hex: &str) -> Option<Ipv4Addr> {
    if hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(raw.swap_bytes()))
}

/// First IPv4 `nameserver` entry of a resolv.conf.
pub fn parse_resolv_conf(content: &str) -> Option<Ipv4Addr> {
    content.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("nameserver")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Choose the host to connect to. `configured` is the explicit override, if
/// any.
pub fn target_host(configured: Option<&str>) -> String {
    if let Some(host) = configured.map(str::trim).filter(|h| !h.is_empty()) {
        tracing::debug!(host = %host, "using configured host");
        return host.to_owned();
    }

    if is_wsl() {
        if let Some(ip) = resolve_gateway().gateway_ip {
            tracing::debug!(host = %ip, "using auto-detected Windows host");
            return ip.to_string();
        }
        tracing::warn!("WSL detected but Windows host IP could not be resolved, falling back to localhost");
    }

    gb_protocol::DEFAULT_HOST.to_owned()
}

/// Resolve the full connection target for `port`.
pub fn connection_strategy(configured: Option<&str>, port: u16) -> ConnectionStrategy {
    let target_host = target_host(configured);
    ConnectionStrategy {
        environment: if is_wsl() { "wsl" } else { "native" },
        ws_url: format!("ws://{target_host}:{port}"),
        target_host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTE_TABLE: &str = "\
Iface\tDestination\tGateway \tFlags\tRefCnt\tUse\tMetric\tMask\t\tMTU\tWindow\tIRTT
eth0\t00000000\t0101A8C0\t0003\t0\t0\t0\t00000000\t0\t0\t0
eth0\t0001A8C0\t00000000\t0001\t0\t0\t0\t00FFFFFF\t0\t0\t0
";

    #[test]
    fn hex_is_little_endian() {
        assert_eq!(hex_to_ipv4("0101A8C0"), Some(Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hex_to_ipv4("0100007F"), Some(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn hex_rejects_bad_input() {
        assert_eq!(hex_to_ipv4("0101A8"), None);
        assert_eq!(hex_to_ipv4("ZZZZZZZZ"), None);
    }

    #[test]
    fn route_table_default_gateway() {
        assert_eq!(
            parse_route_table(ROUTE_TABLE),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }

    #[test]
    fn route_table_without_default_route() {
        let table = "Iface\tDestination\tGateway\neth0\t0001A8C0\t00000000\n";
        assert_eq!(parse_route_table(table), None);
    }

    #[test]
    fn resolv_conf_first_ipv4_nameserver() {
        let conf = "# generated by WSL\nsearch lan\nnameserver fe80::1\nnameserver 172.22.16.1\nnameserver 8.8.8.8\n";
        assert_eq!(parse_resolv_conf(conf), Some(Ipv4Addr::new(172, 22, 16, 1)));
    }

    #[test]
    fn resolv_conf_without_nameserver() {
        assert_eq!(parse_resolv_conf("search lan\n"), None);
    }

    #[test]
    fn explicit_host_wins() {
        assert_eq!(target_host(Some(" 10.1.2.3 ")), "10.1.2.3");
    }

    #[test]
    fn strategy_builds_ws_url() {
        let s = connection_strategy(Some("example.test"), 6550);
        assert_eq!(s.target_host, "example.test");
        assert_eq!(s.ws_url, "ws://example.test:6550");
    }
}
