use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

use gb_domain::config::Config;

use crate::bootstrap;

/// Connect, send one command, print its result as JSON.
///
/// Any failure (connect, timeout, remote error) is returned so the process
/// exits non-zero with the message.
pub async fn run(
    config: &Config,
    command: &str,
    params: Option<&str>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let params = parse_params(params)?;
    let timeout = match timeout_ms {
        Some(0) => anyhow::bail!("--timeout-ms must be greater than 0"),
        Some(ms) => Duration::from_millis(ms),
        None => config.connection.command_timeout(),
    };

    let mut conn_config = config.connection.clone();
    conn_config.auto_reconnect = false;
    let (conn, _strategy) = bootstrap::build_connection(&conn_config)?;

    conn.connect().await?;
    let result = conn.send_command_with_timeout(command, params, timeout).await;
    conn.disconnect();

    let value = result?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn parse_params(raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("params is not valid JSON: {raw}"))?;
    if !value.is_object() {
        anyhow::bail!("params must be a JSON object, got: {raw}");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_params_is_empty_object() {
        assert_eq!(parse_params(None).unwrap(), json!({}));
    }

    #[test]
    fn params_must_be_object() {
        assert_eq!(parse_params(Some(r#"{"a":1}"#)).unwrap(), json!({"a": 1}));
        assert!(parse_params(Some("[1,2]")).is_err());
        assert!(parse_params(Some("{oops")).is_err());
    }
}
