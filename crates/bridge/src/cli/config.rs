use gb_domain::config::{Config, ConfigError, ConfigSeverity};

/// Validate the config plus any issues found while applying environment
/// overrides, printing each one.
///
/// Returns `false` when at least one error was found.
pub fn validate(config: &Config, config_path: &str, override_issues: Vec<ConfigError>) -> bool {
    let mut issues = override_issues;
    issues.extend(config.validate());

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)?;
    print!("{output}");
    Ok(())
}
