//! `pulsar status` — show configuration and provider status.
//!
//! - Shows config path, provider, model, data directory, snapshot files
//! - Shows configured tool providers
//! - Shows API key status for each supported vendor

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use pulsar_core::config::{get_config_path, load_config, Config};
use pulsar_providers::registry::{find_by_name, PROVIDERS};

/// Run the status command.
pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path);
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(get_config_path);

    println!();
    println!("{}", "✦ Pulsar Status".cyan().bold());
    println!();

    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        config_path.display(),
        presence(&config_path)
    );

    let provider = &config.provider;
    println!(
        "  {:<18} {}",
        "Provider:".bold(),
        provider_label(&config)
    );
    if provider.is_configured() {
        println!("  {:<18} {}", "Model:".bold(), model_label(&config));
    }
    println!(
        "  {:<18} {}",
        "Parameters:".bold(),
        format!("max_iters: {} | session: {}", config.max_iters, config.session).dimmed()
    );

    let data_path = config.data_path();
    println!(
        "  {:<18} {} {}",
        "Data:".bold(),
        data_path.display(),
        presence(&data_path)
    );
    let memory_path = config.memory_snapshot_path();
    println!(
        "  {:<18} {} {}",
        "Memory snapshot:".bold(),
        memory_path.display(),
        presence(&memory_path)
    );
    let task_path = config.task_snapshot_path();
    println!(
        "  {:<18} {} {}",
        "Task snapshot:".bold(),
        task_path.display(),
        presence(&task_path)
    );

    // Tool providers
    println!();
    println!("  {}", "Tool providers:".bold());
    if config.mcp_servers.is_empty() {
        println!("    {}", "· none configured".dimmed());
    }
    for (id, server) in &config.mcp_servers {
        let command = std::iter::once(server.command.as_str())
            .chain(server.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        println!("    {:<20} {}", id, command.dimmed());
    }

    // Vendors
    println!();
    println!("  {}", "Providers:".bold());
    for spec in PROVIDERS {
        let key_set = spec
            .env_key
            .map(|key| std::env::var(key).is_ok_and(|v| !v.is_empty()))
            .unwrap_or(false);
        let selected = spec.matches(&provider.name);
        let status = match (selected, key_set || (selected && !provider.api_key.is_empty())) {
            (true, true) => format!("{} (selected, key set)", "✓".green()),
            (true, false) => format!("{}", "· selected, no key".yellow()),
            (false, true) => format!("{} (key set)", "✓".green()),
            (false, false) => format!("{}", "· not configured".dimmed()),
        };
        println!("    {:<20} {}", spec.display_name, status);
    }

    println!();

    Ok(())
}

fn presence(path: &Path) -> String {
    if path.exists() {
        "✓".green().to_string()
    } else {
        "(not found)".red().to_string()
    }
}

fn provider_label(config: &Config) -> String {
    let provider = &config.provider;
    if !provider.is_configured() {
        return "not configured".red().to_string();
    }
    match find_by_name(&provider.name) {
        Some(spec) => spec.display_name.to_string(),
        None => format!("{} {}", provider.name, "(unknown)".red()),
    }
}

/// The configured model, or the vendor default when none is set.
fn model_label(config: &Config) -> String {
    let provider = &config.provider;
    if !provider.model.is_empty() {
        return provider.model.clone();
    }
    find_by_name(&provider.name)
        .map(|spec| format!("{} {}", spec.default_model, "(default)".dimmed()))
        .unwrap_or_else(|| "(none)".to_string())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
