//! Shared CLI helpers — response printing, banners, catalogue formatting.

use std::collections::BTreeMap;

use colored::Colorize;

use pulsar_agent::task::TaskSummary;
use pulsar_agent::MemoryOverview;
use pulsar_core::types::{Message, ToolSpec};

/// Join the messages produced by one query into the text shown to the user.
pub fn render_response(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print an agent response to stdout.
pub fn print_response(messages: &[Message]) {
    let response = render_response(messages);
    println!();
    println!("{}", "✦ Pulsar".cyan().bold());
    if response.is_empty() {
        println!("{}", "(no response)".dimmed());
    } else {
        println!("{response}");
    }
    println!();
}

/// Print the banner shown at REPL start.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "✦ Pulsar".cyan().bold(), version.dimmed());
    println!(
        "{}",
        "Type a message, /tools, /mem_ops, /task, /tasks, /memory, or \"exit\" to quit.".dimmed()
    );
    println!();
}

/// Print a "thinking" placeholder (for non-log mode).
pub fn print_thinking() {
    eprint!("{}", "⠿ thinking...".dimmed());
}

/// Clear the "thinking" placeholder.
pub fn clear_thinking() {
    eprint!("\r{}\r", " ".repeat(40));
}

/// Group tools by the provider that registered them.
pub fn group_by_provider(tools: &[ToolSpec]) -> BTreeMap<&str, Vec<&ToolSpec>> {
    let mut groups: BTreeMap<&str, Vec<&ToolSpec>> = BTreeMap::new();
    for tool in tools {
        groups.entry(tool.provider_id.as_str()).or_default().push(tool);
    }
    groups
}

/// Print tools grouped by provider.
pub fn print_tools(tools: &[ToolSpec]) {
    println!();
    if tools.is_empty() {
        println!("  {}", "No tools available.".dimmed());
        println!();
        return;
    }
    for (provider, tools) in group_by_provider(tools) {
        println!("  {}", provider.bold());
        for tool in tools {
            println!("    {:<24} {}", tool.name.green(), first_line(&tool.description).dimmed());
        }
    }
    println!();
}

/// Print `name  description` rows.
pub fn print_catalogue(title: &str, rows: &[(String, String)]) {
    println!();
    println!("  {}", title.bold());
    if rows.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for (name, description) in rows {
        println!("    {:<24} {}", name.green(), first_line(description).dimmed());
    }
    println!();
}

pub fn print_tasks(tasks: &[TaskSummary]) {
    println!();
    for task in tasks {
        let marker = if task.working { "*".green().bold().to_string() } else { " ".to_string() };
        println!(
            "  {} {:>3}  {:<9} {}",
            marker,
            task.id,
            task.kind.as_str(),
            task.title.bold()
        );
        if !task.target.is_empty() {
            println!("         {} {}", "target:".dimmed(), task.target);
        }
        if !task.progress.is_empty() {
            println!("         {} {}", "progress:".dimmed(), task.progress);
        }
        println!(
            "         {}",
            format!("{} logs, {} files", task.logs, task.files).dimmed()
        );
    }
    println!();
}

pub fn print_memory(overview: &MemoryOverview) {
    println!();
    println!(
        "  {:<12} {}",
        "Records:".bold(),
        overview.records
    );
    println!("  {:<12} {}", "Summaries:".bold(), overview.summaries);
    if let Some(summary) = &overview.latest_summary {
        println!("  {:<12} {}", "Latest:".bold(), summary);
    }
    println!("  {:<12} {}", "Topics:".bold(), overview.topics.len());
    for (name, topic) in &overview.topics {
        println!(
            "    {:<22} {} {}",
            name.green(),
            first_line(&topic.description),
            format!("(x{})", topic.frequency).dimmed()
        );
    }
    println!("  {:<12} {}", "Data keys:".bold(), overview.database_keys.join(", "));
    if !overview.recent_records.is_empty() {
        println!("  {}", "Recent records:".bold());
        for record in &overview.recent_records {
            println!("    {} {}", format!("[{}]", record.timestamp).dimmed(), record.content);
        }
    }
    println!();
}

fn first_line(s: &str) -> &str {
    s.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
