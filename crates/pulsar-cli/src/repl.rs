//! Interactive REPL over an agent session.
//!
//! Uses `rustyline` for readline-style editing with persistent history.
//! Lines starting with `/` are session commands; anything else is a query.

use anyhow::Result;
use futures_util::future::FutureExt;
use rustyline::config::Configurer;
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};
use tracing::{debug, warn};

use pulsar_core::types::ToolSpec;

use crate::helpers;
use crate::session::AgentSession;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

const HELP: &str = "\
  /tools                      list available tools
  /mem_ops                    list memory operations
  /task new <plan|research>   start a new working task
  /task load <id>             switch the working task
  /tasks                      list tasks
  /memory                     show memory contents
  /memory refresh             condense memory records now
  exit | quit                 leave";

// ─────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────

/// One parsed line of REPL input.
#[derive(Debug, PartialEq)]
enum ReplCommand {
    Exit,
    Help,
    Tools,
    MemOps,
    TaskNew(String),
    TaskLoad(u64),
    Tasks,
    Memory,
    MemoryRefresh,
    /// A malformed session command, with a usage hint.
    Usage(&'static str),
    Query(String),
}

impl ReplCommand {
    fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if is_exit_command(trimmed) {
            return Self::Exit;
        }
        if !trimmed.starts_with('/') {
            return Self::Query(trimmed.to_string());
        }

        let words: Vec<&str> = trimmed.split_whitespace().collect();
        match words.as_slice() {
            ["/help"] => Self::Help,
            ["/tools"] => Self::Tools,
            ["/mem_ops"] => Self::MemOps,
            ["/tasks"] => Self::Tasks,
            ["/memory"] => Self::Memory,
            ["/memory", "refresh"] => Self::MemoryRefresh,
            ["/task", "new", kind] => Self::TaskNew(kind.to_lowercase()),
            ["/task", "load", id] => match id.parse() {
                Ok(id) => Self::TaskLoad(id),
                Err(_) => Self::Usage("/task load <id>"),
            },
            ["/task", ..] => Self::Usage("/task new <plan|research> | /task load <id>"),
            _ => Self::Query(trimmed.to_string()),
        }
    }
}

// ─────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────

/// Run the interactive REPL loop.
pub fn run(session: &AgentSession, show_logs: bool) -> Result<()> {
    helpers::print_banner();

    let mut editor = create_editor()?;

    loop {
        let input = match editor.readline("You: ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted) => break,
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        };

        if input.trim().is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(&input);

        let command = ReplCommand::parse(&input);
        if command == ReplCommand::Exit {
            println!("\nGoodbye! 👋");
            break;
        }
        if let Err(e) = execute(session, command, show_logs) {
            helpers::clear_thinking();
            eprintln!("\n❌ Error: {e:#}\n");
        }
    }

    save_history(&mut editor);

    Ok(())
}

fn execute(session: &AgentSession, command: ReplCommand, show_logs: bool) -> Result<()> {
    match command {
        ReplCommand::Exit => {}
        ReplCommand::Help => println!("\n{HELP}\n"),
        ReplCommand::Usage(usage) => println!("\n  usage: {usage}\n"),
        ReplCommand::Tools => {
            let tools: Vec<ToolSpec> = session.call(|agent| {
                async move { agent.tools().list_tools().await.into_values().collect() }.boxed_local()
            })?;
            helpers::print_tools(&tools);
        }
        ReplCommand::MemOps => {
            let rows = session.call(|agent| {
                async move {
                    agent
                        .memory()
                        .list_operations()
                        .into_iter()
                        .map(|op| (op.name.clone(), op.description.clone()))
                        .collect::<Vec<_>>()
                }
                .boxed_local()
            })?;
            helpers::print_catalogue("Memory operations", &rows);
        }
        ReplCommand::TaskNew(kind) => {
            let created = session.call(move |agent| {
                async move {
                    let id = agent.tasks_mut().new_task(&kind);
                    if id.is_some() {
                        if let Err(e) = agent.tasks().save().await {
                            warn!(error = %e, "Failed to save tasks");
                        }
                    }
                    id
                }
                .boxed_local()
            })?;
            match created {
                Some(id) => println!("\n  Created task {id}; it is now the working task.\n"),
                None => println!("\n  Unknown task kind (expected plan or research).\n"),
            }
        }
        ReplCommand::TaskLoad(id) => {
            let loaded = session.call(move |agent| {
                async move {
                    let loaded = agent.tasks_mut().load_task(id);
                    if loaded {
                        if let Err(e) = agent.tasks().save().await {
                            warn!(error = %e, "Failed to save tasks");
                        }
                    }
                    loaded
                }
                .boxed_local()
            })?;
            if loaded {
                println!("\n  Task {id} is now the working task.\n");
            } else {
                println!("\n  No task with id {id}.\n");
            }
        }
        ReplCommand::Tasks => {
            let tasks = session.call(|agent| async move { agent.tasks().summaries() }.boxed_local())?;
            helpers::print_tasks(&tasks);
        }
        ReplCommand::Memory => {
            let overview = session.call(|agent| async move { agent.memory().overview() }.boxed_local())?;
            helpers::print_memory(&overview);
        }
        ReplCommand::MemoryRefresh => {
            if !show_logs {
                helpers::print_thinking();
            }
            let refreshed = session.call(|agent| {
                async move { agent.refresh_memory().await.map_err(|e| format!("{e:#}")) }.boxed_local()
            })?;
            helpers::clear_thinking();
            match refreshed {
                Ok(()) => println!("\n  Memory refreshed.\n"),
                Err(e) => println!("\n  Memory refresh failed: {e}\n"),
            }
        }
        ReplCommand::Query(query) => {
            debug!(input = %query, "processing input");
            if !show_logs {
                helpers::print_thinking();
            }
            let response = session.query(&query)?;
            helpers::clear_thinking();
            helpers::print_response(&response);
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────
// History
// ─────────────────────────────────────────────

/// Create a rustyline editor with history.
fn create_editor() -> Result<Editor<(), DefaultHistory>> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;

    let history_path = history_path();
    if history_path.exists() {
        let _ = editor.load_history(&history_path);
        debug!("loaded REPL history from {}", history_path.display());
    }

    Ok(editor)
}

/// Save history to disk.
fn save_history(editor: &mut Editor<(), DefaultHistory>) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

/// Path to the history file.
fn history_path() -> std::path::PathBuf {
    pulsar_core::utils::get_home_path().join("history").join("cli_history")
}

/// Check if input is an exit command.
fn is_exit_command(input: &str) -> bool {
    let lower = input.to_lowercase();
    EXIT_COMMANDS.contains(&lower.as_str())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
