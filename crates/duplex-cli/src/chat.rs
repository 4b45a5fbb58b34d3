//! `duplex chat`: a live conversation on the terminal.
//!
//! Lines typed at the prompt (via `rustyline`, with persistent history) are
//! sent as text input; model output is rendered to stdout as it streams.
//! "exit", Ctrl-D or Ctrl-C end the conversation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

use duplex_agent::{BidiAgent, BidiInput, BidiOutput, CalculatorTool};
use duplex_core::config::load_config;
use duplex_core::types::{InputEvent, ModelEvent};
use duplex_models::ScriptedSession;

use crate::helpers;

/// Exit commands (case-insensitive match).
const EXIT_COMMANDS: &[&str] = &["exit", "quit", "/exit", "/quit", ":q"];

/// Run the chat command.
pub async fn run(system_prompt: Option<String>, no_reconnect: bool) -> Result<()> {
    let mut config = load_config(None).agent;
    if no_reconnect {
        config.enable_reconnection = false;
    }

    let session = Arc::new(ScriptedSession::new());
    let mut builder = BidiAgent::builder(session)
        .config(config)
        .tool(Arc::new(CalculatorTool::new()));
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    let agent = Arc::new(builder.build());

    helpers::print_banner("scripted", &agent.tool_names());

    let input = PromptInput::new(agent.clone());
    let inputs: Vec<Box<dyn BidiInput>> = vec![Box::new(input)];
    let outputs: Vec<Box<dyn BidiOutput>> = vec![Box::new(ConsoleOutput)];

    tokio::select! {
        result = agent.run(inputs, outputs) => {
            result.context("conversation failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            agent.end().await;
        }
    }

    println!("\nGoodbye!");
    Ok(())
}

// ─────────────────────────────────────────────
// Input: readline prompt
// ─────────────────────────────────────────────

/// What a typed line asks for.
#[derive(Debug, PartialEq)]
enum Command {
    Exit,
    Interrupt,
    Skip,
    Say(String),
}

fn parse_line(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Skip;
    }
    let lower = trimmed.to_lowercase();
    if EXIT_COMMANDS.contains(&lower.as_str()) {
        Command::Exit
    } else if lower == "/interrupt" {
        Command::Interrupt
    } else {
        Command::Say(trimmed.to_string())
    }
}

/// Text lines typed at the prompt, read on a dedicated thread.
struct PromptInput {
    agent: Arc<BidiAgent>,
    lines: mpsc::UnboundedReceiver<String>,
}

impl PromptInput {
    fn new(agent: Arc<BidiAgent>) -> Self {
        let (tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || read_lines(tx));
        Self { agent, lines }
    }
}

#[async_trait]
impl BidiInput for PromptInput {
    async fn read(&mut self) -> Result<Option<InputEvent>> {
        while let Some(line) = self.lines.recv().await {
            match parse_line(&line) {
                Command::Exit => return Ok(None),
                Command::Interrupt => {
                    if let Err(e) = self.agent.interrupt().await {
                        eprintln!("{}", format!("Error: {e}").red());
                    }
                }
                Command::Skip => {}
                Command::Say(text) => return Ok(Some(InputEvent::Text(text))),
            }
        }
        Ok(None)
    }
}

/// Readline loop. Dropping `tx` (Ctrl-C, Ctrl-D, "exit") ends the input.
fn read_lines(tx: mpsc::UnboundedSender<String>) {
    let mut editor = match create_editor() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}", format!("Input error: {e}").red());
            return;
        }
    };

    loop {
        match editor.readline("You: ") {
            Ok(line) => {
                let exit = parse_line(&line) == Command::Exit;
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                if tx.send(line).is_err() || exit {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", format!("Input error: {e}").red());
                break;
            }
        }
    }

    save_history(&mut editor);
}

/// Create a rustyline editor with history.
fn create_editor() -> Result<DefaultEditor> {
    let mut editor = DefaultEditor::new()?;
    editor.set_max_history_size(1000)?;
    let path = history_path();
    if path.exists() {
        let _ = editor.load_history(&path);
        debug!("loaded chat history from {}", path.display());
    }
    Ok(editor)
}

fn save_history(editor: &mut DefaultEditor) {
    let path = history_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = editor.save_history(&path) {
        debug!("failed to save history: {e}");
    }
}

/// Path to the history file.
fn history_path() -> PathBuf {
    duplex_core::utils::get_data_path().join("history").join("chat_history")
}

// ─────────────────────────────────────────────
// Output: console
// ─────────────────────────────────────────────

struct ConsoleOutput;

#[async_trait]
impl BidiOutput for ConsoleOutput {
    async fn write(&mut self, event: &ModelEvent) -> Result<()> {
        if let Some(line) = helpers::render_event(event) {
            println!("{line}");
        } else {
            debug!(event = event.event_type(), "event not rendered");
        }
        Ok(())
    }
}
