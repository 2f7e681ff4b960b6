//! Interactive question loop over one document at a time.
//!
//! Lines are questions unless they are one of the commands below. Errors
//! from a single question or switch are printed and the loop continues.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `/list` | list available documents, numbered from 1 |
//! | `/switch <name or number>` | change the active document |
//! | `/reload` | force-rebuild the active document's index |
//! | `/current` | show the active document |
//! | `/help` | show this table |
//! | `exit` | leave the loop |

use std::io::{BufRead, Write};

use anyhow::Result;

use crate::indexer::{IndexHandle, IndexManager};
use crate::llm::LanguageModel;
use crate::query::{self, QueryOptions};

const HELP: &str = "Commands:
  /list                   list available documents
  /switch <name|number>   chat with another document
  /reload                 rebuild the current document's index
  /current                show the current document
  exit                    leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Exit,
    Help,
    Current,
    List,
    /// Argument as typed, if any.
    Switch(Option<String>),
    Reload,
    Ask(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head.to_lowercase(), rest.trim()),
        None => (line.to_lowercase(), ""),
    };

    match head.as_str() {
        "exit" | "quit" | "/exit" | ":q" if rest.is_empty() => Command::Exit,
        "/help" | "help" if rest.is_empty() => Command::Help,
        "/current" if rest.is_empty() => Command::Current,
        "/list" | "/files" if rest.is_empty() => Command::List,
        "/reload" if rest.is_empty() => Command::Reload,
        "/switch" | "/open" => Command::Switch(Some(rest.to_string()).filter(|r| !r.is_empty())),
        _ => Command::Ask(line.to_string()),
    }
}

/// Resolve a 1-based number or an exact name against `files`.
pub fn resolve_choice(choice: &str, files: &[String]) -> Option<String> {
    let choice = choice.trim();
    if let Ok(n) = choice.parse::<usize>() {
        if (1..=files.len()).contains(&n) {
            return Some(files[n - 1].clone());
        }
    }
    files.iter().find(|f| f.as_str() == choice).cloned()
}

/// Run the loop for `file`, reading lines from `input` until `exit` or EOF.
pub async fn run_chat<R: BufRead, W: Write>(
    manager: &IndexManager,
    llm: &dyn LanguageModel,
    options: QueryOptions,
    file: &str,
    mut input: R,
    mut out: W,
) -> Result<()> {
    let mut handle = manager.ensure_file_index(file, false).await?;
    writeln!(out, "Chatting with {} (type /help for commands, exit to leave)", handle.key)?;

    loop {
        write!(out, "\n> ")?;
        out.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        match parse_command(&line) {
            Command::Empty => {}
            Command::Exit => break,
            Command::Help => writeln!(out, "{}", HELP)?,
            Command::Current => writeln!(out, "Current document: {}", handle.key)?,
            Command::List => {
                let files = manager.list_files()?;
                if files.is_empty() {
                    writeln!(out, "No supported documents (.pdf, .txt, .md)")?;
                }
                for (i, f) in files.iter().enumerate() {
                    writeln!(out, "  {}. {}", i + 1, f)?;
                }
            }
            Command::Switch(arg) => {
                let files = manager.list_files()?;
                let Some(target) = arg.and_then(|a| resolve_choice(&a, &files)) else {
                    writeln!(out, "Give a valid document name or number (see /list)")?;
                    continue;
                };
                writeln!(out, "Switching to {}", target)?;
                replace_handle(&mut handle, manager.ensure_file_index(&target, false).await, &mut out)?;
            }
            Command::Reload => {
                writeln!(out, "Rebuilding index for {}", handle.key)?;
                let key = handle.key.clone();
                replace_handle(&mut handle, manager.ensure_file_index(&key, true).await, &mut out)?;
            }
            Command::Ask(question) => {
                let result = query::answer(
                    handle.store.as_ref(),
                    manager.embedder().as_ref(),
                    llm,
                    &question,
                    &options,
                )
                .await;
                match result {
                    Ok(answer) => {
                        writeln!(out, "{}", answer.answer)?;
                        if !answer.sources.is_empty() {
                            writeln!(out, "Sources: {}", answer.sources.join(", "))?;
                        }
                    }
                    Err(e) => writeln!(out, "Error: {}", e)?,
                }
            }
        }
    }

    Ok(())
}

fn replace_handle<W: Write>(
    handle: &mut IndexHandle,
    result: crate::error::Result<IndexHandle>,
    out: &mut W,
) -> Result<()> {
    match result {
        Ok(new) => *handle = new,
        Err(e) => writeln!(out, "Error: {}", e)?,
    }
    Ok(())
}
