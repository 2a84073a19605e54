/**
 * CONSOLE - Line-oriented front end: command parsing and a plain-text fleet table.
 */

use crate::edit::EditState;
use crate::viewer::Viewer;
use clustil_protocol::{DeviceKey, Metrics};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Edit(DeviceKey, String),
    Submit(DeviceKey),
    Cancel(DeviceKey),
    Quit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("expected <node>/<device>, got {0:?}")]
    BadTarget(String),
    #[error("missing <node>/<device>")]
    MissingTarget,
}

fn parse_target(word: Option<&str>) -> Result<DeviceKey, CommandError> {
    let word = word.ok_or(CommandError::MissingTarget)?;
    match word.split_once('/') {
        Some((node, device)) if !node.is_empty() && !device.is_empty() => Ok(DeviceKey::new(node, device)),
        _ => Err(CommandError::BadTarget(word.to_string())),
    }
}

/// `list`, `edit <node>/<device> <text...>`, `submit <node>/<device>`,
/// `cancel <node>/<device>`, `quit`. `None` for a blank line.
pub fn parse_command(line: &str) -> Option<Result<Command, CommandError>> {
    let line = line.trim_start();
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let verb = verb.trim();
    if verb.is_empty() {
        return None;
    }
    let rest = rest.trim_start();
    let (target, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let target = Some(target).filter(|t| !t.is_empty());

    let command = match verb {
        "list" | "ls" => Ok(Command::List),
        "quit" | "exit" => Ok(Command::Quit),
        "edit" => parse_target(target).map(|key| Command::Edit(key, text.trim_end().to_string())),
        "submit" => parse_target(target).map(Command::Submit),
        "cancel" => parse_target(target).map(Command::Cancel),
        other => Err(CommandError::Unknown(other.to_string())),
    };
    Some(command)
}

fn metrics_cell(metrics: Option<&Metrics>) -> String {
    match metrics {
        Some(m) => format!(
            "{:>3.0}C {:>3.0}% {:.1}/{:.1}GB",
            m.temperature, m.utilization, m.memory.used, m.memory.total
        ),
        None => "offline".to_string(),
    }
}

pub fn render(viewer: &Viewer) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[{}] {} nodes", viewer.status(), viewer.nodes().len());
    for node in viewer.nodes() {
        let _ = writeln!(out, "{} ({}) {}", node.id, node.name, metrics_cell(node.metrics()));
        for device in &node.gpus {
            let key = DeviceKey::new(&node.id, &device.id);
            let memo = viewer.memo_text(&key);
            let state = match viewer.edit_state(&key) {
                EditState::Idle => String::new(),
                other => format!(" [{other}]"),
            };
            let by = device
                .editor
                .as_ref()
                .map(|e| format!(" ({})", e.name))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<10} {:<20} {}  memo: {memo}{by}{state}",
                device.id,
                device.name,
                metrics_cell(device.metrics())
            );
        }
    }
    out
}
