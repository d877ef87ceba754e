//! Colored CLI display utilities for supervised runs.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::identity::Identity;
use crate::process::StdioKind;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to at most `max_len` characters, adding an ellipsis
/// if anything was cut.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Render a command line for display.
#[must_use]
pub fn format_command(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            line.push_str(&format!("{arg:?}"));
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Print that a process has been started.
pub fn print_process_start(pid: u32, command_line: &str) {
    println!(
        "{} {} pid={} {}",
        timestamp().dimmed(),
        "[START]".blue().bold(),
        pid.cyan(),
        truncate(command_line, 120).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print captured output of one stream.
pub fn print_output(kind: StdioKind, output: &[u8]) {
    if output.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(output);
    match kind {
        StdioKind::Stdout => print!("{text}"),
        StdioKind::Stderr => print!("{}", text.yellow()),
    }
    if !text.ends_with('\n') {
        println!();
    }
    let _ = io::stdout().flush();
}

/// Print the outcome of a run.
pub fn print_exit(pid: Option<u32>, error: Option<&str>) {
    let ts = timestamp();
    let pid = pid.map_or_else(|| "-".to_string(), |p| p.to_string());
    match error {
        None => println!(
            "{} {} pid={} {}",
            ts.dimmed(),
            "[EXIT]".green().bold(),
            pid,
            "ok".green()
        ),
        Some(message) => println!(
            "{} {} pid={} {}",
            ts.dimmed(),
            "[EXIT]".red().bold(),
            pid,
            truncate(message, 200).red()
        ),
    }
    let _ = io::stdout().flush();
}

/// Print a resolved identity.
pub fn print_identity(identity: &Identity) {
    println!(
        "{} uid={} gid={} home={}",
        identity.username().bold(),
        identity.uid(),
        identity.gid(),
        identity.home_dir().display()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
