//! Argument parsing for the `modinstall` binary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the installation state recorded in the registry.
    State { dir: Option<PathBuf>, json: bool },
    /// Print the digest of a file, the way registration computes it.
    Digest { file: PathBuf },
    /// Replay a timeline topic in creation order.
    Replay {
        topic: String,
        dir: Option<PathBuf>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    },
    /// Create or upgrade a state directory.
    Bootstrap { dir: Option<PathBuf> },
    /// Validate and print the effective settings.
    CheckSettings { dir: Option<PathBuf> },
    Help,
}

pub const USAGE: &str = "\
Usage:
  modinstall state [--dir DIR] [--json]
  modinstall digest <file>
  modinstall replay <topic> [--dir DIR] [--until RFC3339] [--limit N]
  modinstall bootstrap [--dir DIR]
  modinstall check-settings [--dir DIR]
  modinstall help

DIR defaults to $MODINSTALL_STATE_DIR, then ~/.local/state/modinstall.";

/// Parse arguments (without the program name) into a `Command`.
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'modinstall help' for usage.".into());
    }
    match args[0] {
        "state" => parse_state(&args[1..]),
        "digest" => parse_digest(&args[1..]),
        "replay" => parse_replay(&args[1..]),
        "bootstrap" => Ok(Command::Bootstrap {
            dir: parse_dir_only(&args[1..], "bootstrap")?,
        }),
        "check-settings" => Ok(Command::CheckSettings {
            dir: parse_dir_only(&args[1..], "check-settings")?,
        }),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("Unknown command: '{}'", other)),
    }
}

// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `modinstall state [--dir DIR] [--json]`
fn parse_state(args: &[&str]) -> Result<Command, String> {
    let mut dir = None;
    let mut json = false;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--dir" => {
                dir = Some(PathBuf::from(value(args, i, "--dir")?));
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            other => return Err(format!("state: unexpected argument '{}'", other)),
        }
    }
    Ok(Command::State { dir, json })
}

/// `modinstall digest <file>`
fn parse_digest(args: &[&str]) -> Result<Command, String> {
    match args {
        [file] => Ok(Command::Digest {
            file: PathBuf::from(file),
        }),
        _ => Err("Usage: modinstall digest <file>".into()),
    }
}

/// `modinstall replay <topic> [--dir DIR] [--until T] [--limit N]`
fn parse_replay(args: &[&str]) -> Result<Command, String> {
    let topic = match args.first() {
        Some(t) if !t.starts_with("--") => t.to_string(),
        _ => return Err("Usage: modinstall replay <topic> [--dir DIR] [--until RFC3339] [--limit N]".into()),
    };
    let mut dir = None;
    let mut until = None;
    let mut limit = None;
    let mut i = 1;
    while i < args.len() {
        match args[i] {
            "--dir" => dir = Some(PathBuf::from(value(args, i, "--dir")?)),
            "--until" => {
                let raw = value(args, i, "--until")?;
                let t = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| format!("--until: invalid timestamp '{}': {}", raw, e))?;
                until = Some(t.with_timezone(&Utc));
            }
            "--limit" => {
                let raw = value(args, i, "--limit")?;
                limit = Some(
                    raw.parse::<usize>()
                        .map_err(|_| format!("--limit: not a number: '{}'", raw))?,
                );
            }
            other => return Err(format!("replay: unexpected argument '{}'", other)),
        }
        i += 2;
    }
    Ok(Command::Replay {
        topic,
        dir,
        until,
        limit,
    })
}

fn parse_dir_only(args: &[&str], name: &str) -> Result<Option<PathBuf>, String> {
    match args {
        [] => Ok(None),
        ["--dir", d] => Ok(Some(PathBuf::from(d))),
        _ => Err(format!("Usage: modinstall {} [--dir DIR]", name)),
    }
}

fn value<'a>(args: &[&'a str], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .copied()
        .ok_or_else(|| format!("{} requires a value", flag))
}
