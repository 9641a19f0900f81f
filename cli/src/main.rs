//! modinstall: operator tool for an installer state directory.
//!
//! # Usage
//!
//! ```text
//! modinstall bootstrap --dir /var/lib/modinstall
//! modinstall state --json
//! modinstall digest bundles/org.a-1.0.0.jar
//! modinstall replay org/jobs/import --until 2024-05-01T10:00:00Z
//! ```

mod command;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

use modinstall_core::bootstrap::{ensure_state_dir, BootstrapStatus};
use modinstall_core::data::StateDir;
use modinstall_core::digest::{digest_properties, digest_reader};
use modinstall_core::registry::{ResourceGroup, ResourceRegistry};
use modinstall_core::resource::properties::{detect_kind, parse_config};
use modinstall_core::timeline::{JobRecord, TopicTraverser, Visit};
use modinstall_core::types::resource::ResourceKind;
use tracing_subscriber::EnvFilter;

use command::{parse_args, Command, USAGE};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    let cmd = match parse_args(&arg_refs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("modinstall: {}", e);
            process::exit(1);
        }
    };

    let result = match cmd {
        Command::State { dir, json } => show_state(&resolve_state_dir(dir), json),
        Command::Digest { file } => show_digest(&file),
        Command::Replay {
            topic,
            dir,
            until,
            limit,
        } => replay(&resolve_state_dir(dir), &topic, until, limit),
        Command::Bootstrap { dir } => bootstrap(&resolve_state_dir(dir)),
        Command::CheckSettings { dir } => check_settings(&resolve_state_dir(dir)),
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("modinstall error: {}", e);
        process::exit(1);
    }
}

fn resolve_state_dir(dir: Option<PathBuf>) -> PathBuf {
    if let Some(d) = dir {
        return d;
    }
    if let Ok(dir) = std::env::var("MODINSTALL_STATE_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".local").join("state").join("modinstall")
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn show_state(root: &Path, json: bool) -> Result<(), String> {
    let state_dir = StateDir::open(root).map_err(|e| e.to_string())?;
    let path = state_dir.registry_path();
    if !path.exists() {
        return Err(format!("no registry at {}", path.display()));
    }
    let state = ResourceRegistry::open(&path).installation_state();

    if json {
        let out = serde_json::to_string_pretty(&state).map_err(|e| e.to_string())?;
        println!("{}", out);
        return Ok(());
    }

    if state.active.is_empty() && state.installed.is_empty() {
        println!("(no resources)");
        return Ok(());
    }
    print_groups("active", &state.active);
    print_groups("installed", &state.installed);
    if state.is_settled() {
        println!("settled: nothing waiting for a cycle");
    }
    Ok(())
}

fn print_groups(title: &str, groups: &[ResourceGroup]) {
    if groups.is_empty() {
        return;
    }
    println!("{} ({}):", title, groups.len());
    for group in groups {
        println!("  {}", group.entity_id);
        for (i, status) in group.resources.iter().enumerate() {
            let r = &status.resource;
            let marker = if i == 0 { "*" } else { " " };
            println!(
                "    {} {:<40} {:<16} prio={:<4} serial={:<6} {} {}",
                marker,
                r.url(),
                r.version().to_string(),
                r.priority(),
                r.serial(),
                short(r.digest()),
                status.state
            );
        }
    }
}

fn show_digest(file: &Path) -> Result<(), String> {
    let name = file.to_string_lossy();
    let kind = detect_kind(&name).map_err(|e| e.to_string())?;
    let digest = match kind {
        ResourceKind::Module => {
            let f = File::open(file).map_err(|e| format!("cannot open {}: {}", file.display(), e))?;
            digest_reader(f).map_err(|e| e.to_string())?
        }
        ResourceKind::Config => {
            let bytes = std::fs::read(file).map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
            let props = parse_config(&name, &bytes).map_err(|e| e.to_string())?;
            digest_properties(&props).map_err(|e| e.to_string())?
        }
    };
    println!("{}  {} ({})", digest, file.display(), kind);
    Ok(())
}

fn replay(
    root: &Path,
    topic: &str,
    until: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<usize>,
) -> Result<(), String> {
    let state_dir = StateDir::open(root).map_err(|e| e.to_string())?;
    let mut traverser = TopicTraverser::new(&state_dir.timeline_dir());
    if let Some(t) = until {
        traverser = traverser.with_cutoff(t);
    }
    let mut printed = 0usize;
    let summary = traverser
        .traverse_items(topic, |job: JobRecord| {
            println!("{}  #{:<6} {}", job.created.to_rfc3339(), job.sequence, job.id);
            printed += 1;
            match limit {
                Some(n) if printed >= n => Visit::Stop,
                _ => Visit::Continue,
            }
        })
        .map_err(|e| e.to_string())?;
    tracing::info!(
        topic,
        buckets = summary.buckets,
        visited = summary.visited,
        skipped = summary.skipped,
        "replay finished"
    );
    Ok(())
}

fn bootstrap(root: &Path) -> Result<(), String> {
    match ensure_state_dir(root).map_err(|e| e.to_string())? {
        BootstrapStatus::Current => println!("{} is up to date", root.display()),
        BootstrapStatus::Installed => println!("created {}", root.display()),
        BootstrapStatus::Upgraded { from_version } => {
            println!("upgraded {} from settings {}", root.display(), from_version)
        }
    }
    Ok(())
}

fn check_settings(root: &Path) -> Result<(), String> {
    let state_dir = StateDir::open(root).map_err(|e| e.to_string())?;
    state_dir.settings().validate().map_err(|e| e.to_string())?;
    let yaml = serde_yaml::to_string(state_dir.settings()).map_err(|e| e.to_string())?;
    print!("{}", yaml);
    Ok(())
}

fn short(digest: &str) -> &str {
    match digest.char_indices().nth(12) {
        Some((i, _)) => &digest[..i],
        None => digest,
    }
}
