//! `calyps-cli` – reference host for the Calyps synchronization engine.
//!
//! This binary:
//!
//! 1. Loads `~/.calyps/config.toml`, asking for the box URL on first run.
//! 2. Runs inventory discovery once and reports what it found.
//! 3. Keeps the live event channel open in the background and prints every
//!    twin change.
//! 4. Drops the user into an **interactive REPL** (`/list`, `/stop`,
//!    `/level`, `/refresh`, `/help`).
//! 5. Intercepts **Ctrl-C** to leave the shell cleanly.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};

use calyps_runtime::{SyncEngine, init_tracing};

fn main() {
    // Logs go through tracing (RUST_LOG, CALYPS_LOG_FORMAT=json); the shell's
    // own output uses println!.
    let _tracing = init_tracing("calyps");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – leaving the shell …".yellow().bold());
        println!("{}", "  Press Enter to exit.".dimmed());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    let engine = match cfg.engine_config().and_then(SyncEngine::new) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, url = %cfg.url, "cannot build engine");
            println!("{}: {}", "Cannot reach box configuration".red(), e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "cannot start Tokio runtime");
            std::process::exit(1);
        }
    };

    // ── Discovery ─────────────────────────────────────────────────────────
    print!("\n  Discovering shutters at {} … ", cfg.url.dimmed());
    std::io::Write::flush(&mut std::io::stdout()).ok();
    match runtime.block_on(engine.refresh_inventory()) {
        Ok(report) => {
            println!("{} ({} shutter(s))", "online".green(), report.created + report.updated);
            for twin in engine.snapshots() {
                println!("    • {}", repl::describe(&twin));
            }
        }
        Err(e) => {
            println!("{}", "unreachable".yellow());
            println!("  {}  Live updates stay on; try {} later.", e.to_string().dimmed(), "/refresh".bold());
        }
    }

    // ── Live channel and change printer ───────────────────────────────────
    let live = runtime.block_on(async { engine.spawn_live_channel() });
    let mut changes = engine.subscribe();
    runtime.spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => println!("\n  {} {}", "↻".cyan(), repl::describe(&change)),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "change printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(shutdown, runtime.handle(), &engine);

    live.abort();
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Calyps First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's find your box.\n");

    let mut cfg = config::Config::default();
    cfg.url = prompt_line(&format!("  Box URL [{}]: ", cfg.url), &cfg.url);
    config::apply_env_overrides(&mut cfg);

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ______      __                "#.bold().cyan());
    println!("{}", r#"  / ____/___ _/ /_  ______  _____"#.bold().cyan());
    println!("{}", r#" / /   / __ `/ / / / / __ \/ ___/"#.bold().cyan());
    println!("{}", r#"/ /___/ /_/ / / /_/ / /_/ (__  ) "#.bold().cyan());
    println!("{}", r#"\____/\__,_/_/\__, / .___/____/  "#.bold().cyan());
    println!("{}", r#"             /____/_/            "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Calyps".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Shutter sync for CalypsHome boxes");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
