//! REPL – the interactive shell of the reference host.
//!
//! Supported slash-commands:
//!   /help                – show this list
//!   /list                – show every known shutter
//!   /stop <id>           – halt a shutter
//!   /level <id> <0-100>  – move a shutter to a level
//!   /refresh             – run inventory discovery again
//!   /quit | /exit        – leave the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use calyps_runtime::SyncEngine;
use calyps_types::{Level, MotionState, ShutterCommand, TwinChange};
use tokio::runtime::Handle;

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Stop(String),
    Level(String, Level),
    Refresh,
    Quit,
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let args: Vec<&str> = words.collect();

    match (head, args.as_slice()) {
        ("/help", []) => Ok(Command::Help),
        ("/list", []) => Ok(Command::List),
        ("/refresh", []) => Ok(Command::Refresh),
        ("/quit" | "/exit", []) => Ok(Command::Quit),
        ("/stop", [id]) => Ok(Command::Stop(id.to_string())),
        ("/level", [id, level]) => Level::parse(level)
            .map(|level| Command::Level(id.to_string(), level))
            .map_err(|e| e.to_string()),
        ("/stop", _) => Err("usage: /stop <id>".to_string()),
        ("/level", _) => Err("usage: /level <id> <0-100>".to_string()),
        (other, _) => Err(format!("unknown command '{other}'")),
    }
}

/// Entry point for the interactive REPL.
///
/// Engine calls are driven on `runtime`.  `shutdown` is polled each
/// iteration; when set the REPL exits cleanly.
pub fn run(shutdown: Arc<AtomicBool>, runtime: &Handle, engine: &SyncEngine) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "calyps>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Ok(Command::Help) => cmd_help(),
            Ok(Command::List) => cmd_list(engine),
            Ok(Command::Stop(id)) => cmd_send(runtime, engine, &id, ShutterCommand::Stop),
            Ok(Command::Level(id, level)) => {
                cmd_send(runtime, engine, &id, ShutterCommand::Level(level))
            }
            Ok(Command::Refresh) => cmd_refresh(runtime, engine),
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    e.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Calyps Commands".bold().underline());
    println!("  {}                – show every known shutter", "/list".bold().cyan());
    println!("  {}           – halt a shutter", "/stop <id>".bold().cyan());
    println!("  {}  – move a shutter", "/level <id> <0-100>".bold().cyan());
    println!("  {}             – run inventory discovery again", "/refresh".bold().cyan());
    println!("  {}        – exit the shell", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_list(engine: &SyncEngine) {
    let twins = engine.snapshots();
    if twins.is_empty() {
        println!("  {}", "No shutters known yet. Try /refresh.".dimmed());
        return;
    }
    for twin in &twins {
        println!("  {}", describe(twin));
    }
}

fn cmd_send(runtime: &Handle, engine: &SyncEngine, id: &str, command: ShutterCommand) {
    match runtime.block_on(engine.dispatch(id, command)) {
        Ok(_) => println!("  {} {} sent to {}", "✓".green().bold(), command.action(), id.bold()),
        Err(e) => println!("  {}: {}", "Command failed".red(), e),
    }
}

fn cmd_refresh(runtime: &Handle, engine: &SyncEngine) {
    println!("  Refreshing inventory …");
    match runtime.block_on(engine.refresh_inventory()) {
        Ok(report) => println!(
            "  {} {} new, {} updated, {} skipped",
            "✓".green().bold(),
            report.created,
            report.updated,
            report.rejected
        ),
        Err(e) => println!("  {}: {}", "Discovery failed".red(), e),
    }
}

/// One-line rendering of a twin.
pub fn describe(twin: &TwinChange) -> String {
    let motion = match twin.motion {
        MotionState::Stopped => twin.motion.to_string().dimmed(),
        MotionState::Increasing | MotionState::Decreasing => twin.motion.to_string().yellow(),
    };
    let mut line = format!(
        "{:<8} {:<24} {:>3}% → {:>3}%  {}",
        twin.identity,
        twin.display_name,
        twin.current_level.get(),
        twin.target_level.get(),
        motion
    );
    if let Some(manufacturer) = &twin.manufacturer {
        line.push_str(&format!("  ({manufacturer})"));
    }
    line
}
