//! Terminal output adapters: a `ProgressSink`/`StreamSink` pair for the
//! CLI, plus the header/success/warning/error helpers used by the
//! subcommand handlers. Grounded directly on shipit's `output/mod.rs`
//! (the same `console::style` color choices and bullet glyphs, and the
//! same `create_spinner` use of `indicatif` for whichever step is
//! currently running), adapted from "steps out of N" headers to the
//! core's `Phase`/`Level` vocabulary.

use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::progress::{Level, Phase, ProgressEvent, ProgressSink, StreamSink};

pub fn header(message: &str) {
    println!("\n{}", style(message).bold().underlined());
}

pub fn success(message: &str) {
    println!("{} {message}", style("✓").green().bold());
}

pub fn warning(message: &str) {
    println!("{} {message}", style("!").yellow().bold());
}

pub fn error(message: &str) {
    eprintln!("{} {message}", style("✗").red().bold());
}

pub fn info(message: &str) {
    println!("  {message}");
}

/// Spinner for whichever phase is currently running, grounded on
/// shipit's `output::create_spinner`.
fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Renders `ProgressEvent`s emitted by the Deployer as they happen. Each
/// `info`-level phase gets a spinner for as long as it's the most
/// recently started one; a `warning`/`error`/`success` event (or the
/// next phase starting) clears it and prints a static line in its place.
pub struct TerminalProgressSink {
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalProgressSink {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }
}

impl Default for TerminalProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgressSink {
    fn emit(&self, event: ProgressEvent) {
        let phase_label = phase_label(event.phase);
        let line = format!("[{phase_label}] {}", event.message);

        let mut slot = self.spinner.lock().unwrap();
        if let Some(pb) = slot.take() {
            pb.finish_and_clear();
        }

        match event.level {
            Level::Info => *slot = Some(create_spinner(&line)),
            Level::Verbose => {
                if std::env::var_os("OTTERSTACK_VERBOSE").is_some() {
                    info(&line);
                }
            }
            Level::Warning => warning(&line),
            Level::Error => error(&line),
            Level::Success => success(&line),
        }
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Initializing => "init",
        Phase::Fetching => "fetch",
        Phase::Resolving => "resolve",
        Phase::Worktree => "worktree",
        Phase::Validating => "validate",
        Phase::Pulling => "pull",
        Phase::Starting => "up",
        Phase::HealthCheck => "health",
        Phase::Traefik => "routing",
        Phase::Cleanup => "cleanup",
        Phase::Complete => "done",
        Phase::Failed => "failed",
    }
}

/// Forwards streamed Compose/git subprocess output to the terminal,
/// dimmed so it reads as secondary to the progress lines above it.
pub struct TerminalStreamSink;

impl TerminalStreamSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalStreamSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSink for TerminalStreamSink {
    fn on_stdout(&self, line: &str) {
        println!("{}", style(line).dim());
    }

    fn on_stderr(&self, line: &str) {
        eprintln!("{}", style(line).dim());
    }
}
