pub mod completions;
pub mod copy;
pub mod destinations;
pub mod man_pages;
pub mod preview;
pub mod search;
pub mod serve;
pub mod sources;
pub mod transformations;

use geosync_core::{CopyError, OutputFormat};
use geosync_remote::{AppConfig, CONFIG_ENV_VAR};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_PRECONDITION_ERROR: u8 = 3;
pub const EXIT_REMOTE_ERROR: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// `--config`, else `$GEOSYNC_CONFIG`, else an empty configuration.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, String> {
    match path {
        Some(path) => AppConfig::load(path),
        None => AppConfig::load_from_env(CONFIG_ENV_VAR),
    }
    .map_err(|e| e.to_string())
}

/// Process exit code for a failed copy or preview.
pub fn exit_code_for(err: &CopyError) -> u8 {
    match err {
        CopyError::Url { .. } | CopyError::Config { .. } => EXIT_CONFIG_ERROR,
        CopyError::Param { .. } => EXIT_PRECONDITION_ERROR,
        CopyError::Auth { .. }
        | CopyError::Remote { .. }
        | CopyError::Transport { .. }
        | CopyError::Format { .. }
        | CopyError::Protocol { .. } => EXIT_REMOTE_ERROR,
        CopyError::InvalidTransition { .. } => EXIT_FAILURE,
    }
}

/// Report a failed request: the JSON error object on stdout, or the
/// transcript and error line on stderr.
pub fn report_failure(err: &CopyError, json: bool) -> u8 {
    if json {
        let reply = geosync_server::error_reply(err, OutputFormat::Json);
        println!("{}", reply.body_str());
    } else {
        for record in err.operations() {
            eprintln!("{}", colorize_line(&record.format_line()));
        }
        eprintln!("error: {err}");
    }
    exit_code_for(err)
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("✗ {msg}"));
}

/// Highlight success records in an operation transcript.
pub fn colorize_line(line: &str) -> String {
    use console::Style;
    if line.contains("] OK: ") {
        Style::new().green().apply_to(line).to_string()
    } else if line.starts_with("[General] Session opened") {
        Style::new().dim().apply_to(line).to_string()
    } else {
        line.to_owned()
    }
}
