//! Setup/initialization module - handles application startup tasks
//!
//! Includes:
//! - Logger initialization
//! - FFmpeg/FFprobe availability check
//! - Folder structure initialization

use anstyle::{AnsiColor, Style};
use anyhow::{Context, Result};
use env_logger::{Builder, WriteStyle};
use log::kv::Key;
use log::{LevelFilter, error, info};
use std::io::Write;
use std::process::Command;

use crate::config::AppConfig;

const DIM: Style = AnsiColor::BrightBlack.on_default();
const DURATION: Style = AnsiColor::Cyan.on_default();

// ────────────────────────────────────────────────────────────────
// Logger Initialization
// ────────────────────────────────────────────────────────────────

/// Human-readable two-decimal rendering of a `duration` key value such as `12.3456ms`.
fn format_duration(raw: &str) -> String {
    if let Some(idx) = raw.find(|c: char| c.is_alphabetic() || c == 'µ') {
        let (num, unit) = (&raw[..idx], &raw[idx..]);
        if let Ok(val) = num.parse::<f32>() {
            return format!("{:.2} {}", val, unit);
        }
    }
    raw.to_string()
}

/// Install the global logger. Calling it twice is harmless.
pub fn initialize_logger(level: LevelFilter) {
    let result = Builder::new()
        .write_style(WriteStyle::Auto)
        .format(|buf, record| {
            let ts = buf.timestamp();
            let level_style = buf.default_level_style(record.level());

            // Extract raw duration and format to 2 decimal places
            let dur_raw = record
                .key_values()
                .get(Key::from("duration"))
                .map(|v| format_duration(&v.to_string()))
                .unwrap_or_default();

            let dur = if dur_raw.is_empty() {
                " ".repeat(10)
            } else {
                format!("{DURATION}{:>10}{DURATION:#}", dur_raw)
            };

            writeln!(
                buf,
                "{DIM}{}{DIM:#} {level_style}{:<5}{level_style:#} {DIM}{}{DIM:#}",
                ts,
                record.level(),
                record.target()
            )?;

            let message = record.args().to_string();
            let subsequent_indent = " ".repeat(11);
            let mut lines = message.lines();
            if let Some(first_line) = lines.next() {
                writeln!(buf, "{} {}", dur, first_line)?;
            }
            for line in lines {
                writeln!(buf, "{}{}", subsequent_indent, line)?;
            }
            Ok(())
        })
        .filter(None, level)
        .filter(Some("reqwest"), LevelFilter::Warn)
        .filter(Some("hyper"), LevelFilter::Warn)
        .filter(Some("hyper_util"), LevelFilter::Warn)
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}

// ────────────────────────────────────────────────────────────────
// FFmpeg Check
// ────────────────────────────────────────────────────────────────

/// Check if ffmpeg and ffprobe are available in PATH. Videos cannot be processed without them.
pub fn check_ffmpeg_and_ffprobe() -> bool {
    let mut available = true;
    for command in &["ffmpeg", "ffprobe"] {
        match Command::new(command).arg("-version").output() {
            Ok(output) if output.status.success() => {
                let version_info = String::from_utf8_lossy(&output.stdout);
                let version_number = version_info
                    .lines()
                    .next()
                    .unwrap_or("Unknown version")
                    .split_whitespace()
                    .nth(2)
                    .unwrap_or("Unknown");
                info!("{} version: {}", command, version_number);
            }
            Ok(_) => {
                available = false;
                error!(
                    "`{}` command was found, but it returned an error. Video captures will fail until it is fixed.",
                    command
                );
            }
            Err(_) => {
                available = false;
                error!(
                    "`{}` is not installed or not available in PATH. Video captures will fail until it is installed.",
                    command
                );
            }
        }
    }
    available
}

// ────────────────────────────────────────────────────────────────
// Folder Initialization
// ────────────────────────────────────────────────────────────────

/// Create the artifact folders and the database folder.
pub fn initialize_folder(config: &AppConfig) -> Result<()> {
    let mut folders = vec![config.thumbs_dir(), config.output_dir()];
    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        folders.push(parent.to_path_buf());
    }
    for folder in folders {
        std::fs::create_dir_all(&folder)
            .with_context(|| format!("failed to create folder {:?}", folder))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn durations_are_rounded() {
        assert_eq!(format_duration("12.3456ms"), "12.35 ms");
        assert_eq!(format_duration("1.5s"), "1.50 s");
        assert_eq!(format_duration("n/a"), "n/a");
    }

    #[test]
    fn folders_are_created_under_the_watched_directory() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            directory: dir.path().to_path_buf(),
            db_path: dir.path().join("db/photopusher.redb"),
            ..AppConfig::default()
        };

        initialize_folder(&config).unwrap();

        assert!(dir.path().join("thumbs").is_dir());
        assert!(dir.path().join("output").is_dir());
        assert!(dir.path().join("db").is_dir());
    }
}
