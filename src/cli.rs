use clap::Parser;
use std::path::PathBuf;

use crate::config::AppConfig;

/// Push photos and videos from a watched directory to a collection webserver.
#[derive(Debug, Parser)]
#[command(name = "photopusher", version, about)]
pub struct Cli {
    /// URL of the webserver collecting the captures, e.g. http://192.168.1.3:8080
    pub url: String,

    /// Directory to watch. Defaults to the current directory
    #[arg(short, long, value_parser = existing_directory)]
    pub directory: Option<PathBuf>,

    /// Location of the processed-files database
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Files processed concurrently
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Delay between directory scans
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Skip the `{url}/ping` check at startup
    #[arg(long)]
    pub no_ping: bool,

    /// Forget recorded failures so those files are tried again
    #[arg(long)]
    pub retry_failed: bool,

    /// Also capture frames from this video device channel into the directory
    #[arg(long, value_name = "N")]
    pub capture_channel: Option<u32>,

    /// Delay between device captures
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub capture_interval_ms: u64,
}

fn existing_directory(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else if path.exists() {
        Err(format!("'{}' is not a directory", value))
    } else {
        Err(format!("Directory '{}' does not exist", value))
    }
}

impl Cli {
    /// Command-line values win over the environment and the defaults.
    pub fn apply(&self, config: &mut AppConfig) {
        config.base_url = self.url.clone();
        if let Some(directory) = &self.directory {
            config.directory = directory.clone();
        }
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(poll_interval_ms) = self.poll_interval_ms {
            config.poll_interval_ms = poll_interval_ms;
        }
        if self.no_ping {
            config.ping = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn url_is_required() {
        let err = Cli::try_parse_from(["photopusher"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_directory_is_a_usage_error() {
        let err = Cli::try_parse_from(["photopusher", "http://host", "-d", "/no/such/dir"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn flags_override_the_config() {
        let dir = TempDir::new().unwrap();
        let dir_arg = dir.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "photopusher",
            "http://192.168.1.3:8080",
            "-d",
            dir_arg.as_str(),
            "--workers",
            "4",
            "--no-ping",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.base_url, "http://192.168.1.3:8080");
        assert_eq!(config.directory, dir.path());
        assert_eq!(config.workers, 4);
        assert!(!config.ping);
        assert_eq!(cli.capture_interval_ms, 5_000);
        assert!(cli.capture_channel.is_none());
    }
}
