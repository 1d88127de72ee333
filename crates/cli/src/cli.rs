use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

/// procwatch: watch processes and their children
///
/// procwatch samples the memory and CPU usage of configured processes and of
/// the children they spawn, and reports checks that keep failing.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub(crate) struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub(crate) config: Option<PathBuf>,

    /// Glob of configuration fragments merged over the main file, in sorted
    /// order.
    #[arg(short, long)]
    pub(crate) fragments: Option<String>,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub(crate) enum Command {
    /// Supervise every configured process until interrupted.
    ///
    /// SIGUSR1 logs the current children of every process, SIGUSR2 rescans
    /// them immediately.
    Run,

    /// Print one sample of a process.
    Probe {
        pid: u32,

        /// Time between the two CPU readings, in milliseconds.
        #[arg(short, long, default_value = "500", value_parser = parse_millis)]
        interval: Duration,
    },

    /// List the immediate children of a process.
    Children { pid: u32 },

    /// Print the effective configuration.
    ShowConfig,
}

impl Cli {
    /// Every configuration file to load, main file first.
    pub(crate) fn config_files(&self) -> Result<Vec<PathBuf>, glob::PatternError> {
        let mut files: Vec<PathBuf> = self.config.iter().cloned().collect();
        if let Some(pattern) = &self.fragments {
            let mut fragments: Vec<PathBuf> = glob::glob(pattern)?
                .filter_map(Result::ok)
                .filter(|path| path.is_file())
                .collect();
            fragments.sort();
            files.extend(fragments);
        }
        Ok(files)
    }
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

fn parse_millis(millis: &str) -> Result<Duration, String> {
    millis
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| format!("`{millis}` is not a number of milliseconds"))
}
