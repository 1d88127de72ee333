#![forbid(unsafe_code)]

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] config::Error),

    #[error("probe error: {0}")]
    Probe(#[from] probe::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid check `{check}`: {reason}")]
    InvalidCheck { check: String, reason: String },

    #[error("pid file {0:?} does not contain a pid")]
    InvalidPidFile(PathBuf),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn invalid_check(check: &str, reason: impl Into<String>) -> Self {
        Self::InvalidCheck {
            check: check.to_owned(),
            reason: reason.into(),
        }
    }
}
