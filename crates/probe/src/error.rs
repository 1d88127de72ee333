use nix::errno::Errno;
use std::{io, path::PathBuf};

/// Represents all possible errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The process does not exist or cannot be observed by us.
    ///
    /// Not-found and permission-denied are folded together: in both cases
    /// the caller can no longer watch the process.
    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    /// A record read from the process filesystem is structurally broken.
    #[error("Invalid process record: {0}")]
    InvalidProcessRecord(String),

    /// A listing query does not have the `State.Ppid.eq=<pid>` shape.
    #[error("Invalid process query: {0:?}")]
    InvalidQuery(String),

    /// Neither the process filesystem nor the process table is usable.
    #[error("No usable process information source (tried {0})")]
    NoProcessSource(PathBuf),

    /// Error occurred while reading a file.
    #[error("Failed to read file: {0}")]
    FileReadFailed(#[from] io::Error),
}

impl Error {
    /// Map an I/O error raised while reading `pid`'s records.
    pub(crate) fn from_io(pid: u32, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => Self::NoSuchProcess(pid),
            _ if err.raw_os_error() == Some(Errno::ESRCH as i32) => Self::NoSuchProcess(pid),
            _ => Self::FileReadFailed(err),
        }
    }

    /// Whether the error means the process is gone for good.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::NoSuchProcess(_) | Self::InvalidProcessRecord(_))
    }
}
