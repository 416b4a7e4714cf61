use std::path::PathBuf;
use std::process::ExitStatus;

use strarc_format::path::IntoArchivePathError;
use strarc_format::ArchiveError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Cannot handle path `{}`", .path.display())]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: IntoArchivePathError,
    },

    #[error("Cannot open archive `{}`", .path.display())]
    OpenArchive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot use directory `{}`", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter command is empty")]
    EmptyFilter,

    #[error("Cannot parse filter command `{command}`")]
    ParseFilter {
        command: String,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("Cannot spawn filter `{command}`")]
    SpawnFilter {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter `{command}` exited with {status}")]
    FilterFailed { command: String, status: ExitStatus },

    #[error("Cannot install signal handlers")]
    Signal(#[source] std::io::Error),

    #[error("Aborted after {processed} objects")]
    Archive {
        processed: u64,
        #[source]
        source: ArchiveError,
    },

    #[error("Cancelled after {processed} objects")]
    Cancelled { processed: u64 },
}

impl Error {
    /// Wraps a fatal engine error, keeping cancellation distinct.
    pub fn from_archive(source: ArchiveError, processed: u64) -> Error {
        match source {
            ArchiveError::Cancelled => Error::Cancelled { processed },
            source => Error::Archive { processed, source },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Cancelled { .. } => 130,
            Error::Archive { .. } => 2,
            _ => 1,
        }
    }
}
