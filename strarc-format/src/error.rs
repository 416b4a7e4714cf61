use std::error::Error as _;
use std::io;

use crate::{header::StreamId, path::ArchivePath};

/// Errors that end a backup or restore run.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive ends inside a record header ({read} of 20 bytes present)")]
    TruncatedHeader { read: usize },

    #[error("Archive ends {missing} bytes short of the current record")]
    TruncatedArchive { missing: u64 },

    #[error("Buffer of {buffer_size} bytes cannot hold a record needing {needed} bytes")]
    BadBufferSize { needed: u64, buffer_size: usize },

    #[error("Malformed {kind:?} record header")]
    BadHeader { kind: StreamId },

    #[error("Archive I/O failed")]
    ArchiveIo(#[source] io::Error),

    #[error("Out of memory while tracking hard links; disable hard-link processing and retry")]
    OutOfMemoryForLinkTracking,

    #[error("Operation cancelled")]
    Cancelled,
}

impl ArchiveError {
    pub(crate) fn from_write(error: io::Error, pending: usize) -> ArchiveError {
        if error.kind() == io::ErrorKind::WriteZero {
            ArchiveError::TruncatedArchive {
                missing: pending as u64,
            }
        } else {
            ArchiveError::ArchiveIo(error)
        }
    }
}

/// A failure confined to one object. It is logged and counted, and the run
/// moves on to the next object.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("Cannot open `{path}`")]
    Open {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot query metadata of `{path}`")]
    Metadata {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot list directory `{path}`")]
    ReadDir {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot read `{path}`")]
    Read {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot create `{path}`")]
    Create {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Restore of `{path}` incomplete")]
    Write {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot link `{path}` to `{target}`")]
    Link {
        path: ArchivePath,
        target: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Failed both linking and copying `{target}` to `{path}`")]
    Copy {
        path: ArchivePath,
        target: ArchivePath,
    },

    #[error("Invalid hard link reference in `{path}`")]
    LinkTarget { path: ArchivePath },

    #[error("Cannot set metadata of `{path}`")]
    SetMetadata {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot set short name of `{path}`")]
    ShortName {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },

    #[error("Cannot clear archive flag of `{path}`")]
    ClearArchive {
        path: ArchivePath,
        #[source]
        source: io::Error,
    },
}

impl ObjectError {
    fn io_source(&self) -> Option<&io::Error> {
        self.source().and_then(|e| e.downcast_ref::<io::Error>())
    }

    /// Logs the error and reports whether it counts as a failure. Operations
    /// the filesystem does not support are only noted at debug level.
    pub fn log(&self) -> bool {
        match self.io_source() {
            Some(source) if source.kind() == io::ErrorKind::Unsupported => {
                tracing::debug!("{}: {}", self, source);
                false
            }
            Some(source) => {
                tracing::warn!("{}: {}", self, source);
                true
            }
            None => {
                tracing::warn!("{}", self);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_is_not_counted() {
        let err = ObjectError::ShortName {
            path: ArchivePath::new("a").unwrap(),
            source: io::Error::new(io::ErrorKind::Unsupported, "no short names"),
        };
        assert!(!err.log());

        let err = ObjectError::Open {
            path: ArchivePath::new("a").unwrap(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.log());
    }

    #[test]
    fn write_zero_is_truncation() {
        let err = ArchiveError::from_write(io::Error::new(io::ErrorKind::WriteZero, "full"), 7);
        assert!(matches!(err, ArchiveError::TruncatedArchive { missing: 7 }));

        let err = ArchiveError::from_write(io::Error::new(io::ErrorKind::Other, "boom"), 7);
        assert!(matches!(err, ArchiveError::ArchiveIo(_)));
    }
}
