use std::io;

/// Why a name cannot be used as an archive path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntoArchivePathError {
    #[error("path contains a component that cannot be stored")]
    UnrepresentableStr,

    #[error("path escapes the archive root")]
    NonCanonical,

    #[error("no path provided")]
    EmptyPath,

    #[error("stored name is not valid UTF-16")]
    InvalidUtf16,
}

impl From<IntoArchivePathError> for io::Error {
    fn from(error: IntoArchivePathError) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidInput, error)
    }
}
