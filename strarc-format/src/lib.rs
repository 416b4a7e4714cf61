//! Support library for the strarc stream archive format.
//!
//! An archive is a flat sequence of [`StreamHeader`]-prefixed records. Each
//! filesystem object starts with a file entry marker carrying its path and
//! metadata, followed by the stream records (content, named streams, security
//! data, hard-link references) that belong to it.
//!
//! [`BackupEngine`] walks a [`FileSystem`] and writes records, [`RestoreEngine`]
//! replays them, and [`copy_object`] connects the two through an in-memory pipe.

mod archive;
mod backup;
mod copy;
mod counting;
mod de;
mod error;
pub mod fs;
mod header;
mod linktrack;
mod meta;
pub mod path;
mod pipe;
mod policy;
mod record;
mod restore;
mod ser;
mod session;

pub use archive::{ArchiveReader, ArchiveWriter};
pub use backup::{BackupEngine, BackupStats};
pub use copy::copy_object;
pub use error::{ArchiveError, ObjectError};
pub use fs::{FileSystem, LocalFs, MemoryFs};
pub use header::{
    StreamAttributes, StreamHeader, StreamId, HEADER_SIZE, MAGIC, MAX_NAME_SIZE,
    SPARSE_OFFSET_SIZE,
};
pub use linktrack::{LinkKey, LinkTracker};
pub use meta::{FileAttributes, FileInfo, Timestamp, FILE_INFO_SIZE, SHORT_NAME_SIZE};
pub use path::ArchivePath;
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use policy::{BackupMethod, Filter, OverwritePolicy, ParseMethodError, Policy};
pub use record::{FileEntry, Record, StreamRecord};
pub use restore::{RestoreEngine, RestoreStats};
pub use session::{CancelToken, Progress, Session, DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
