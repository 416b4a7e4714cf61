//! Filesystem collaborators the engines run against.
//!
//! [`FileSystem`] exposes only what backup and restore need: opening and
//! creating objects, their metadata, their primary and named streams, and
//! the opaque security and reparse blobs. [`LocalFs`] maps it onto the host
//! filesystem under a root directory; [`MemoryFs`] keeps a whole tree in
//! memory.

use std::io::{self, Read, Seek, Write};
use std::ops::{BitOr, Range};

use crate::{
    meta::{FileAttributes, FileInfo, Timestamp},
    path::ArchivePath,
};

mod local;
mod memory;

pub use self::local::{AttributeStream, LocalFs, LocalObject, LocalStream};
pub use self::memory::{MemoryFs, MemoryObject, MemoryStream};

/// Rights requested when opening or creating an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Access(u32);

impl Access {
    pub const READ: Access = Access(0x1);
    pub const WRITE: Access = Access(0x2);
    pub const WRITE_ATTRIBUTES: Access = Access(0x4);
    pub const DELETE: Access = Access(0x8);
    pub const WRITE_DAC: Access = Access(0x10);
    pub const WRITE_OWNER: Access = Access(0x20);
    pub const SYSTEM_SECURITY: Access = Access(0x40);

    /// Everything a restore may need on a target.
    pub const FULL: Access = Access(0x7F);

    pub const fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Access) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn without(self, other: Access) -> Access {
        Access(self.0 & !other.0)
    }

    pub const fn can_write(self) -> bool {
        self.0 & Access::WRITE.0 != 0
    }
}

impl BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Access) -> Access {
        Access(self.0 | rhs.0)
    }
}

/// What to do when a file being created already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Fail with [`io::ErrorKind::AlreadyExists`].
    CreateNew,
    /// Truncate and reuse the existing file.
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    Primary,
    Named(String),
    Reparse,
}

/// A stream an object carries, as reported by [`FileSystem::streams`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub size: u64,
    /// Allocated regions of a sparse stream, sorted and disjoint.
    pub allocated: Option<Vec<Range<u64>>>,
}

impl StreamDescriptor {
    pub fn new(kind: StreamKind, size: u64) -> StreamDescriptor {
        StreamDescriptor {
            kind,
            size,
            allocated: None,
        }
    }

    pub fn is_sparse(&self) -> bool {
        self.allocated.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub short_name: Option<String>,
}

/// The metadata subset applied to an existing object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub attributes: Option<FileAttributes>,
    pub creation_time: Option<Timestamp>,
    pub last_access_time: Option<Timestamp>,
    pub last_write_time: Option<Timestamp>,
}

impl MetadataUpdate {
    pub fn attributes(attributes: FileAttributes) -> MetadataUpdate {
        MetadataUpdate {
            attributes: Some(attributes),
            ..MetadataUpdate::default()
        }
    }

    pub fn times(info: &FileInfo) -> MetadataUpdate {
        MetadataUpdate {
            creation_time: Some(info.creation_time),
            last_access_time: Some(info.last_access_time),
            last_write_time: Some(info.last_write_time),
            ..MetadataUpdate::default()
        }
    }

    pub fn has_times(&self) -> bool {
        self.creation_time.is_some()
            || self.last_access_time.is_some()
            || self.last_write_time.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_none() && !self.has_times()
    }
}

/// Byte access to one stream of an object.
pub trait ObjectStream: Read + Write + Seek + Send {
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    fn set_sparse(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Commits written data. Dropping a stream without finishing it may
    /// discard its writes.
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Host filesystem operations. Paths are relative to the root the
/// implementation was built for; `.` is the root itself.
///
/// Operations a filesystem cannot perform return
/// [`io::ErrorKind::Unsupported`].
pub trait FileSystem: Sync {
    type Object: Send;
    type Stream: ObjectStream;

    /// Opens an existing object. With `follow_reparse` unset a symbolic
    /// link or other reparse point is opened itself.
    fn open(&self, path: &ArchivePath, access: Access, follow_reparse: bool) -> io::Result<Self::Object>;

    fn create_file(
        &self,
        path: &ArchivePath,
        access: Access,
        disposition: Disposition,
    ) -> io::Result<Self::Object>;

    /// Creates a directory and any missing parents.
    fn create_directory_path(&self, path: &ArchivePath) -> io::Result<()>;

    fn query_metadata(&self, object: &Self::Object) -> io::Result<FileInfo>;

    /// Metadata of whatever exists at `path`, without following reparse
    /// points. `Ok(None)` when nothing does.
    fn probe(&self, path: &ArchivePath) -> io::Result<Option<FileInfo>>;

    fn set_metadata(&self, object: &mut Self::Object, update: &MetadataUpdate) -> io::Result<()>;

    /// Entries of a directory, without `.` and `..`.
    fn read_dir<'a>(
        &'a self,
        object: &'a Self::Object,
    ) -> io::Result<Box<dyn Iterator<Item = io::Result<DirEntry>> + 'a>>;

    fn streams(&self, object: &Self::Object) -> io::Result<Vec<StreamDescriptor>>;

    /// Opens the primary stream (`name` of `None`) or a named stream. Write
    /// access creates a missing named stream.
    fn open_stream(&self, object: &Self::Object, name: Option<&str>, access: Access) -> io::Result<Self::Stream>;

    fn security_descriptor(&self, object: &Self::Object) -> io::Result<Option<Vec<u8>>>;

    fn set_security_descriptor(&self, object: &mut Self::Object, descriptor: &[u8]) -> io::Result<()>;

    fn reparse_data(&self, object: &Self::Object) -> io::Result<Option<Vec<u8>>>;

    /// Turns the object into a reparse point described by `data`.
    fn set_reparse_data(&self, object: &mut Self::Object, data: &[u8]) -> io::Result<()>;

    fn short_name(&self, path: &ArchivePath) -> io::Result<Option<String>>;

    fn set_short_name(&self, object: &mut Self::Object, short_name: &str) -> io::Result<()>;

    fn set_compression(&self, object: &mut Self::Object, compressed: bool) -> io::Result<()>;

    /// Removes a file or an empty directory.
    fn delete(&self, path: &ArchivePath) -> io::Result<()>;

    fn create_hard_link(&self, existing: &ArchivePath, new: &ArchivePath, replace: bool) -> io::Result<()>;
}

pub(crate) fn unsupported(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("{} not supported", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_downgrades() {
        let reduced = Access::FULL.without(Access::SYSTEM_SECURITY);
        assert!(reduced.contains(Access::READ | Access::WRITE | Access::WRITE_DAC));
        assert!(!reduced.contains(Access::SYSTEM_SECURITY));

        let reduced = reduced.without(Access::WRITE_DAC | Access::WRITE_OWNER);
        assert!(reduced.can_write());
        assert!(!reduced.contains(Access::WRITE_OWNER));
        assert!(!Access::READ.can_write());
    }

    #[test]
    fn metadata_updates() {
        assert!(MetadataUpdate::default().is_empty());
        let update = MetadataUpdate::times(&FileInfo::default());
        assert!(update.has_times());
        assert!(update.attributes.is_none());
        assert!(!MetadataUpdate::attributes(FileAttributes::READONLY).is_empty());
    }
}
