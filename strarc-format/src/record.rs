use crate::{
    header::{StreamAttributes, StreamId},
    meta::FileInfo,
    path::ArchivePath,
};

/// A decoded archive record, classified at the decode boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    FileEntry(FileEntry),
    Stream(StreamRecord),
}

impl Record {
    #[inline(always)]
    pub fn as_file_entry(&self) -> Option<&FileEntry> {
        match self {
            Record::FileEntry(entry) => Some(entry),
            _ => None,
        }
    }

    #[inline(always)]
    pub fn as_stream(&self) -> Option<&StreamRecord> {
        match self {
            Record::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

/// Start of an object: its path, metadata and optional short name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: ArchivePath,
    pub info: FileInfo,
    pub short_name: Option<String>,
}

/// A stream record header. The payload is read through the
/// [`ArchiveReader`](crate::ArchiveReader) that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub id: StreamId,
    pub attributes: StreamAttributes,
    pub name: Option<String>,
    pub size: u64,
}

impl StreamRecord {
    #[inline(always)]
    pub fn is_sparse(&self) -> bool {
        self.id == StreamId::SparseBlock || self.attributes.contains(StreamAttributes::SPARSE)
    }
}
