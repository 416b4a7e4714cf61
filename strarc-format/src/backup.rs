use std::io::{self, BufRead, Read, Seek, SeekFrom, Write};
use std::ops::Range;

use crate::{
    archive::ArchiveWriter,
    error::{ArchiveError, ObjectError},
    fs::{Access, FileSystem, MetadataUpdate, StreamKind},
    header::{StreamAttributes, StreamId, SPARSE_OFFSET_SIZE},
    linktrack::LinkTracker,
    meta::{FileAttributes, FileInfo},
    path::ArchivePath,
    policy::BackupMethod,
    ser::encode_utf16le,
    session::{Progress, Session},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupStats {
    /// Objects written to the archive, or listed.
    pub objects: u64,
    /// Objects stored as a reference to an earlier link.
    pub links: u64,
    /// Stream payload bytes read from the filesystem.
    pub bytes: u64,
    pub errors: u64,
    pub skipped: u64,
}

/// Walks objects of a [`FileSystem`] and writes them to an archive.
///
/// Directories are emitted after their contents so their timestamps can be
/// restored last.
pub struct BackupEngine<'a, F: FileSystem, W: Write> {
    session: Session,
    fs: &'a F,
    writer: ArchiveWriter<W>,
    tracker: LinkTracker,
    stats: BackupStats,
    progress: Option<Progress<'a>>,
    scratch: Vec<u8>,
    ancestors: Vec<(u32, u64)>,
}

/// Reads until `buf` is full or the stream ends.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<'a, F: FileSystem, W: Write> BackupEngine<'a, F, W> {
    pub fn new(session: Session, fs: &'a F, sink: W) -> BackupEngine<'a, F, W> {
        let buffer_size = session.buffer_size();
        BackupEngine {
            writer: ArchiveWriter::new(sink, buffer_size),
            session,
            fs,
            tracker: LinkTracker::new(),
            stats: BackupStats::default(),
            progress: None,
            scratch: vec![0; buffer_size],
            ancestors: vec![],
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[inline(always)]
    pub fn stats(&self) -> &BackupStats {
        &self.stats
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn bytes_written(&self) -> u64 {
        self.writer.bytes_written()
    }

    pub fn finish(self) -> Result<W, ArchiveError> {
        self.writer.into_inner()
    }

    /// Backs up the root of the filesystem and everything below it.
    pub fn backup_tree(&mut self) -> Result<(), ArchiveError> {
        self.backup_object(&ArchivePath::root(), Some(""), true)?;
        Ok(())
    }

    /// Backs up each path, descending into directories.
    pub fn backup_paths(&mut self, paths: &[ArchivePath]) -> Result<(), ArchiveError> {
        for path in paths {
            self.backup_object(path, None, true)?;
        }
        Ok(())
    }

    /// Backs up the objects named one per line by `list`, without
    /// descending into directories.
    pub fn backup_list<R: BufRead>(&mut self, list: R) -> Result<(), ArchiveError> {
        for line in list.lines() {
            let line = line.map_err(ArchiveError::ArchiveIo)?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }

            match ArchivePath::new(line) {
                Ok(path) => {
                    self.backup_object(&path, None, false)?;
                }
                Err(e) => {
                    tracing::warn!(name = line, "Skipping: {}", e);
                    self.stats.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Backs up one object. A `short_name` of `None` asks the filesystem
    /// for it; `Some("")` stores none.
    ///
    /// Returns `Ok(false)` when the object failed and was skipped. Only
    /// archive failures and cancellation are errors.
    pub fn backup_object(
        &mut self,
        path: &ArchivePath,
        short_name: Option<&str>,
        traverse: bool,
    ) -> Result<bool, ArchiveError> {
        self.session.check_cancelled()?;

        let policy = self.session.policy();
        if policy.filter.is_excluded(path) {
            tracing::debug!(%path, "excluded");
            return Ok(true);
        }
        let included = policy.filter.is_included(path);
        let method = policy.method;
        let local = policy.local;
        let list_only = policy.list_only;
        let hard_links = policy.hard_links;
        let short_names = policy.short_names;

        let access = if method.clears_archive_flag() {
            Access::READ | Access::WRITE_ATTRIBUTES
        } else {
            Access::READ
        };

        let opened = match self.fs.open(path, access, !local) {
            // Dangling links are archived as themselves.
            Err(e) if !local && e.kind() == io::ErrorKind::NotFound => self.fs.open(path, access, false),
            other => other,
        };
        let mut object = match opened {
            Ok(object) => object,
            Err(source) => return Ok(self.object_failed(ObjectError::Open { path: path.clone(), source })),
        };

        let mut info = match self.fs.query_metadata(&object) {
            Ok(info) => info,
            Err(source) => {
                return Ok(self.object_failed(ObjectError::Metadata { path: path.clone(), source }))
            }
        };

        if traverse && info.is_directory() && !(local && info.is_reparse_point()) {
            self.backup_directory(path, &object, &info)?;
        }

        self.session.check_cancelled()?;

        if !included {
            self.stats.skipped += 1;
            return Ok(true);
        }
        if method.requires_archive_flag() && !info.is_modified() {
            tracing::trace!(%path, "unchanged since last backup");
            self.stats.skipped += 1;
            return Ok(true);
        }

        if list_only {
            self.stats.objects += 1;
            self.report(path, &info);
            return Ok(true);
        }

        let observed = info.attributes;
        if method != BackupMethod::Copy {
            info.attributes = info.attributes.without(FileAttributes::ARCHIVE);
        }

        let short_name = if !short_names {
            None
        } else {
            match short_name {
                Some(known) if known.is_empty() => None,
                Some(known) => Some(known.to_string()),
                None => self.query_short_name(path),
            }
        };

        self.writer.write_file_entry(path, &info, short_name.as_deref())?;
        self.report(path, &info);

        if hard_links && info.number_of_links > 1 && !info.is_directory() {
            if let Some(first) = self
                .tracker
                .lookup_or_register(info.volume_serial, info.file_index, path)?
            {
                tracing::debug!(%path, first = %first, "storing link");
                self.writer.write_link(first)?;
                self.stats.links += 1;
                self.stats.objects += 1;
                return Ok(true);
            }
        }

        let written = self.write_object_streams(path, &object)?;

        if written && method.clears_archive_flag() && observed.contains(FileAttributes::ARCHIVE) {
            let update = MetadataUpdate::attributes(observed.without(FileAttributes::ARCHIVE));
            if let Err(source) = self.fs.set_metadata(&mut object, &update) {
                self.object_failed(ObjectError::ClearArchive { path: path.clone(), source });
            }
        }

        Ok(written)
    }

    fn query_short_name(&self, path: &ArchivePath) -> Option<String> {
        if path.is_root() {
            return None;
        }
        match self.fs.short_name(path) {
            Ok(name) => name.filter(|name| !name.is_empty()),
            Err(e) => {
                tracing::debug!(%path, "no short name: {}", e);
                None
            }
        }
    }

    fn backup_directory(&mut self, path: &ArchivePath, object: &F::Object, info: &FileInfo) -> Result<(), ArchiveError> {
        let key = (info.volume_serial, info.file_index);
        if self.ancestors.contains(&key) {
            tracing::warn!(%path, "Directory loop detected, not descending");
            return Ok(());
        }

        let fs: &'a F = self.fs;
        let entries = match fs.read_dir(object) {
            Ok(entries) => entries,
            Err(source) => {
                self.object_failed(ObjectError::ReadDir { path: path.clone(), source });
                return Ok(());
            }
        };

        self.ancestors.push(key);
        let result = self.backup_entries(path, entries);
        self.ancestors.pop();
        result
    }

    fn backup_entries(
        &mut self,
        path: &ArchivePath,
        entries: impl Iterator<Item = io::Result<crate::fs::DirEntry>>,
    ) -> Result<(), ArchiveError> {
        for entry in entries {
            self.session.check_cancelled()?;

            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    self.object_failed(ObjectError::ReadDir { path: path.clone(), source });
                    break;
                }
            };

            let child = match entry.name.contains('\\') {
                true => None,
                false => path.join(&entry.name).ok(),
            };
            let child = match child {
                Some(child) => child,
                None => {
                    tracing::warn!(%path, name = %entry.name, "Name cannot be stored in an archive");
                    self.stats.errors += 1;
                    continue;
                }
            };

            let short_name = entry.short_name.unwrap_or_default();
            self.backup_object(&child, Some(&short_name), true)?;
        }
        Ok(())
    }

    /// Writes the stream records of an opened object: security data, the
    /// primary stream, named streams, then reparse data.
    ///
    /// Returns `Ok(false)` when the object could not be read completely.
    pub(crate) fn write_object_streams(&mut self, path: &ArchivePath, object: &F::Object) -> Result<bool, ArchiveError> {
        if self.session.policy().security {
            match self.fs.security_descriptor(object) {
                Ok(Some(descriptor)) => {
                    self.writer
                        .write_stream(StreamId::SecurityData, StreamAttributes::NORMAL, None, &descriptor)?;
                }
                Ok(None) => {}
                Err(source) => {
                    let error = ObjectError::Read { path: path.clone(), source };
                    if error.log() {
                        self.stats.errors += 1;
                        return Ok(false);
                    }
                }
            }
        }

        let streams = match self.fs.streams(object) {
            Ok(streams) => streams,
            Err(source) => return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source })),
        };

        for stream in streams {
            let written = match (&stream.kind, &stream.allocated) {
                (StreamKind::Primary, Some(allocated)) => self.write_sparse(path, object, allocated)?,
                (StreamKind::Primary, None) => self.write_data(path, object, None)?,
                (StreamKind::Named(name), _) => self.write_data(path, object, Some(name.as_str()))?,
                (StreamKind::Reparse, _) => self.write_reparse(path, object)?,
            };
            if !written {
                return Ok(false);
            }
        }

        self.stats.objects += 1;
        Ok(true)
    }

    fn write_data(&mut self, path: &ArchivePath, object: &F::Object, name: Option<&str>) -> Result<bool, ArchiveError> {
        let mut stream = match self.fs.open_stream(object, name, Access::READ) {
            Ok(stream) => stream,
            Err(source) => return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source })),
        };

        let (id, name_size) = match name {
            Some(name) => (StreamId::AlternateData, encode_utf16le(name).len()),
            None => (StreamId::Data, 0),
        };
        let chunk = self.writer.max_payload(name_size)?.min(self.scratch.len());

        let mut records = 0;
        loop {
            self.session.check_cancelled()?;

            let read = match read_full(&mut stream, &mut self.scratch[..chunk]) {
                Ok(read) => read,
                Err(source) => return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source })),
            };
            if read == 0 {
                break;
            }

            self.writer
                .write_stream(id, StreamAttributes::NORMAL, name, &self.scratch[..read])?;
            self.stats.bytes += read as u64;
            records += 1;
        }

        // An empty named stream still exists.
        if records == 0 && name.is_some() {
            self.writer.write_stream(id, StreamAttributes::NORMAL, name, &[])?;
        }
        Ok(true)
    }

    fn write_sparse(&mut self, path: &ArchivePath, object: &F::Object, allocated: &[Range<u64>]) -> Result<bool, ArchiveError> {
        let mut stream = match self.fs.open_stream(object, None, Access::READ) {
            Ok(stream) => stream,
            Err(source) => return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source })),
        };
        let chunk = (self.writer.max_payload(0)? - SPARSE_OFFSET_SIZE).min(self.scratch.len());

        for range in allocated {
            if let Err(source) = stream.seek(SeekFrom::Start(range.start)) {
                return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source }));
            }

            let mut offset = range.start;
            while offset < range.end {
                self.session.check_cancelled()?;

                let want = ((range.end - offset) as usize).min(chunk);
                let read = match read_full(&mut stream, &mut self.scratch[..want]) {
                    Ok(read) => read,
                    Err(source) => {
                        return Ok(self.object_failed(ObjectError::Read { path: path.clone(), source }))
                    }
                };
                if read == 0 {
                    break;
                }

                self.writer.write_sparse_block(offset, &self.scratch[..read])?;
                self.stats.bytes += read as u64;
                offset += read as u64;
            }
        }
        Ok(true)
    }

    fn write_reparse(&mut self, path: &ArchivePath, object: &F::Object) -> Result<bool, ArchiveError> {
        match self.fs.reparse_data(object) {
            Ok(Some(data)) => {
                self.writer
                    .write_stream(StreamId::ReparseData, StreamAttributes::NORMAL, None, &data)?;
                Ok(true)
            }
            Ok(None) => Ok(true),
            Err(source) => Ok(self.object_failed(ObjectError::Read { path: path.clone(), source })),
        }
    }

    fn report(&mut self, path: &ArchivePath, info: &FileInfo) {
        if let Some(progress) = self.progress.as_mut() {
            progress(path, info);
        }
    }

    /// Logs a per-object failure. Returns `false` so callers can report the
    /// object as failed; unsupported operations are not counted.
    fn object_failed(&mut self, error: ObjectError) -> bool {
        if error.log() {
            self.stats.errors += 1;
        }
        false
    }
}
