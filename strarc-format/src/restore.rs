use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::{
    archive::ArchiveReader,
    copy::copy_object,
    error::{ArchiveError, ObjectError},
    fs::{Access, Disposition, FileSystem, MetadataUpdate, ObjectStream},
    header::{StreamId, SPARSE_OFFSET_SIZE},
    meta::{FileAttributes, FileInfo},
    path::ArchivePath,
    record::{FileEntry, Record, StreamRecord},
    session::{Progress, Session},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Objects restored, or verified in test mode.
    pub objects: u64,
    pub skipped: u64,
    /// Objects restored as a hard link.
    pub links: u64,
    /// Hard links restored by copying content instead.
    pub copies: u64,
    pub bytes: u64,
    pub errors: u64,
}

/// Replays archive records onto a [`FileSystem`].
pub struct RestoreEngine<'a, F: FileSystem, R: Read> {
    session: Session,
    fs: &'a F,
    reader: ArchiveReader<R>,
    stats: RestoreStats,
    progress: Option<Progress<'a>>,
    scratch: Vec<u8>,
}

impl<'a, F: FileSystem, R: Read> RestoreEngine<'a, F, R> {
    pub fn new(session: Session, fs: &'a F, source: R) -> RestoreEngine<'a, F, R> {
        let buffer_size = session.buffer_size();
        RestoreEngine {
            reader: ArchiveReader::new(source, buffer_size, session.cancel_token().clone()),
            session,
            fs,
            stats: RestoreStats::default(),
            progress: None,
            scratch: vec![0; buffer_size],
        }
    }

    pub fn with_progress(mut self, progress: Progress<'a>) -> Self {
        self.progress = Some(progress);
        self
    }

    #[inline(always)]
    pub fn stats(&self) -> &RestoreStats {
        &self.stats
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn finish(self) -> R {
        self.reader.into_inner()
    }

    /// Restores every object up to the end of the archive.
    pub fn restore_all(&mut self) -> Result<(), ArchiveError> {
        while let Some(entry) = self.reader.next_file_entry()? {
            self.restore_entry(entry)?;
        }
        Ok(())
    }

    /// Restores one object whose file entry was just decoded, consuming its
    /// stream records.
    ///
    /// Returns `Ok(false)` when the object failed; its partial target is
    /// removed and the run may continue.
    pub fn restore_entry(&mut self, mut entry: FileEntry) -> Result<bool, ArchiveError> {
        self.session.check_cancelled()?;

        let policy = self.session.policy();
        let is_directory = entry.info.is_directory();
        let mut renamed = false;

        if policy.restore_short_names && !is_directory {
            if let Some(short_name) = entry.short_name.as_deref() {
                match entry.path.with_file_name(short_name) {
                    Ok(path) => {
                        entry.path = path;
                        renamed = true;
                    }
                    Err(e) => tracing::warn!(path = %entry.path, "Ignoring short name {:?}: {}", short_name, e),
                }
            }
        }
        let set_short_name = policy.short_names && !renamed;
        let test_only = policy.test_only;

        if self.should_skip(&entry) {
            tracing::debug!(path = %entry.path, "skipped");
            self.stats.skipped += 1;
            self.consume_object()?;
            return Ok(true);
        }

        self.report(&entry.path, &entry.info);

        if test_only {
            self.stats.bytes += self.consume_object()?;
            self.stats.objects += 1;
            return Ok(true);
        }

        let path = entry.path.clone();
        let mut object = match self.open_target(&entry) {
            Ok(object) => object,
            Err(source) => {
                self.object_failed(ObjectError::Create { path, source });
                self.consume_object()?;
                return Ok(false);
            }
        };

        if set_short_name {
            if let Some(short_name) = entry.short_name.as_deref() {
                if let Err(source) = self.fs.set_short_name(&mut object, short_name) {
                    self.object_failed(ObjectError::ShortName { path: path.clone(), source });
                }
            }
        }

        match self.restore_into(&path, &mut object, &entry.info) {
            Ok(true) => {}
            Ok(false) => {
                drop(object);
                if !is_directory {
                    self.discard(&path);
                }
                return Ok(false);
            }
            Err(e) => {
                drop(object);
                if !is_directory && matches!(e, ArchiveError::Cancelled) {
                    self.discard(&path);
                }
                return Err(e);
            }
        }

        self.apply_metadata(&path, &mut object, &entry.info);
        self.stats.objects += 1;
        Ok(true)
    }

    /// Whether the filter or the overwrite policy keeps `entry` from being
    /// restored.
    fn should_skip(&self, entry: &FileEntry) -> bool {
        let policy = self.session.policy();
        let path = &entry.path;

        if policy.filter.is_excluded(path) {
            return true;
        }
        if !entry.info.is_directory() && !policy.filter.is_included(path) {
            return true;
        }

        let overwrite = policy.overwrite;
        if !overwrite.is_conditional() {
            return false;
        }

        let existing = match self.fs.probe(path) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::debug!(%path, "cannot probe target: {}", e);
                None
            }
        };

        match existing {
            None => overwrite.freshen_only,
            Some(existing) => {
                if overwrite.unmodified_only && existing.is_modified() {
                    return true;
                }
                overwrite.older_only
                    && !existing.is_directory()
                    && existing.last_write_time >= entry.info.last_write_time
            }
        }
    }

    fn open_target(&self, entry: &FileEntry) -> io::Result<F::Object> {
        let path = &entry.path;

        if entry.info.is_directory() {
            let mut access = Access::FULL;
            let mut created = false;
            loop {
                match self.fs.open(path, access, path.is_root()) {
                    Ok(object) => return Ok(object),
                    Err(e) if e.kind() == io::ErrorKind::NotFound && !created => {
                        created = true;
                        self.fs.create_directory_path(path)?;
                    }
                    Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                        // DELETE is given up first.
                        access = if access.contains(Access::DELETE) {
                            access.without(Access::DELETE)
                        } else {
                            reduced_access(access).ok_or(e)?
                        };
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let disposition = self.session.policy().overwrite.disposition();
        if disposition == Disposition::Overwrite {
            self.clear_readonly(path);
        }

        let mut access = Access::FULL;
        let mut created_parents = false;
        loop {
            match self.fs.create_file(path, access, disposition) {
                Ok(object) => return Ok(object),
                Err(e) if e.kind() == io::ErrorKind::NotFound && !created_parents => {
                    created_parents = true;
                    if let Some(parent) = path.parent() {
                        self.fs.create_directory_path(&parent)?;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    access = reduced_access(access).ok_or(e)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Opens or creates a named stream, giving up security rights the
    /// target refuses the same way [`Self::open_target`] does.
    fn open_named_stream(&self, object: &F::Object, name: &str) -> io::Result<F::Stream> {
        let mut access = NAMED_STREAM_ACCESS;
        loop {
            match self.fs.open_stream(object, Some(name), access) {
                Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                    access = reduced_access(access).ok_or(e)?;
                }
                other => return other,
            }
        }
    }

    /// Lets an existing read-only file be replaced.
    fn clear_readonly(&self, path: &ArchivePath) {
        let existing = match self.fs.probe(path) {
            Ok(Some(existing)) => existing,
            _ => return,
        };
        if existing.is_directory() || !existing.attributes.contains(FileAttributes::READONLY) {
            return;
        }

        let update = MetadataUpdate::attributes(existing.attributes.without(FileAttributes::READONLY));
        let cleared = self
            .fs
            .open(path, Access::WRITE_ATTRIBUTES, false)
            .and_then(|mut object| self.fs.set_metadata(&mut object, &update));
        if let Err(e) = cleared {
            tracing::debug!(%path, "cannot clear read-only flag: {}", e);
        }
    }

    /// Consumes the stream records of the current object into `object`.
    ///
    /// Sparse content is extended to the size in `info` afterwards.
    pub(crate) fn restore_into(
        &mut self,
        path: &ArchivePath,
        object: &mut F::Object,
        info: &FileInfo,
    ) -> Result<bool, ArchiveError> {
        let mut primary: Option<F::Stream> = None;
        let mut sparse = false;
        let mut linked = false;
        let mut ok = true;

        loop {
            self.session.check_cancelled()?;

            let stream = match self.reader.next_record()? {
                None => break,
                Some(Record::Stream(stream)) => stream,
                Some(entry) => {
                    self.reader.put_back(entry);
                    break;
                }
            };

            if !ok {
                self.reader.skip_payload()?;
                continue;
            }

            ok = match stream.id {
                StreamId::Data | StreamId::SparseBlock if stream.name.is_none() => {
                    self.restore_data(path, object, &mut primary, &mut sparse, &stream)?
                }
                StreamId::Link => {
                    primary = None;
                    linked = self.restore_link(path, object)?;
                    linked
                }
                _ if stream.name.is_some() || stream.id == StreamId::AlternateData => {
                    self.reader.put_back(Record::Stream(stream));
                    self.restore_named_streams(path, object)?
                }
                StreamId::SecurityData if self.session.policy().security => {
                    let descriptor = self.reader.read_payload_to_vec()?;
                    if let Err(source) = self.fs.set_security_descriptor(object, &descriptor) {
                        self.object_failed(ObjectError::SetMetadata { path: path.clone(), source });
                    }
                    true
                }
                StreamId::ReparseData => {
                    let data = self.reader.read_payload_to_vec()?;
                    primary = None;
                    match self.fs.set_reparse_data(object, &data) {
                        Ok(()) => true,
                        Err(source) => self.object_failed(ObjectError::Write { path: path.clone(), source }),
                    }
                }
                _ => {
                    self.reader.skip_payload()?;
                    true
                }
            };
        }

        if !ok {
            return Ok(false);
        }

        let extend = !linked
            && !info.is_directory()
            && !info.is_reparse_point()
            && (sparse || info.attributes.contains(FileAttributes::SPARSE_FILE));
        if extend && primary.is_none() {
            primary = match self.open_primary(path, object, true) {
                Some(stream) => Some(stream),
                None => return Ok(false),
            };
        }

        if let Some(mut stream) = primary {
            let finished = match extend {
                true => stream.set_len(info.file_size).and_then(|_| stream.finish()),
                false => stream.finish(),
            };
            if let Err(source) = finished {
                return Ok(self.object_failed(ObjectError::Write { path: path.clone(), source }));
            }
        }
        Ok(true)
    }

    fn open_primary(&mut self, path: &ArchivePath, object: &F::Object, sparse: bool) -> Option<F::Stream> {
        let mut stream = match self.fs.open_stream(object, None, Access::READ | Access::WRITE) {
            Ok(stream) => stream,
            Err(source) => {
                self.object_failed(ObjectError::Write { path: path.clone(), source });
                return None;
            }
        };
        if sparse {
            self.mark_sparse(path, &mut stream);
        }
        Some(stream)
    }

    fn mark_sparse(&self, path: &ArchivePath, stream: &mut F::Stream) {
        if !self.session.policy().compression {
            return;
        }
        if let Err(e) = stream.set_sparse() {
            tracing::debug!(%path, "cannot mark sparse: {}", e);
        }
    }

    fn restore_data(
        &mut self,
        path: &ArchivePath,
        object: &F::Object,
        primary: &mut Option<F::Stream>,
        sparse: &mut bool,
        record: &StreamRecord,
    ) -> Result<bool, ArchiveError> {
        if primary.is_none() {
            *primary = self.open_primary(path, object, record.is_sparse());
            *sparse = record.is_sparse();
        }
        let stream = match primary.as_mut() {
            Some(stream) => stream,
            None => {
                self.reader.skip_payload()?;
                return Ok(false);
            }
        };

        if record.is_sparse() {
            if !*sparse {
                *sparse = true;
                self.mark_sparse(path, stream);
            }
            let offset = match self.read_sparse_offset()? {
                Some(offset) => offset,
                None => {
                    let source = io::Error::new(io::ErrorKind::InvalidData, "sparse block without offset");
                    return Ok(self.object_failed(ObjectError::Write { path: path.clone(), source }));
                }
            };
            if let Err(source) = stream.seek(SeekFrom::Start(offset)) {
                self.reader.skip_payload()?;
                return Ok(self.object_failed(ObjectError::Write { path: path.clone(), source }));
            }
        }

        self.copy_payload(path, stream)
    }

    fn read_sparse_offset(&mut self) -> Result<Option<u64>, ArchiveError> {
        if self.reader.remaining() < SPARSE_OFFSET_SIZE as u64 {
            self.reader.skip_payload()?;
            return Ok(None);
        }

        let mut offset = [0u8; SPARSE_OFFSET_SIZE];
        let mut filled = 0;
        while filled < offset.len() {
            filled += self.reader.read_payload(&mut offset[filled..])?;
        }
        Ok(Some(u64::from_le_bytes(offset)))
    }

    /// Writes the rest of the current payload to `out`. On a write failure
    /// the payload is skipped and the object reported as failed.
    fn copy_payload<W: Write>(&mut self, path: &ArchivePath, out: &mut W) -> Result<bool, ArchiveError> {
        loop {
            let read = self.reader.read_payload(&mut self.scratch)?;
            if read == 0 {
                return Ok(true);
            }
            if let Err(source) = out.write_all(&self.scratch[..read]) {
                self.reader.skip_payload()?;
                return Ok(self.object_failed(ObjectError::Write { path: path.clone(), source }));
            }
            self.stats.bytes += read as u64;
        }
    }

    /// Replaces the placeholder at `path` with a hard link to the object the
    /// record names, copying its content when linking is impossible.
    fn restore_link(&mut self, path: &ArchivePath, object: &mut F::Object) -> Result<bool, ArchiveError> {
        let payload = self.reader.read_payload_to_vec()?;
        let target = match ArchivePath::from_utf16le(&payload) {
            Ok(target) => target,
            Err(_) => return Ok(self.object_failed(ObjectError::LinkTarget { path: path.clone() })),
        };

        if let Err(e) = self.fs.delete(path) {
            tracing::debug!(%path, "cannot remove placeholder: {}", e);
        }

        let linked = match self.session.policy().hard_links {
            true => match self.fs.create_hard_link(&target, path, true) {
                Ok(()) => true,
                Err(source) => {
                    self.object_failed(ObjectError::Link {
                        path: path.clone(),
                        target: target.clone(),
                        source,
                    });
                    false
                }
            },
            false => false,
        };

        if linked {
            self.stats.links += 1;
        } else {
            match copy_object(&self.session, self.fs, &target, path) {
                Ok(true) => self.stats.copies += 1,
                Ok(false) => {
                    return Ok(self.object_failed(ObjectError::Copy {
                        path: path.clone(),
                        target,
                    }))
                }
                Err(ArchiveError::Cancelled) => return Err(ArchiveError::Cancelled),
                Err(e) => {
                    tracing::warn!(%path, "Copy from `{}` failed: {}", target, e);
                    return Ok(self.object_failed(ObjectError::Copy {
                        path: path.clone(),
                        target,
                    }));
                }
            }
        }

        // The link may share a read-only object.
        match self.fs.open(path, Access::READ | Access::WRITE_ATTRIBUTES, false) {
            Ok(reopened) => {
                *object = reopened;
                Ok(true)
            }
            Err(source) => Ok(self.object_failed(ObjectError::Open { path: path.clone(), source })),
        }
    }

    /// Restores consecutive named stream records. Stops at the next file
    /// entry or unnamed non-alternate record, which is put back.
    fn restore_named_streams(&mut self, path: &ArchivePath, object: &F::Object) -> Result<bool, ArchiveError> {
        let mut current: Option<(String, F::Stream)> = None;
        let mut ok = true;

        loop {
            self.session.check_cancelled()?;

            let stream = match self.reader.next_record()? {
                None => break,
                Some(Record::Stream(stream)) if stream.name.is_some() || stream.id == StreamId::AlternateData => stream,
                Some(other) => {
                    self.reader.put_back(other);
                    break;
                }
            };

            if !ok {
                self.reader.skip_payload()?;
                continue;
            }

            let continues = match (&stream.name, &current) {
                (None, Some(_)) => true,
                (Some(name), Some((open, _))) => name == open,
                (None, None) => {
                    tracing::debug!(%path, "unnamed alternate stream without a preceding name");
                    self.reader.skip_payload()?;
                    continue;
                }
                (Some(_), None) => false,
            };

            if !continues {
                if let Some((name, mut open)) = current.take() {
                    if let Err(source) = open.finish() {
                        tracing::debug!(%path, stream = %name, "finishing named stream failed");
                        ok = self.object_failed(ObjectError::Write { path: path.clone(), source });
                        self.reader.skip_payload()?;
                        continue;
                    }
                }

                let name = stream.name.clone().unwrap_or_default();
                match self.open_named_stream(object, &name) {
                    Ok(mut open) => {
                        if stream.is_sparse() {
                            self.mark_sparse(path, &mut open);
                        }
                        current = Some((name, open));
                    }
                    Err(source) => {
                        ok = self.object_failed(ObjectError::Write { path: path.clone(), source });
                        self.reader.skip_payload()?;
                        continue;
                    }
                }
            }

            if let Some((_, open)) = current.as_mut() {
                if stream.is_sparse() {
                    let seeked = match self.read_sparse_offset()? {
                        Some(offset) => open.seek(SeekFrom::Start(offset)).map(|_| ()),
                        None => Err(io::Error::new(io::ErrorKind::InvalidData, "sparse block without offset")),
                    };
                    if let Err(source) = seeked {
                        self.reader.skip_payload()?;
                        ok = self.object_failed(ObjectError::Write { path: path.clone(), source });
                        continue;
                    }
                }
                ok = self.copy_payload(path, open)?;
            }
        }

        if let Some((_, mut open)) = current {
            if let Err(source) = open.finish() {
                ok = self.object_failed(ObjectError::Write { path: path.clone(), source });
            }
        }
        Ok(ok)
    }

    fn apply_metadata(&mut self, path: &ArchivePath, object: &mut F::Object, info: &FileInfo) {
        let policy = self.session.policy();
        let compress = policy.compression && info.attributes.contains(FileAttributes::COMPRESSED);

        let mut update = MetadataUpdate::default();
        if policy.times {
            update = MetadataUpdate::times(info);
        }
        if policy.attributes {
            update.attributes = Some(info.attributes);
        }

        if compress {
            if let Err(source) = self.fs.set_compression(object, true) {
                self.object_failed(ObjectError::SetMetadata { path: path.clone(), source });
            }
        }
        if update.is_empty() {
            return;
        }
        if let Err(source) = self.fs.set_metadata(object, &update) {
            self.object_failed(ObjectError::SetMetadata { path: path.clone(), source });
        }
    }

    /// Consumes the stream records of the current object. Returns the
    /// payload bytes skipped.
    fn consume_object(&mut self) -> Result<u64, ArchiveError> {
        let mut skipped = 0;
        loop {
            match self.reader.next_record()? {
                None => return Ok(skipped),
                Some(Record::Stream(_)) => skipped += self.reader.skip_payload()?,
                Some(entry) => {
                    self.reader.put_back(entry);
                    return Ok(skipped);
                }
            }
        }
    }

    /// Removes a partially restored target.
    fn discard(&self, path: &ArchivePath) {
        if let Err(e) = self.fs.delete(path) {
            tracing::debug!(%path, "cannot remove partial target: {}", e);
        }
    }

    fn report(&mut self, path: &ArchivePath, info: &FileInfo) {
        if let Some(progress) = self.progress.as_mut() {
            progress(path, info);
        }
    }

    fn object_failed(&mut self, error: ObjectError) -> bool {
        if error.log() {
            self.stats.errors += 1;
        }
        false
    }
}

/// Data rights plus the security rights a named stream open may carry.
const NAMED_STREAM_ACCESS: Access = Access::FULL
    .without(Access::DELETE)
    .without(Access::WRITE_ATTRIBUTES);

/// The next weaker set of rights to ask for after a refusal.
fn reduced_access(access: Access) -> Option<Access> {
    if access.contains(Access::SYSTEM_SECURITY) {
        Some(access.without(Access::SYSTEM_SECURITY))
    } else if access.intersects(Access::WRITE_DAC | Access::WRITE_OWNER) {
        Some(access.without(Access::WRITE_DAC | Access::WRITE_OWNER))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::backup::BackupEngine;
    use crate::fs::MemoryFs;
    use crate::header::StreamAttributes;
    use crate::meta::Timestamp;
    use crate::policy::{BackupMethod, Filter, OverwritePolicy, Policy};
    use crate::session::{CancelToken, DEFAULT_BUFFER_SIZE};

    fn path(s: &str) -> ArchivePath {
        ArchivePath::new(s).unwrap()
    }

    fn session(policy: Policy) -> Session {
        Session::new(policy, DEFAULT_BUFFER_SIZE).unwrap()
    }

    fn backup(fs: &MemoryFs) -> Vec<u8> {
        backup_with(fs, Policy::default())
    }

    fn backup_with(fs: &MemoryFs, policy: Policy) -> Vec<u8> {
        let mut engine = BackupEngine::new(session(policy), fs, Vec::new());
        engine.backup_tree().unwrap();
        engine.finish().unwrap()
    }

    fn restore(fs: &MemoryFs, archive: Vec<u8>, policy: Policy) -> RestoreStats {
        let mut engine = RestoreEngine::new(session(policy), fs, Cursor::new(archive));
        engine.restore_all().unwrap();
        *engine.stats()
    }

    fn file_info(size: u64) -> FileInfo {
        FileInfo {
            attributes: FileAttributes::ARCHIVE,
            creation_time: Timestamp(1),
            last_access_time: Timestamp(2),
            last_write_time: Timestamp(3),
            file_size: size,
            number_of_links: 1,
            ..FileInfo::default()
        }
    }

    #[test]
    fn tree_roundtrip() {
        let source = MemoryFs::new();
        source.insert_file(&path("docs/readme.txt"), b"hello");
        source.insert_file(&path("docs/deep/empty"), b"");
        source.insert_stream(&path("docs/readme.txt"), "author", b"me").unwrap();
        source.set_security(&path("docs/readme.txt"), b"owner").unwrap();
        source.insert_symlink(&path("latest"), "docs/readme.txt");
        source
            .set_times(&path("docs"), Timestamp(10), Timestamp(20), Timestamp(30))
            .unwrap();

        let local = Policy {
            local: true,
            ..Policy::default()
        };
        let target = MemoryFs::new();
        let stats = restore(&target, backup_with(&source, local), Policy::default());

        assert_eq!(target.paths(), source.paths());
        assert_eq!(target.contents(&path("docs/readme.txt")).unwrap(), b"hello");
        assert_eq!(target.stream(&path("docs/readme.txt"), "author").unwrap(), b"me");
        assert_eq!(target.security(&path("docs/readme.txt")).unwrap(), b"owner");
        assert_eq!(target.symlink_target(&path("latest")).unwrap(), b"docs/readme.txt");
        assert_eq!(target.info(&path("docs")).unwrap().last_write_time, Timestamp(30));
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.objects as usize, source.paths().len() + 1);
    }

    #[test]
    fn hard_links_are_relinked() {
        let source = MemoryFs::new();
        source.insert_file(&path("a.txt"), b"hi");
        source.insert_link(&path("a.txt"), &path("b.txt")).unwrap();

        let target = MemoryFs::new();
        let stats = restore(&target, backup(&source), Policy::default());

        assert_eq!(stats.links, 1);
        assert_eq!(target.contents(&path("b.txt")).unwrap(), b"hi");
        assert_eq!(target.index_of(&path("a.txt")), target.index_of(&path("b.txt")));
    }

    #[test]
    fn failing_links_fall_back_to_copies() {
        let source = MemoryFs::new();
        source.insert_file(&path("a.txt"), b"hi");
        source.insert_link(&path("a.txt"), &path("b.txt")).unwrap();

        let target = MemoryFs::new();
        target.set_fail_hard_links(true);
        let stats = restore(&target, backup(&source), Policy::default());

        assert_eq!(stats.copies, 1);
        assert_eq!(stats.objects, 3);
        assert_eq!(target.contents(&path("b.txt")).unwrap(), b"hi");
        assert_ne!(target.index_of(&path("a.txt")), target.index_of(&path("b.txt")));
    }

    #[test]
    fn disabled_links_copy_content() {
        let source = MemoryFs::new();
        source.insert_file(&path("a.txt"), b"hi");
        source.insert_link(&path("a.txt"), &path("b.txt")).unwrap();

        let target = MemoryFs::new();
        let policy = Policy {
            hard_links: false,
            ..Policy::default()
        };
        let stats = restore(&target, backup(&source), policy);
        assert_eq!(stats.copies, 1);
        assert_eq!(target.contents(&path("b.txt")).unwrap(), b"hi");
    }

    #[test]
    fn sparse_files_keep_holes_and_size() {
        let source = MemoryFs::new();
        source.insert_sparse(&path("s"), 100_000, &[(4096, b"abc")]);
        source.insert_sparse(&path("hole"), 5000, &[]);

        let target = MemoryFs::new();
        restore(&target, backup(&source), Policy::default());

        let contents = target.contents(&path("s")).unwrap();
        assert_eq!(contents.len(), 100_000);
        assert_eq!(&contents[4096..4099], b"abc");
        assert_eq!(target.allocated(&path("s")).unwrap(), vec![4096..4099]);
        assert_eq!(target.contents(&path("hole")).unwrap().len(), 5000);
    }

    #[test]
    fn existing_files_are_kept_without_overwrite() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"new");

        let target = MemoryFs::new();
        target.insert_file(&path("f"), b"old");
        let stats = restore(&target, backup(&source), Policy::default());
        assert_eq!(stats.errors, 1);
        assert_eq!(target.contents(&path("f")).unwrap(), b"old");

        let overwrite = Policy {
            overwrite: OverwritePolicy {
                existing: true,
                ..OverwritePolicy::default()
            },
            ..Policy::default()
        };
        restore(&target, backup(&source), overwrite);
        assert_eq!(target.contents(&path("f")).unwrap(), b"new");
    }

    #[test]
    fn read_only_targets_are_replaced() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"new");
        source.set_attributes(&path("f"), FileAttributes::READONLY).unwrap();

        let target = MemoryFs::new();
        target.insert_file(&path("f"), b"old");
        target.set_attributes(&path("f"), FileAttributes::READONLY).unwrap();

        let policy = Policy {
            overwrite: OverwritePolicy {
                existing: true,
                ..OverwritePolicy::default()
            },
            ..Policy::default()
        };
        restore(&target, backup(&source), policy);
        assert_eq!(target.contents(&path("f")).unwrap(), b"new");
        assert!(target
            .info(&path("f"))
            .unwrap()
            .attributes
            .contains(FileAttributes::READONLY));
    }

    #[test]
    fn conditional_overwrites() {
        let source = MemoryFs::new();
        source.insert_file(&path("newer"), b"archived");
        source.insert_file(&path("older"), b"archived");
        source.insert_file(&path("missing"), b"archived");
        for name in ["newer", "older", "missing"] {
            source
                .set_times(&path(name), Timestamp(1), Timestamp(1), Timestamp(100))
                .unwrap();
        }
        let archive = backup(&source);

        let target = MemoryFs::new();
        target.insert_file(&path("newer"), b"live");
        target.insert_file(&path("older"), b"live");
        target
            .set_times(&path("newer"), Timestamp(1), Timestamp(1), Timestamp(200))
            .unwrap();
        target
            .set_times(&path("older"), Timestamp(1), Timestamp(1), Timestamp(50))
            .unwrap();

        let policy = Policy {
            overwrite: OverwritePolicy {
                older_only: true,
                freshen_only: true,
                ..OverwritePolicy::default()
            },
            ..Policy::default()
        };
        restore(&target, archive, policy);

        assert_eq!(target.contents(&path("newer")).unwrap(), b"live");
        assert_eq!(target.contents(&path("older")).unwrap(), b"archived");
        assert!(!target.exists(&path("missing")));
    }

    #[test]
    fn modified_targets_are_kept_when_asked() {
        let source = MemoryFs::new();
        source.insert_file(&path("changed"), b"archived");
        source.insert_file(&path("clean"), b"archived");
        let archive = backup(&source);

        let target = MemoryFs::new();
        target.insert_file(&path("changed"), b"live");
        target.insert_file(&path("clean"), b"live");
        target.set_attributes(&path("clean"), FileAttributes::empty()).unwrap();

        let policy = Policy {
            overwrite: OverwritePolicy {
                unmodified_only: true,
                ..OverwritePolicy::default()
            },
            ..Policy::default()
        };
        restore(&target, archive, policy);
        assert_eq!(target.contents(&path("changed")).unwrap(), b"live");
        assert_eq!(target.contents(&path("clean")).unwrap(), b"archived");
    }

    #[test]
    fn include_never_gates_directories() {
        let source = MemoryFs::new();
        source.insert_file(&path("photos/a.jpg"), b"a");
        source.insert_file(&path("photos/a.txt"), b"t");

        let target = MemoryFs::new();
        let policy = Policy {
            filter: Filter::new(vec![".jpg"], Vec::<String>::new()),
            ..Policy::default()
        };
        restore(&target, backup(&source), policy);
        assert_eq!(target.paths(), vec!["photos", r"photos\a.jpg"]);
    }

    #[test]
    fn test_mode_writes_nothing() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"12345");

        let target = MemoryFs::new();
        let policy = Policy {
            test_only: true,
            ..Policy::default()
        };
        let stats = restore(&target, backup(&source), policy);
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.bytes, 5);
        assert!(target.paths().is_empty());
    }

    #[test]
    fn short_names_are_restored() {
        let source = MemoryFs::new();
        source.insert_file(&path("dir/Long File Name.txt"), b"x");
        source.set_short_name(&path("dir/Long File Name.txt"), "LONGFI~1.TXT");
        let archive = backup(&source);

        let target = MemoryFs::new();
        restore(&target, archive.clone(), Policy::default());
        assert_eq!(
            target.short_name_of(&path("dir/Long File Name.txt")).as_deref(),
            Some("LONGFI~1.TXT")
        );

        let renamed = MemoryFs::new();
        let policy = Policy {
            restore_short_names: true,
            ..Policy::default()
        };
        restore(&renamed, archive, policy);
        assert_eq!(renamed.contents(&path("dir/LONGFI~1.TXT")).unwrap(), b"x");
        assert!(!renamed.exists(&path("dir/Long File Name.txt")));
    }

    #[test]
    fn archive_bit_is_restored_as_stored() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"x");

        let full = Policy {
            method: BackupMethod::Full,
            ..Policy::default()
        };
        let archive = backup_with(&source, full);

        let target = MemoryFs::new();
        restore(&target, archive, Policy::default());
        assert!(!target.info(&path("f")).unwrap().is_modified());
    }

    #[test]
    fn interleaved_named_streams() {
        let mut writer = ArchiveWriter::new(Vec::new(), DEFAULT_BUFFER_SIZE);
        writer.write_file_entry(&path("f"), &file_info(4), None).unwrap();
        writer
            .write_stream(StreamId::AlternateData, StreamAttributes::NORMAL, Some("one"), b"ab")
            .unwrap();
        writer
            .write_stream(StreamId::AlternateData, StreamAttributes::NORMAL, None, b"cd")
            .unwrap();
        writer
            .write_stream(StreamId::AlternateData, StreamAttributes::NORMAL, Some("two"), b"x")
            .unwrap();
        writer
            .write_stream(StreamId::Data, StreamAttributes::NORMAL, None, b"main")
            .unwrap();
        let archive = writer.into_inner().unwrap();

        let target = MemoryFs::new();
        restore(&target, archive, Policy::default());
        assert_eq!(target.stream(&path("f"), "one").unwrap(), b"abcd");
        assert_eq!(target.stream(&path("f"), "two").unwrap(), b"x");
        assert_eq!(target.contents(&path("f")).unwrap(), b"main");
    }

    #[test]
    fn bad_link_reference_discards_the_target() {
        let mut writer = ArchiveWriter::new(Vec::new(), DEFAULT_BUFFER_SIZE);
        writer.write_file_entry(&path("f"), &file_info(0), None).unwrap();
        writer
            .write_stream(StreamId::Data, StreamAttributes::NORMAL, None, b"partial")
            .unwrap();
        writer.write_link(&path("nowhere")).unwrap();
        writer.write_file_entry(&path("g"), &file_info(1), None).unwrap();
        writer
            .write_stream(StreamId::Data, StreamAttributes::NORMAL, None, b"g")
            .unwrap();
        let archive = writer.into_inner().unwrap();

        let target = MemoryFs::new();
        let stats = restore(&target, archive, Policy::default());
        assert!(!target.exists(&path("f")));
        assert_eq!(target.contents(&path("g")).unwrap(), b"g");
        assert_eq!(stats.objects, 1);
        assert!(stats.errors >= 1);
    }

    #[test]
    fn cancellation_discards_the_target() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"content");
        let archive = backup(&source);

        let target = MemoryFs::new();
        let session = session(Policy::default());
        let token = session.cancel_token().clone();
        let mut engine = RestoreEngine::new(session, &target, Cursor::new(archive))
            .with_progress(Box::new(move |_: &ArchivePath, _: &FileInfo| token.cancel()));

        assert!(matches!(engine.restore_all(), Err(ArchiveError::Cancelled)));
        assert!(!target.exists(&path("f")));
    }

    /// Cancels its token once `after` bytes have been handed out.
    struct Tripwire {
        inner: Cursor<Vec<u8>>,
        token: CancelToken,
        after: u64,
    }

    impl Read for Tripwire {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            if self.inner.position() >= self.after {
                self.token.cancel();
            }
            Ok(n)
        }
    }

    #[test]
    fn cancellation_inside_a_multi_record_file() {
        let chunk = [7u8; 200];
        let mut writer = ArchiveWriter::new(Vec::new(), DEFAULT_BUFFER_SIZE);
        writer.write_file_entry(&path("big"), &file_info(600), None).unwrap();
        for _ in 0..3 {
            writer
                .write_stream(StreamId::Data, StreamAttributes::NORMAL, None, &chunk)
                .unwrap();
        }
        writer.write_file_entry(&path("later"), &file_info(1), None).unwrap();
        writer
            .write_stream(StreamId::Data, StreamAttributes::NORMAL, None, b"L")
            .unwrap();
        let archive = writer.into_inner().unwrap();

        // Entry of "big" is 78 bytes and each data record 220.
        let target = MemoryFs::new();
        let session = Session::new(Policy::default(), 128).unwrap();
        let source = Tripwire {
            inner: Cursor::new(archive),
            token: session.cancel_token().clone(),
            after: 78 + 220 + 1,
        };
        let mut engine = RestoreEngine::new(session, &target, source);

        assert!(matches!(engine.restore_all(), Err(ArchiveError::Cancelled)));
        assert!(!target.exists(&path("big")));
        assert!(!target.exists(&path("later")));
        assert_eq!(engine.stats().objects, 0);
    }

    #[test]
    fn refused_security_rights_are_given_up() {
        let source = MemoryFs::new();
        source.insert_file(&path("f"), b"data");
        source.insert_stream(&path("f"), "author", b"me").unwrap();
        source.set_security(&path("f"), b"owner").unwrap();
        let archive = backup(&source);

        let target = MemoryFs::new();
        target.set_denied_access(Access::SYSTEM_SECURITY | Access::WRITE_DAC);
        let stats = restore(&target, archive, Policy::default());

        assert_eq!(target.contents(&path("f")).unwrap(), b"data");
        assert_eq!(target.stream(&path("f"), "author").unwrap(), b"me");
        assert_eq!(stats.errors, 0);
        assert_eq!(stats.objects, 2);
    }

    #[test]
    fn directories_restore_without_delete_rights() {
        let source = MemoryFs::new();
        source.insert_dir(&path("d"));
        source
            .set_times(&path("d"), Timestamp(10), Timestamp(20), Timestamp(30))
            .unwrap();
        let archive = backup(&source);

        let target = MemoryFs::new();
        target.set_denied_access(Access::DELETE | Access::SYSTEM_SECURITY);
        let stats = restore(&target, archive, Policy::default());

        assert_eq!(target.paths(), vec!["d"]);
        assert_eq!(target.info(&path("d")).unwrap().last_write_time, Timestamp(30));
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn access_is_reduced_in_order() {
        let access = reduced_access(Access::FULL).unwrap();
        assert!(!access.contains(Access::SYSTEM_SECURITY));
        assert!(access.contains(Access::WRITE_DAC));

        let access = reduced_access(access).unwrap();
        assert!(!access.intersects(Access::WRITE_DAC | Access::WRITE_OWNER));
        assert!(access.contains(Access::READ | Access::WRITE | Access::DELETE));

        assert_eq!(reduced_access(access), None);
    }
}
