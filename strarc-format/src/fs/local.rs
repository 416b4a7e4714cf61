use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use super::{
    unsupported, Access, DirEntry, Disposition, FileSystem, MetadataUpdate, ObjectStream,
    StreamDescriptor, StreamKind,
};
use crate::{
    meta::{FileAttributes, FileInfo},
    path::ArchivePath,
};

/// Granularity of the zero-block scan used to find allocated regions.
const SPARSE_BLOCK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    File,
    Directory,
    Symlink,
    Special,
}

impl ObjectKind {
    fn of(meta: &fs::Metadata) -> ObjectKind {
        let file_type = meta.file_type();
        if file_type.is_dir() {
            ObjectKind::Directory
        } else if file_type.is_symlink() {
            ObjectKind::Symlink
        } else if file_type.is_file() {
            ObjectKind::File
        } else {
            ObjectKind::Special
        }
    }
}

/// The host filesystem below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

#[derive(Debug)]
pub struct LocalObject {
    path: PathBuf,
    kind: ObjectKind,
    follow: bool,
    file: Option<File>,
}

impl LocalObject {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn metadata(&self) -> io::Result<fs::Metadata> {
        if self.follow {
            fs::metadata(&self.path)
        } else {
            fs::symlink_metadata(&self.path)
        }
    }
}

impl LocalFs {
    pub fn new<P: Into<PathBuf>>(root: P) -> LocalFs {
        LocalFs { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of `path`. Fails when a directory on the way to it is a
    /// symbolic link, so nothing is reached outside the root.
    pub fn resolve(&self, path: &ArchivePath) -> io::Result<PathBuf> {
        if path.is_root() {
            return Ok(self.root.clone());
        }

        let relative = path.to_path_buf();
        let mut host = self.root.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            host.push(component);
            if components.peek().is_none() {
                break;
            }
            match fs::symlink_metadata(&host) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("{} is a symbolic link", host.display()),
                    ));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    host.extend(components.by_ref());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(host)
    }
}

fn open_options(access: Access) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(true).write(access.can_write());
    options
}

/// Ranges of `file` holding anything but zeros.
fn scan_allocated(file: &mut File, len: u64) -> io::Result<Vec<Range<u64>>> {
    let mut ranges: Vec<Range<u64>> = vec![];
    let mut block = vec![0u8; SPARSE_BLOCK];
    let mut offset = 0u64;

    file.seek(SeekFrom::Start(0))?;
    while offset < len {
        let want = ((len - offset) as usize).min(SPARSE_BLOCK);
        file.read_exact(&mut block[..want])?;
        if block[..want].iter().any(|b| *b != 0) {
            let end = offset + want as u64;
            match ranges.last_mut() {
                Some(last) if last.end == offset => last.end = end,
                _ => ranges.push(offset..end),
            }
        }
        offset += want as u64;
    }
    file.seek(SeekFrom::Start(0))?;
    Ok(ranges)
}

impl FileSystem for LocalFs {
    type Object = LocalObject;
    type Stream = LocalStream;

    fn open(&self, path: &ArchivePath, access: Access, follow_reparse: bool) -> io::Result<LocalObject> {
        let host = self.resolve(path)?;
        let meta = if follow_reparse {
            fs::metadata(&host)?
        } else {
            fs::symlink_metadata(&host)?
        };

        let kind = ObjectKind::of(&meta);
        let file = match kind {
            ObjectKind::File => Some(open_options(access).open(&host)?),
            _ => None,
        };

        Ok(LocalObject {
            path: host,
            kind,
            follow: follow_reparse,
            file,
        })
    }

    fn create_file(&self, path: &ArchivePath, access: Access, disposition: Disposition) -> io::Result<LocalObject> {
        let host = self.resolve(path)?;
        let mut options = OpenOptions::new();
        options.read(true).write(true);

        match disposition {
            Disposition::CreateNew => {
                options.create_new(true);
            }
            Disposition::Overwrite => {
                // Never truncate through a link.
                if let Ok(meta) = fs::symlink_metadata(&host) {
                    if meta.file_type().is_symlink() {
                        fs::remove_file(&host)?;
                    }
                }
                options.create(true).truncate(true);
            }
        }

        let file = options.open(&host)?;
        tracing::trace!(path = %host.display(), ?access, "created file");
        Ok(LocalObject {
            path: host,
            kind: ObjectKind::File,
            follow: false,
            file: Some(file),
        })
    }

    fn create_directory_path(&self, path: &ArchivePath) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?)
    }

    fn query_metadata(&self, object: &LocalObject) -> io::Result<FileInfo> {
        let meta = object.metadata()?;
        Ok(platform::file_info(&object.path, &meta, object.follow))
    }

    fn probe(&self, path: &ArchivePath) -> io::Result<Option<FileInfo>> {
        let host = self.resolve(path)?;
        match fs::symlink_metadata(&host) {
            Ok(meta) => Ok(Some(platform::file_info(&host, &meta, false))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_metadata(&self, object: &mut LocalObject, update: &MetadataUpdate) -> io::Result<()> {
        let is_symlink = object.kind == ObjectKind::Symlink;

        if update.has_times() {
            let meta = object.metadata()?;
            let atime = update
                .last_access_time
                .map(|t| t.to_filetime())
                .unwrap_or_else(|| FileTime::from_last_access_time(&meta));
            let mtime = update
                .last_write_time
                .map(|t| t.to_filetime())
                .unwrap_or_else(|| FileTime::from_last_modification_time(&meta));

            if is_symlink {
                filetime::set_symlink_file_times(&object.path, atime, mtime)?;
            } else {
                filetime::set_file_times(&object.path, atime, mtime)?;
            }
        }

        let attributes = match update.attributes {
            Some(attributes) => attributes,
            None => return Ok(()),
        };
        if is_symlink {
            return Ok(());
        }

        // The stamp can only be written while the object is writable.
        platform::set_readonly(&object.path, &object.metadata()?, false)?;
        let stamped = platform::set_archive_stamp(
            &object.path,
            object.follow,
            !attributes.contains(FileAttributes::ARCHIVE),
        );
        if attributes.contains(FileAttributes::READONLY) {
            platform::set_readonly(&object.path, &object.metadata()?, true)?;
        }
        stamped
    }

    fn read_dir<'a>(
        &'a self,
        object: &'a LocalObject,
    ) -> io::Result<Box<dyn Iterator<Item = io::Result<DirEntry>> + 'a>> {
        let mut names = vec![];
        for entry in fs::read_dir(&object.path)? {
            let name = entry?.file_name();
            names.push(name.into_string().map_err(|name| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("name {:?} is not valid unicode", name),
                )
            }));
        }
        names.sort_by(|a, b| match (a, b) {
            (Ok(a), Ok(b)) => a.cmp(b),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        });

        Ok(Box::new(names.into_iter().map(|name| {
            name.map(|name| DirEntry {
                name,
                short_name: None,
            })
        })))
    }

    fn streams(&self, object: &LocalObject) -> io::Result<Vec<StreamDescriptor>> {
        let meta = object.metadata()?;
        let mut streams = vec![];

        match object.kind {
            ObjectKind::File => {
                let info = platform::file_info(&object.path, &meta, object.follow);
                let mut primary = StreamDescriptor::new(StreamKind::Primary, meta.len());
                if info.attributes.contains(FileAttributes::SPARSE_FILE) {
                    let mut file = File::open(&object.path)?;
                    primary.allocated = Some(scan_allocated(&mut file, meta.len())?);
                }
                streams.push(primary);
            }
            ObjectKind::Symlink => {
                streams.push(StreamDescriptor::new(StreamKind::Reparse, meta.len()));
                return Ok(streams);
            }
            ObjectKind::Directory | ObjectKind::Special => {}
        }

        for (name, size) in platform::named_streams(&object.path, object.follow)? {
            streams.push(StreamDescriptor::new(StreamKind::Named(name), size));
        }
        Ok(streams)
    }

    fn open_stream(&self, object: &LocalObject, name: Option<&str>, access: Access) -> io::Result<LocalStream> {
        match name {
            None => {
                let file = match (&object.file, object.kind) {
                    (Some(file), _) => file.try_clone()?,
                    (None, ObjectKind::File) => open_options(access).open(&object.path)?,
                    _ => return Err(io::Error::new(io::ErrorKind::Other, "no primary stream")),
                };
                Ok(LocalStream::File(file))
            }
            Some(_) if object.kind == ObjectKind::Symlink => Err(unsupported("streams on links")),
            Some(name) => {
                let data = match platform::read_named(&object.path, name, object.follow)? {
                    Some(data) => data,
                    None if access.can_write() => vec![],
                    None => return Err(io::Error::new(io::ErrorKind::NotFound, "no such stream")),
                };
                Ok(LocalStream::Attribute(AttributeStream {
                    path: object.path.clone(),
                    name: name.to_string(),
                    follow: object.follow,
                    data: io::Cursor::new(data),
                    writable: access.can_write(),
                    dirty: false,
                }))
            }
        }
    }

    fn security_descriptor(&self, object: &LocalObject) -> io::Result<Option<Vec<u8>>> {
        Ok(platform::security_blob(&object.metadata()?))
    }

    fn set_security_descriptor(&self, object: &mut LocalObject, descriptor: &[u8]) -> io::Result<()> {
        platform::apply_security(&object.path, descriptor, object.kind == ObjectKind::Symlink)
    }

    fn reparse_data(&self, object: &LocalObject) -> io::Result<Option<Vec<u8>>> {
        match object.kind {
            ObjectKind::Symlink => platform::link_target(&object.path).map(Some),
            _ => Ok(None),
        }
    }

    fn set_reparse_data(&self, object: &mut LocalObject, data: &[u8]) -> io::Result<()> {
        if object.kind == ObjectKind::Directory {
            fs::remove_dir(&object.path)?;
        } else {
            object.file = None;
            match fs::remove_file(&object.path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }

        platform::create_symlink(data, &object.path)?;
        object.kind = ObjectKind::Symlink;
        object.follow = false;
        Ok(())
    }

    fn short_name(&self, _path: &ArchivePath) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn set_short_name(&self, _object: &mut LocalObject, _short_name: &str) -> io::Result<()> {
        Err(unsupported("short names"))
    }

    fn set_compression(&self, _object: &mut LocalObject, _compressed: bool) -> io::Result<()> {
        Err(unsupported("compression"))
    }

    fn delete(&self, path: &ArchivePath) -> io::Result<()> {
        let host = self.resolve(path)?;
        if fs::symlink_metadata(&host)?.is_dir() {
            fs::remove_dir(&host)
        } else {
            fs::remove_file(&host)
        }
    }

    fn create_hard_link(&self, existing: &ArchivePath, new: &ArchivePath, replace: bool) -> io::Result<()> {
        let target = self.resolve(new)?;
        if replace {
            match fs::remove_file(&target) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        fs::hard_link(self.resolve(existing)?, target)
    }
}

/// A named stream kept in an extended attribute. Written data is stored
/// when the stream is finished.
#[derive(Debug)]
pub struct AttributeStream {
    path: PathBuf,
    name: String,
    follow: bool,
    data: io::Cursor<Vec<u8>>,
    writable: bool,
    dirty: bool,
}

#[derive(Debug)]
pub enum LocalStream {
    File(File),
    Attribute(AttributeStream),
}

impl Read for LocalStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            LocalStream::File(file) => file.read(buf),
            LocalStream::Attribute(attribute) => attribute.data.read(buf),
        }
    }
}

impl Write for LocalStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LocalStream::File(file) => file.write(buf),
            LocalStream::Attribute(attribute) => {
                if !attribute.writable {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream opened read-only"));
                }
                attribute.dirty = true;
                attribute.data.write(buf)
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LocalStream::File(file) => file.flush(),
            LocalStream::Attribute(_) => Ok(()),
        }
    }
}

impl Seek for LocalStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            LocalStream::File(file) => file.seek(pos),
            LocalStream::Attribute(attribute) => attribute.data.seek(pos),
        }
    }
}

impl ObjectStream for LocalStream {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        match self {
            LocalStream::File(file) => file.set_len(len),
            LocalStream::Attribute(attribute) => {
                attribute.dirty = true;
                attribute.data.get_mut().resize(len as usize, 0);
                Ok(())
            }
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            LocalStream::File(file) => file.flush(),
            LocalStream::Attribute(attribute) if attribute.dirty => {
                attribute.dirty = false;
                platform::write_named(
                    &attribute.path,
                    &attribute.name,
                    attribute.data.get_ref(),
                    attribute.follow,
                )
            }
            LocalStream::Attribute(_) => Ok(()),
        }
    }
}

#[cfg(unix)]
mod platform {
    use std::ffi::OsStr;
    use std::fs;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::Path;

    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use filetime::FileTime;

    use crate::meta::{FileAttributes, FileInfo, Timestamp};

    /// Holds the modification time of the last backup that cleared the
    /// archive flag.
    const ARCHIVE_STAMP: &str = "user.strarc.archived";
    const INTERNAL_PREFIX: &str = "user.strarc.";
    const STREAM_PREFIX: &str = "user.";
    const SECURITY_BLOB_SIZE: usize = 12;

    fn stamp(meta: &fs::Metadata) -> String {
        format!("{}.{}", meta.mtime(), meta.mtime_nsec())
    }

    fn get(path: &Path, name: &str, follow: bool) -> io::Result<Option<Vec<u8>>> {
        if follow {
            xattr::get_deref(path, name)
        } else {
            xattr::get(path, name)
        }
    }

    fn set(path: &Path, name: &str, value: &[u8], follow: bool) -> io::Result<()> {
        if follow {
            xattr::set_deref(path, name, value)
        } else {
            xattr::set(path, name, value)
        }
    }

    /// Objects without a matching stamp, or on filesystems without
    /// extended attributes, count as modified.
    fn is_modified(path: &Path, meta: &fs::Metadata, follow: bool) -> bool {
        if meta.file_type().is_symlink() {
            return true;
        }
        match get(path, ARCHIVE_STAMP, follow) {
            Ok(Some(value)) => value != stamp(meta).as_bytes(),
            _ => true,
        }
    }

    pub(super) fn file_info(path: &Path, meta: &fs::Metadata, follow: bool) -> FileInfo {
        let file_type = meta.file_type();
        let mut attributes = FileAttributes::empty();

        if file_type.is_dir() {
            attributes = attributes | FileAttributes::DIRECTORY;
        } else if file_type.is_symlink() {
            attributes = attributes | FileAttributes::REPARSE_POINT;
        } else if !file_type.is_file() {
            attributes = attributes | FileAttributes::SYSTEM;
        }
        if meta.permissions().readonly() {
            attributes = attributes | FileAttributes::READONLY;
        }
        let hidden = path
            .file_name()
            .map(|name| name.as_bytes().starts_with(b"."))
            .unwrap_or(false);
        attributes.set(FileAttributes::HIDDEN, hidden);
        attributes.set(
            FileAttributes::SPARSE_FILE,
            file_type.is_file() && meta.blocks().saturating_mul(512) < meta.len(),
        );
        attributes.set(FileAttributes::ARCHIVE, is_modified(path, meta, follow));

        let creation_time = meta
            .created()
            .map(Timestamp::from_system_time)
            .unwrap_or_else(|_| Timestamp::from_unix(meta.ctime(), meta.ctime_nsec() as u32));

        FileInfo {
            attributes,
            creation_time,
            last_access_time: Timestamp::from_filetime(FileTime::from_last_access_time(meta)),
            last_write_time: Timestamp::from_filetime(FileTime::from_last_modification_time(meta)),
            volume_serial: (meta.dev() ^ (meta.dev() >> 32)) as u32,
            file_size: if file_type.is_file() { meta.len() } else { 0 },
            number_of_links: meta.nlink().min(u32::MAX as u64) as u32,
            file_index: meta.ino(),
        }
    }

    pub(super) fn set_archive_stamp(path: &Path, follow: bool, archived: bool) -> io::Result<()> {
        if archived {
            let meta = if follow {
                fs::metadata(path)?
            } else {
                fs::symlink_metadata(path)?
            };
            set(path, ARCHIVE_STAMP, stamp(&meta).as_bytes(), follow)
        } else {
            let removed = if follow {
                xattr::remove_deref(path, ARCHIVE_STAMP)
            } else {
                xattr::remove(path, ARCHIVE_STAMP)
            };
            if removed.is_err() {
                // Nothing stamped means already modified.
                let meta = fs::symlink_metadata(path)?;
                if !is_modified(path, &meta, follow) {
                    return removed;
                }
            }
            Ok(())
        }
    }

    pub(super) fn set_readonly(path: &Path, meta: &fs::Metadata, readonly: bool) -> io::Result<()> {
        let mode = meta.permissions().mode();
        let new_mode = if readonly {
            mode & !0o222
        } else if mode & 0o222 == 0 {
            mode | 0o200
        } else {
            return Ok(());
        };
        if new_mode == mode {
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(new_mode))
    }

    pub(super) fn named_streams(path: &Path, follow: bool) -> io::Result<Vec<(String, u64)>> {
        let listed = if follow {
            xattr::list_deref(path)
        } else {
            xattr::list(path)
        };
        let names = match listed {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::Unsupported => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let mut streams = vec![];
        for name in names {
            let name = match name.to_str() {
                Some(name) if name.starts_with(STREAM_PREFIX) && !name.starts_with(INTERNAL_PREFIX) => name,
                _ => continue,
            };
            let size = get(path, name, follow)?.map(|v| v.len() as u64).unwrap_or(0);
            streams.push((name[STREAM_PREFIX.len()..].to_string(), size));
        }
        streams.sort();
        Ok(streams)
    }

    pub(super) fn read_named(path: &Path, name: &str, follow: bool) -> io::Result<Option<Vec<u8>>> {
        get(path, &format!("{}{}", STREAM_PREFIX, name), follow)
    }

    pub(super) fn write_named(path: &Path, name: &str, data: &[u8], follow: bool) -> io::Result<()> {
        set(path, &format!("{}{}", STREAM_PREFIX, name), data, follow)
    }

    /// Mode, owner and group.
    pub(super) fn security_blob(meta: &fs::Metadata) -> Option<Vec<u8>> {
        let mut blob = Vec::with_capacity(SECURITY_BLOB_SIZE);
        blob.write_u32::<LittleEndian>(meta.mode()).ok()?;
        blob.write_u32::<LittleEndian>(meta.uid()).ok()?;
        blob.write_u32::<LittleEndian>(meta.gid()).ok()?;
        Some(blob)
    }

    pub(super) fn apply_security(path: &Path, blob: &[u8], is_symlink: bool) -> io::Result<()> {
        if blob.len() != SECURITY_BLOB_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unrecognized security data"));
        }
        let mut reader = blob;
        let mode = reader.read_u32::<LittleEndian>()?;
        let uid = reader.read_u32::<LittleEndian>()?;
        let gid = reader.read_u32::<LittleEndian>()?;

        let owned = if is_symlink {
            std::os::unix::fs::lchown(path, Some(uid), Some(gid))
        } else {
            std::os::unix::fs::chown(path, Some(uid), Some(gid))
        };
        match owned {
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                tracing::debug!(path = %path.display(), uid, gid, "ownership not restored: {}", e);
            }
            other => other?,
        }

        if is_symlink {
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
    }

    pub(super) fn link_target(path: &Path) -> io::Result<Vec<u8>> {
        Ok(fs::read_link(path)?.as_os_str().as_bytes().to_vec())
    }

    pub(super) fn create_symlink(target: &[u8], path: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(OsStr::from_bytes(target), path)
    }
}

#[cfg(not(unix))]
mod platform {
    use std::fs;
    use std::io;
    use std::path::Path;

    use filetime::FileTime;

    use super::unsupported;
    use crate::meta::{FileAttributes, FileInfo, Timestamp};

    pub(super) fn file_info(_path: &Path, meta: &fs::Metadata, _follow: bool) -> FileInfo {
        let file_type = meta.file_type();
        let mut attributes = FileAttributes::ARCHIVE;
        attributes.set(FileAttributes::DIRECTORY, file_type.is_dir());
        attributes.set(FileAttributes::REPARSE_POINT, file_type.is_symlink());
        attributes.set(FileAttributes::READONLY, meta.permissions().readonly());

        let creation_time = meta
            .created()
            .map(Timestamp::from_system_time)
            .unwrap_or_default();

        FileInfo {
            attributes,
            creation_time,
            last_access_time: Timestamp::from_filetime(FileTime::from_last_access_time(meta)),
            last_write_time: Timestamp::from_filetime(FileTime::from_last_modification_time(meta)),
            volume_serial: 0,
            file_size: if file_type.is_file() { meta.len() } else { 0 },
            number_of_links: 1,
            file_index: 0,
        }
    }

    pub(super) fn set_archive_stamp(_path: &Path, _follow: bool, archived: bool) -> io::Result<()> {
        if archived {
            Err(unsupported("archive flag"))
        } else {
            Ok(())
        }
    }

    pub(super) fn set_readonly(path: &Path, meta: &fs::Metadata, readonly: bool) -> io::Result<()> {
        let mut permissions = meta.permissions();
        if permissions.readonly() == readonly {
            return Ok(());
        }
        permissions.set_readonly(readonly);
        fs::set_permissions(path, permissions)
    }

    pub(super) fn named_streams(_path: &Path, _follow: bool) -> io::Result<Vec<(String, u64)>> {
        Ok(vec![])
    }

    pub(super) fn read_named(_path: &Path, _name: &str, _follow: bool) -> io::Result<Option<Vec<u8>>> {
        Err(unsupported("named streams"))
    }

    pub(super) fn write_named(_path: &Path, _name: &str, _data: &[u8], _follow: bool) -> io::Result<()> {
        Err(unsupported("named streams"))
    }

    pub(super) fn security_blob(_meta: &fs::Metadata) -> Option<Vec<u8>> {
        None
    }

    pub(super) fn apply_security(_path: &Path, _blob: &[u8], _is_symlink: bool) -> io::Result<()> {
        Err(unsupported("security data"))
    }

    pub(super) fn link_target(path: &Path) -> io::Result<Vec<u8>> {
        Ok(fs::read_link(path)?.to_string_lossy().into_owned().into_bytes())
    }

    pub(super) fn create_symlink(_target: &[u8], _path: &Path) -> io::Result<()> {
        Err(unsupported("symbolic links"))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn path(s: &str) -> ArchivePath {
        ArchivePath::new(s).unwrap()
    }

    #[test]
    fn metadata_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        std::fs::write(dir.path().join(".hidden"), b"abc").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let info = fs.probe(&path(".hidden")).unwrap().unwrap();
        assert!(info.attributes.contains(FileAttributes::HIDDEN));
        assert!(!info.is_directory());
        assert_eq!(info.file_size, 3);
        assert_eq!(info.number_of_links, 1);

        let info = fs.probe(&path("sub")).unwrap().unwrap();
        assert!(info.is_directory());
        assert_eq!(info.file_size, 0);

        assert!(fs.probe(&path("missing")).unwrap().is_none());
    }

    #[test]
    fn linked_directories_are_not_traversed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("d")).unwrap();
        let fs = LocalFs::new(dir.path());

        assert_eq!(fs.resolve(&path("d")).unwrap(), dir.path().join("d"));
        assert!(fs.resolve(&path("d/x")).is_err());
        assert!(fs.create_file(&path("d/x"), Access::FULL, Disposition::CreateNew).is_err());
        assert!(fs.create_directory_path(&path("d/y/z")).is_err());
        assert!(!outside.path().join("x").exists());
        assert!(!outside.path().join("y").exists());

        assert_eq!(fs.resolve(&path("new/x")).unwrap(), dir.path().join("new").join("x"));
    }

    #[test]
    fn hard_links_share_identity() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        std::fs::write(dir.path().join("a"), b"hi").unwrap();
        fs.create_hard_link(&path("a"), &path("b"), false).unwrap();

        let a = fs.probe(&path("a")).unwrap().unwrap();
        let b = fs.probe(&path("b")).unwrap().unwrap();
        assert_eq!(a.file_index, b.file_index);
        assert_eq!(a.volume_serial, b.volume_serial);
        assert_eq!(a.number_of_links, 2);
    }

    #[test]
    fn overwrite_does_not_follow_links() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        std::fs::write(dir.path().join("target"), b"keep").unwrap();
        std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();

        fs.create_file(&path("link"), Access::FULL, Disposition::Overwrite)
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("target")).unwrap(), b"keep");
        assert!(!std::fs::symlink_metadata(dir.path().join("link"))
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn symlinks_are_reparse_points() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        std::os::unix::fs::symlink("elsewhere", dir.path().join("link")).unwrap();

        let object = fs.open(&path("link"), Access::READ, false).unwrap();
        assert!(fs.query_metadata(&object).unwrap().is_reparse_point());
        assert_eq!(fs.reparse_data(&object).unwrap().unwrap(), b"elsewhere");

        let mut placeholder = fs
            .create_file(&path("copy"), Access::FULL, Disposition::CreateNew)
            .unwrap();
        fs.set_reparse_data(&mut placeholder, b"elsewhere").unwrap();
        assert_eq!(
            std::fs::read_link(dir.path().join("copy")).unwrap(),
            Path::new("elsewhere")
        );
    }

    #[test]
    fn security_blob_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFs::new(dir.path());
        std::fs::write(dir.path().join("a"), b"").unwrap();
        std::fs::write(dir.path().join("b"), b"").unwrap();
        std::fs::set_permissions(dir.path().join("a"), std::fs::Permissions::from_mode(0o640))
            .unwrap();

        let a = fs.open(&path("a"), Access::READ, false).unwrap();
        let blob = fs.security_descriptor(&a).unwrap().unwrap();
        assert_eq!(blob.len(), 12);

        let mut b = fs.open(&path("b"), Access::FULL, false).unwrap();
        fs.set_security_descriptor(&mut b, &blob).unwrap();
        let mode = std::fs::metadata(dir.path().join("b")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn zero_blocks_are_holes() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0u8; SPARSE_BLOCK * 4];
        data[SPARSE_BLOCK + 1] = 1;
        data[SPARSE_BLOCK * 3] = 2;
        std::fs::write(dir.path().join("s"), &data).unwrap();

        let mut file = File::open(dir.path().join("s")).unwrap();
        let ranges = scan_allocated(&mut file, data.len() as u64).unwrap();
        assert_eq!(
            ranges,
            vec![
                SPARSE_BLOCK as u64..2 * SPARSE_BLOCK as u64,
                3 * SPARSE_BLOCK as u64..4 * SPARSE_BLOCK as u64
            ]
        );
    }
}
