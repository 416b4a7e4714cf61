use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    unsupported, Access, DirEntry, Disposition, FileSystem, MetadataUpdate, ObjectStream,
    StreamDescriptor, StreamKind,
};
use crate::{
    meta::{FileAttributes, FileInfo, Timestamp, SHORT_NAME_MAX_LEN},
    path::ArchivePath,
};

const SYMLINK_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    attributes: FileAttributes,
    creation_time: Timestamp,
    last_access_time: Timestamp,
    last_write_time: Timestamp,
    data: Vec<u8>,
    allocated: Option<Vec<Range<u64>>>,
    streams: BTreeMap<String, Vec<u8>>,
    security: Option<Vec<u8>>,
    reparse: Option<Vec<u8>>,
}

impl Node {
    fn new(kind: NodeKind) -> Node {
        let now = Timestamp::now();
        let attributes = match kind {
            NodeKind::Directory => FileAttributes::empty(),
            _ => FileAttributes::ARCHIVE,
        };

        Node {
            kind,
            attributes,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            data: vec![],
            allocated: None,
            streams: BTreeMap::new(),
            security: None,
            reparse: None,
        }
    }

    fn structural_attributes(&self) -> FileAttributes {
        let mut attributes = self.attributes;
        attributes.set(FileAttributes::DIRECTORY, self.kind == NodeKind::Directory);
        attributes.set(FileAttributes::REPARSE_POINT, self.reparse.is_some());
        attributes.set(FileAttributes::SPARSE_FILE, self.allocated.is_some());
        attributes
    }

    fn touch(&mut self) {
        self.attributes = self.attributes.with(FileAttributes::ARCHIVE);
        self.last_write_time = Timestamp::now();
    }
}

#[derive(Debug)]
struct Tree {
    names: BTreeMap<String, u64>,
    nodes: HashMap<u64, Node>,
    short_names: HashMap<String, String>,
    next_index: u64,
    volume_serial: u32,
    fail_hard_links: bool,
    denied_access: Access,
}

impl Default for Tree {
    fn default() -> Self {
        let mut tree = Tree {
            names: BTreeMap::new(),
            nodes: HashMap::new(),
            short_names: HashMap::new(),
            next_index: 1,
            volume_serial: 0x5EED,
            fail_hard_links: false,
            denied_access: Access::default(),
        };
        tree.add(&ArchivePath::root(), Node::new(NodeKind::Directory));
        tree
    }
}

impl Tree {
    fn check_access(&self, access: Access) -> io::Result<()> {
        if access.intersects(self.denied_access) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "access denied"));
        }
        Ok(())
    }

    fn add(&mut self, path: &ArchivePath, node: Node) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.nodes.insert(index, node);
        self.names.insert(path.as_str().to_string(), index);
        index
    }

    fn index(&self, path: &ArchivePath) -> Option<u64> {
        self.names.get(path.as_str()).copied()
    }

    fn node(&self, index: u64) -> io::Result<&Node> {
        self.nodes.get(&index).ok_or_else(not_found)
    }

    fn node_mut(&mut self, index: u64) -> io::Result<&mut Node> {
        self.nodes.get_mut(&index).ok_or_else(not_found)
    }

    fn link_count(&self, index: u64) -> u32 {
        self.names.values().filter(|i| **i == index).count() as u32
    }

    fn info(&self, index: u64) -> io::Result<FileInfo> {
        let node = self.node(index)?;
        let file_size = match node.kind {
            NodeKind::File => node.data.len() as u64,
            _ => 0,
        };

        Ok(FileInfo {
            attributes: node.structural_attributes(),
            creation_time: node.creation_time,
            last_access_time: node.last_access_time,
            last_write_time: node.last_write_time,
            volume_serial: self.volume_serial,
            file_size,
            number_of_links: self.link_count(index),
            file_index: index,
        })
    }

    fn require_directory(&self, path: Option<ArchivePath>) -> io::Result<()> {
        let path = match path {
            Some(path) => path,
            None => return Ok(()),
        };
        let index = self.index(&path).ok_or_else(not_found)?;
        match self.node(index)?.kind {
            NodeKind::Directory => Ok(()),
            _ => Err(io::Error::new(io::ErrorKind::NotFound, "parent is not a directory")),
        }
    }

    fn has_children(&self, path: &ArchivePath) -> bool {
        self.names
            .keys()
            .any(|name| ArchivePath::from_raw(name.clone()).parent().as_ref() == Some(path))
    }

    /// Follows symlinks stored as root-relative targets.
    fn resolve(&self, path: &ArchivePath) -> io::Result<u64> {
        let mut index = self.index(path).ok_or_else(not_found)?;
        for _ in 0..SYMLINK_DEPTH {
            let node = self.node(index)?;
            let target = match (&node.kind, &node.reparse) {
                (NodeKind::Symlink, Some(target)) => target,
                _ => return Ok(index),
            };
            let target = std::str::from_utf8(target)
                .ok()
                .and_then(|target| ArchivePath::new(target).ok())
                .ok_or_else(not_found)?;
            index = self.index(&target).ok_or_else(not_found)?;
        }
        Err(io::Error::new(io::ErrorKind::Other, "too many levels of symbolic links"))
    }

    fn unlink(&mut self, path: &ArchivePath) -> Option<u64> {
        let index = self.names.remove(path.as_str())?;
        self.short_names.remove(path.as_str());
        if self.link_count(index) == 0 {
            self.nodes.remove(&index);
        }
        Some(index)
    }
}

fn not_found() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "no such object")
}

fn add_range(ranges: &mut Vec<Range<u64>>, new: Range<u64>) {
    if new.start >= new.end {
        return;
    }
    ranges.push(new);
    ranges.sort_by_key(|range| range.start);

    let mut merged: Vec<Range<u64>> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

/// An in-memory filesystem with inodes, hard links, named streams and
/// sparse files. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    tree: Arc<Mutex<Tree>>,
}

#[derive(Debug)]
pub struct MemoryObject {
    path: ArchivePath,
    index: u64,
    access: Access,
}

impl MemoryObject {
    pub fn path(&self) -> &ArchivePath {
        &self.path
    }
}

impl MemoryFs {
    pub fn new() -> MemoryFs {
        MemoryFs::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Makes every [`FileSystem::create_hard_link`] call fail.
    pub fn set_fail_hard_links(&self, fail: bool) {
        self.lock().fail_hard_links = fail;
    }

    /// Refuses any open or create that asks for one of these rights.
    pub fn set_denied_access(&self, denied: Access) {
        self.lock().denied_access = denied;
    }

    pub fn set_volume_serial(&self, serial: u32) {
        self.lock().volume_serial = serial;
    }

    fn insert_node(&self, path: &ArchivePath, node: Node) -> u64 {
        if let Some(parent) = path.parent() {
            self.insert_dir(&parent);
        }
        let mut tree = self.lock();
        tree.unlink(path);
        tree.add(path, node)
    }

    pub fn insert_dir(&self, path: &ArchivePath) -> u64 {
        if let Some(index) = self.lock().index(path) {
            return index;
        }
        self.insert_node(path, Node::new(NodeKind::Directory))
    }

    pub fn insert_file(&self, path: &ArchivePath, data: &[u8]) -> u64 {
        let mut node = Node::new(NodeKind::File);
        node.data = data.to_vec();
        self.insert_node(path, node)
    }

    /// A file of `len` bytes where only `regions` are allocated.
    pub fn insert_sparse(&self, path: &ArchivePath, len: u64, regions: &[(u64, &[u8])]) -> u64 {
        let mut node = Node::new(NodeKind::File);
        node.data = vec![0; len as usize];
        let mut allocated = vec![];
        for (offset, bytes) in regions {
            let start = *offset as usize;
            node.data[start..start + bytes.len()].copy_from_slice(bytes);
            add_range(&mut allocated, *offset..*offset + bytes.len() as u64);
        }
        node.allocated = Some(allocated);
        self.insert_node(path, node)
    }

    pub fn insert_symlink(&self, path: &ArchivePath, target: &str) -> u64 {
        let mut node = Node::new(NodeKind::Symlink);
        node.reparse = Some(target.as_bytes().to_vec());
        self.insert_node(path, node)
    }

    pub fn insert_link(&self, existing: &ArchivePath, new: &ArchivePath) -> io::Result<()> {
        let mut tree = self.lock();
        let index = tree.index(existing).ok_or_else(not_found)?;
        tree.names.insert(new.as_str().to_string(), index);
        Ok(())
    }

    pub fn insert_stream(&self, path: &ArchivePath, name: &str, data: &[u8]) -> io::Result<()> {
        self.with_node(path, |node| {
            node.streams.insert(name.to_string(), data.to_vec());
        })
    }

    pub fn set_attributes(&self, path: &ArchivePath, attributes: FileAttributes) -> io::Result<()> {
        self.with_node(path, |node| node.attributes = attributes)
    }

    pub fn set_times(&self, path: &ArchivePath, creation: Timestamp, access: Timestamp, write: Timestamp) -> io::Result<()> {
        self.with_node(path, |node| {
            node.creation_time = creation;
            node.last_access_time = access;
            node.last_write_time = write;
        })
    }

    pub fn set_security(&self, path: &ArchivePath, descriptor: &[u8]) -> io::Result<()> {
        self.with_node(path, |node| node.security = Some(descriptor.to_vec()))
    }

    pub fn set_short_name(&self, path: &ArchivePath, short_name: &str) {
        self.lock()
            .short_names
            .insert(path.as_str().to_string(), short_name.to_string());
    }

    fn with_node<T>(&self, path: &ArchivePath, f: impl FnOnce(&mut Node) -> T) -> io::Result<T> {
        let mut tree = self.lock();
        let index = tree.index(path).ok_or_else(not_found)?;
        Ok(f(tree.node_mut(index)?))
    }

    fn read_node<T>(&self, path: &ArchivePath, f: impl FnOnce(&Node) -> T) -> Option<T> {
        let tree = self.lock();
        let index = tree.index(path)?;
        tree.node(index).ok().map(f)
    }

    pub fn exists(&self, path: &ArchivePath) -> bool {
        self.lock().index(path).is_some()
    }

    pub fn index_of(&self, path: &ArchivePath) -> Option<u64> {
        self.lock().index(path)
    }

    pub fn info(&self, path: &ArchivePath) -> Option<FileInfo> {
        let tree = self.lock();
        let index = tree.index(path)?;
        tree.info(index).ok()
    }

    pub fn contents(&self, path: &ArchivePath) -> Option<Vec<u8>> {
        self.read_node(path, |node| node.data.clone())
    }

    pub fn stream(&self, path: &ArchivePath, name: &str) -> Option<Vec<u8>> {
        self.read_node(path, |node| node.streams.get(name).cloned()).flatten()
    }

    pub fn security(&self, path: &ArchivePath) -> Option<Vec<u8>> {
        self.read_node(path, |node| node.security.clone()).flatten()
    }

    pub fn symlink_target(&self, path: &ArchivePath) -> Option<Vec<u8>> {
        self.read_node(path, |node| node.reparse.clone()).flatten()
    }

    pub fn allocated(&self, path: &ArchivePath) -> Option<Vec<Range<u64>>> {
        self.read_node(path, |node| node.allocated.clone()).flatten()
    }

    pub fn short_name_of(&self, path: &ArchivePath) -> Option<String> {
        self.lock().short_names.get(path.as_str()).cloned()
    }

    /// Every path in the tree except the root, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .names
            .keys()
            .filter(|name| name.as_str() != crate::path::ROOT)
            .cloned()
            .collect()
    }

    fn object(&self, path: &ArchivePath, index: u64, access: Access) -> MemoryObject {
        MemoryObject {
            path: path.clone(),
            index,
            access,
        }
    }
}

impl FileSystem for MemoryFs {
    type Object = MemoryObject;
    type Stream = MemoryStream;

    fn open(&self, path: &ArchivePath, access: Access, follow_reparse: bool) -> io::Result<MemoryObject> {
        let tree = self.lock();
        tree.check_access(access)?;
        let index = if follow_reparse {
            tree.resolve(path)?
        } else {
            tree.index(path).ok_or_else(not_found)?
        };
        drop(tree);
        Ok(self.object(path, index, access))
    }

    fn create_file(&self, path: &ArchivePath, access: Access, disposition: Disposition) -> io::Result<MemoryObject> {
        let mut tree = self.lock();
        tree.require_directory(path.parent())?;
        tree.check_access(access)?;

        let index = match (tree.index(path), disposition) {
            (Some(_), Disposition::CreateNew) => {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "object exists"))
            }
            (Some(index), Disposition::Overwrite) => {
                let node = tree.node_mut(index)?;
                if node.kind == NodeKind::Directory {
                    return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
                }
                if node.attributes.contains(FileAttributes::READONLY) {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
                }
                node.kind = NodeKind::File;
                node.data.clear();
                node.allocated = None;
                node.streams.clear();
                node.reparse = None;
                node.touch();
                index
            }
            (None, _) => tree.add(path, Node::new(NodeKind::File)),
        };

        drop(tree);
        Ok(self.object(path, index, access))
    }

    fn create_directory_path(&self, path: &ArchivePath) -> io::Result<()> {
        let mut current = ArchivePath::root();
        for component in path.iter() {
            current = current.join(component)?;

            let mut tree = self.lock();
            match tree.index(&current) {
                Some(index) if tree.node(index)?.kind == NodeKind::Directory => {}
                Some(_) => {
                    return Err(io::Error::new(io::ErrorKind::AlreadyExists, "not a directory"))
                }
                None => {
                    tree.add(&current, Node::new(NodeKind::Directory));
                }
            }
        }
        Ok(())
    }

    fn query_metadata(&self, object: &MemoryObject) -> io::Result<FileInfo> {
        self.lock().info(object.index)
    }

    fn probe(&self, path: &ArchivePath) -> io::Result<Option<FileInfo>> {
        let tree = self.lock();
        match tree.index(path) {
            Some(index) => tree.info(index).map(Some),
            None => Ok(None),
        }
    }

    fn set_metadata(&self, object: &mut MemoryObject, update: &MetadataUpdate) -> io::Result<()> {
        let mut tree = self.lock();
        let node = tree.node_mut(object.index)?;

        if let Some(attributes) = update.attributes {
            node.attributes = attributes
                .without(FileAttributes::DIRECTORY)
                .without(FileAttributes::REPARSE_POINT)
                .without(FileAttributes::SPARSE_FILE);
        }
        if let Some(time) = update.creation_time {
            node.creation_time = time;
        }
        if let Some(time) = update.last_access_time {
            node.last_access_time = time;
        }
        if let Some(time) = update.last_write_time {
            node.last_write_time = time;
        }
        Ok(())
    }

    fn read_dir<'a>(
        &'a self,
        object: &'a MemoryObject,
    ) -> io::Result<Box<dyn Iterator<Item = io::Result<DirEntry>> + 'a>> {
        let tree = self.lock();
        if tree.node(object.index)?.kind != NodeKind::Directory {
            return Err(io::Error::new(io::ErrorKind::Other, "not a directory"));
        }

        let entries: Vec<io::Result<DirEntry>> = tree
            .names
            .keys()
            .map(|name| ArchivePath::from_raw(name.clone()))
            .filter(|path| path.parent().as_ref() == Some(&object.path))
            .filter_map(|path| {
                let short_name = tree.short_names.get(path.as_str()).cloned();
                path.file_name().map(|name| {
                    Ok(DirEntry {
                        name: name.to_string(),
                        short_name,
                    })
                })
            })
            .collect();

        Ok(Box::new(entries.into_iter()))
    }

    fn streams(&self, object: &MemoryObject) -> io::Result<Vec<StreamDescriptor>> {
        let tree = self.lock();
        let node = tree.node(object.index)?;
        let mut streams = vec![];

        if node.kind == NodeKind::File {
            streams.push(StreamDescriptor {
                kind: StreamKind::Primary,
                size: node.data.len() as u64,
                allocated: node.allocated.clone(),
            });
        }
        for (name, data) in &node.streams {
            streams.push(StreamDescriptor::new(
                StreamKind::Named(name.clone()),
                data.len() as u64,
            ));
        }
        if let Some(reparse) = &node.reparse {
            streams.push(StreamDescriptor::new(StreamKind::Reparse, reparse.len() as u64));
        }
        Ok(streams)
    }

    fn open_stream(&self, object: &MemoryObject, name: Option<&str>, access: Access) -> io::Result<MemoryStream> {
        if access.can_write() && !object.access.can_write() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "object not opened for writing"));
        }

        let mut tree = self.lock();
        tree.check_access(access)?;
        let node = tree.node_mut(object.index)?;
        match name {
            None if node.kind != NodeKind::File => {
                return Err(io::Error::new(io::ErrorKind::Other, "no primary stream"))
            }
            Some(name) if !node.streams.contains_key(name) => {
                if !access.can_write() {
                    return Err(not_found());
                }
                node.streams.insert(name.to_string(), vec![]);
            }
            _ => {}
        }

        Ok(MemoryStream {
            tree: Arc::clone(&self.tree),
            index: object.index,
            name: name.map(str::to_string),
            position: 0,
            writable: access.can_write(),
        })
    }

    fn security_descriptor(&self, object: &MemoryObject) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock().node(object.index)?.security.clone())
    }

    fn set_security_descriptor(&self, object: &mut MemoryObject, descriptor: &[u8]) -> io::Result<()> {
        self.lock().node_mut(object.index)?.security = Some(descriptor.to_vec());
        Ok(())
    }

    fn reparse_data(&self, object: &MemoryObject) -> io::Result<Option<Vec<u8>>> {
        Ok(self.lock().node(object.index)?.reparse.clone())
    }

    fn set_reparse_data(&self, object: &mut MemoryObject, data: &[u8]) -> io::Result<()> {
        let mut tree = self.lock();
        let node = tree.node_mut(object.index)?;
        if node.kind == NodeKind::File {
            node.kind = NodeKind::Symlink;
            node.data.clear();
            node.allocated = None;
        }
        node.reparse = Some(data.to_vec());
        Ok(())
    }

    fn short_name(&self, path: &ArchivePath) -> io::Result<Option<String>> {
        Ok(self.lock().short_names.get(path.as_str()).cloned())
    }

    fn set_short_name(&self, object: &mut MemoryObject, short_name: &str) -> io::Result<()> {
        if short_name.is_empty() || short_name.encode_utf16().count() > SHORT_NAME_MAX_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid short name"));
        }
        self.lock()
            .short_names
            .insert(object.path.as_str().to_string(), short_name.to_string());
        Ok(())
    }

    fn set_compression(&self, object: &mut MemoryObject, compressed: bool) -> io::Result<()> {
        let mut tree = self.lock();
        let node = tree.node_mut(object.index)?;
        node.attributes.set(FileAttributes::COMPRESSED, compressed);
        Ok(())
    }

    fn delete(&self, path: &ArchivePath) -> io::Result<()> {
        if path.is_root() {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "cannot delete the root"));
        }

        let mut tree = self.lock();
        let index = tree.index(path).ok_or_else(not_found)?;
        let node = tree.node(index)?;
        if node.attributes.contains(FileAttributes::READONLY) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        if node.kind == NodeKind::Directory && tree.has_children(path) {
            return Err(io::Error::new(io::ErrorKind::Other, "directory not empty"));
        }
        tree.unlink(path);
        Ok(())
    }

    fn create_hard_link(&self, existing: &ArchivePath, new: &ArchivePath, replace: bool) -> io::Result<()> {
        let mut tree = self.lock();
        if tree.fail_hard_links {
            return Err(unsupported("hard links"));
        }

        let index = tree.index(existing).ok_or_else(not_found)?;
        if tree.node(index)?.kind == NodeKind::Directory {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "cannot link a directory"));
        }
        tree.require_directory(new.parent())?;

        if tree.index(new).is_some() {
            if !replace {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "object exists"));
            }
            tree.unlink(new);
        }
        tree.names.insert(new.as_str().to_string(), index);
        Ok(())
    }
}

/// A cursor over one stream of a [`MemoryFs`] node. Writes go straight
/// to the tree.
#[derive(Debug)]
pub struct MemoryStream {
    tree: Arc<Mutex<Tree>>,
    index: u64,
    name: Option<String>,
    position: u64,
    writable: bool,
}

impl MemoryStream {
    fn with_node<T>(&self, f: impl FnOnce(&mut Node) -> io::Result<T>) -> io::Result<T> {
        let mut tree = self.tree.lock().unwrap_or_else(|e| e.into_inner());
        f(tree.node_mut(self.index)?)
    }

    fn buffer<'a>(node: &'a mut Node, name: &Option<String>) -> io::Result<&'a mut Vec<u8>> {
        match name {
            None => Ok(&mut node.data),
            Some(name) => node.streams.get_mut(name).ok_or_else(not_found),
        }
    }

    fn check_writable(&self) -> io::Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "stream opened read-only"))
        }
    }
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let name = self.name.clone();
        let read = self.with_node(|node| {
            let data = MemoryStream::buffer(node, &name)?;
            let start = (position as usize).min(data.len());
            let len = buf.len().min(data.len() - start);
            buf[..len].copy_from_slice(&data[start..start + len]);
            Ok(len)
        })?;
        self.position += read as u64;
        Ok(read)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_writable()?;
        let position = self.position;
        let name = self.name.clone();
        self.with_node(|node| {
            let start = position as usize;
            let end = start + buf.len();
            let data = MemoryStream::buffer(node, &name)?;
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);

            if name.is_none() {
                if let Some(allocated) = node.allocated.as_mut() {
                    add_range(allocated, position..end as u64);
                }
            }
            node.touch();
            Ok(())
        })?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let name = self.name.clone();
        let len = self.with_node(|node| Ok(MemoryStream::buffer(node, &name)?.len() as i64))?;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.position as i64 + delta,
            SeekFrom::End(delta) => len + delta,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start"));
        }
        self.position = target as u64;
        Ok(self.position)
    }
}

impl ObjectStream for MemoryStream {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.check_writable()?;
        let name = self.name.clone();
        self.with_node(|node| {
            MemoryStream::buffer(node, &name)?.resize(len as usize, 0);
            if name.is_none() {
                if let Some(allocated) = node.allocated.as_mut() {
                    allocated.retain(|range| range.start < len);
                    if let Some(last) = allocated.last_mut() {
                        last.end = last.end.min(len);
                    }
                }
            }
            Ok(())
        })
    }

    fn set_sparse(&mut self) -> io::Result<()> {
        self.check_writable()?;
        if self.name.is_some() {
            return Ok(());
        }
        self.with_node(|node| {
            if node.allocated.is_none() {
                let len = node.data.len() as u64;
                node.allocated = Some(if len > 0 { vec![0..len] } else { vec![] });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> ArchivePath {
        ArchivePath::new(s).unwrap()
    }

    #[test]
    fn links_share_one_node() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("a.txt"), b"hi");
        fs.insert_link(&path("a.txt"), &path("b.txt")).unwrap();

        let a = fs.info(&path("a.txt")).unwrap();
        let b = fs.info(&path("b.txt")).unwrap();
        assert_eq!(a.file_index, b.file_index);
        assert_eq!(a.number_of_links, 2);

        fs.delete(&path("a.txt")).unwrap();
        assert_eq!(fs.info(&path("b.txt")).unwrap().number_of_links, 1);
        assert_eq!(fs.contents(&path("b.txt")).unwrap(), b"hi");
    }

    #[test]
    fn create_dispositions() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("a"), b"old");

        let err = fs
            .create_file(&path("a"), Access::FULL, Disposition::CreateNew)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        fs.create_file(&path("a"), Access::FULL, Disposition::Overwrite)
            .unwrap();
        assert_eq!(fs.contents(&path("a")).unwrap(), b"");

        let err = fs
            .create_file(&path("missing/b"), Access::FULL, Disposition::CreateNew)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn sparse_writes_track_ranges() {
        let fs = MemoryFs::new();
        let object = fs
            .create_file(&path("s"), Access::FULL, Disposition::CreateNew)
            .unwrap();
        let mut stream = fs.open_stream(&object, None, Access::FULL).unwrap();
        stream.set_sparse().unwrap();
        stream.seek(SeekFrom::Start(100)).unwrap();
        stream.write_all(b"abc").unwrap();
        stream.seek(SeekFrom::Start(103)).unwrap();
        stream.write_all(b"de").unwrap();
        stream.set_len(4096).unwrap();

        assert_eq!(fs.allocated(&path("s")).unwrap(), vec![100..105]);
        assert_eq!(fs.info(&path("s")).unwrap().file_size, 4096);
        assert!(fs
            .info(&path("s"))
            .unwrap()
            .attributes
            .contains(FileAttributes::SPARSE_FILE));
    }

    #[test]
    fn named_streams_are_separate() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("f"), b"main");
        let object = fs.open(&path("f"), Access::FULL, false).unwrap();
        let mut stream = fs.open_stream(&object, Some("one"), Access::FULL).unwrap();
        stream.write_all(b"1").unwrap();

        assert_eq!(fs.stream(&path("f"), "one").unwrap(), b"1");
        assert_eq!(fs.contents(&path("f")).unwrap(), b"main");
        assert_eq!(
            fs.open_stream(&object, Some("two"), Access::READ)
                .unwrap_err()
                .kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn directory_listing_is_sorted_and_shallow() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("d/b"), b"");
        fs.insert_file(&path("d/a"), b"");
        fs.insert_file(&path("d/sub/c"), b"");
        fs.set_short_name(&path("d/a"), "A");

        let dir = fs.open(&path("d"), Access::READ, false).unwrap();
        let names: Vec<DirEntry> = fs
            .read_dir(&dir)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(
            names.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "sub"]
        );
        assert_eq!(names[0].short_name.as_deref(), Some("A"));
    }

    #[test]
    fn symlinks_resolve_only_when_followed() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("target"), b"x");
        fs.insert_symlink(&path("link"), "target");

        let followed = fs.open(&path("link"), Access::READ, true).unwrap();
        assert_eq!(fs.query_metadata(&followed).unwrap().file_size, 1);

        let own = fs.open(&path("link"), Access::READ, false).unwrap();
        assert!(fs.query_metadata(&own).unwrap().is_reparse_point());
        assert_eq!(fs.reparse_data(&own).unwrap().unwrap(), b"target");
    }

    #[test]
    fn hard_link_failures_can_be_forced() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("a"), b"");
        fs.set_fail_hard_links(true);
        assert!(fs.create_hard_link(&path("a"), &path("b"), false).is_err());
        fs.set_fail_hard_links(false);
        fs.create_hard_link(&path("a"), &path("b"), false).unwrap();
        assert_eq!(fs.index_of(&path("a")), fs.index_of(&path("b")));
    }

    #[test]
    fn denied_rights_are_refused() {
        let fs = MemoryFs::new();
        fs.insert_file(&path("a"), b"x");
        fs.set_denied_access(Access::SYSTEM_SECURITY);

        let denied = fs.open(&path("a"), Access::FULL, false).unwrap_err();
        assert_eq!(denied.kind(), io::ErrorKind::PermissionDenied);
        let denied = fs
            .create_file(&path("b"), Access::FULL, Disposition::CreateNew)
            .unwrap_err();
        assert_eq!(denied.kind(), io::ErrorKind::PermissionDenied);
        assert!(!fs.exists(&path("b")));

        let object = fs.open(&path("a"), Access::READ | Access::WRITE, false).unwrap();
        assert!(fs.open_stream(&object, Some("s"), Access::SYSTEM_SECURITY | Access::WRITE).is_err());
        fs.open_stream(&object, Some("s"), Access::WRITE).unwrap();
    }
}
