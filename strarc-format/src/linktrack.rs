use crate::{error::ArchiveError, path::ArchivePath};

const BUCKET_COUNT: usize = 256;

/// The low 48 bits of an object index identify the object; the rest is a
/// reuse sequence number.
const OBJECT_ID_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub volume_id: u32,
    pub object_id: u64,
}

impl LinkKey {
    pub fn new(volume_id: u32, file_index: u64) -> LinkKey {
        LinkKey {
            volume_id,
            object_id: file_index & OBJECT_ID_MASK,
        }
    }

    #[inline(always)]
    fn bucket(&self) -> usize {
        ((self.object_id & 0xFF0) >> 4) as usize
    }
}

#[derive(Debug)]
struct LinkEntry {
    key: LinkKey,
    path: ArchivePath,
}

/// Remembers the first archived path of every multiply-linked object seen
/// during one backup.
#[derive(Debug)]
pub struct LinkTracker {
    buckets: Vec<Vec<LinkEntry>>,
    len: usize,
}

impl Default for LinkTracker {
    fn default() -> Self {
        LinkTracker {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }
}

impl LinkTracker {
    pub fn new() -> LinkTracker {
        LinkTracker::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the path first registered for this object, or registers
    /// `candidate` and returns `None`.
    pub fn lookup_or_register(
        &mut self,
        volume_id: u32,
        file_index: u64,
        candidate: &ArchivePath,
    ) -> Result<Option<&ArchivePath>, ArchiveError> {
        let key = LinkKey::new(volume_id, file_index);
        let bucket = &mut self.buckets[key.bucket()];

        if let Some(index) = bucket.iter().position(|entry| entry.key == key) {
            return Ok(Some(&bucket[index].path));
        }

        let mut owned = String::new();
        owned
            .try_reserve_exact(candidate.as_str().len())
            .map_err(|_| ArchiveError::OutOfMemoryForLinkTracking)?;
        owned.push_str(candidate.as_str());
        bucket
            .try_reserve(1)
            .map_err(|_| ArchiveError::OutOfMemoryForLinkTracking)?;

        bucket.push(LinkEntry {
            key,
            path: ArchivePath::from_raw(owned),
        });
        self.len += 1;
        Ok(None)
    }
}
