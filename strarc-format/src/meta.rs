use std::fmt;
use std::ops::BitOr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;

/// Size in bytes of an encoded [`FileInfo`].
pub const FILE_INFO_SIZE: usize = 52;

/// Size in bytes of the optional short name slot after a [`FileInfo`].
pub const SHORT_NAME_SIZE: usize = 26;

/// Longest short name that fits its slot with a terminating NUL.
pub const SHORT_NAME_MAX_LEN: usize = SHORT_NAME_SIZE / 2 - 1;

/// 100ns ticks between 1601-01-01 and the Unix epoch.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: u64 = 10_000_000;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileAttributes(u32);

impl FileAttributes {
    pub const READONLY: FileAttributes = FileAttributes(0x1);
    pub const HIDDEN: FileAttributes = FileAttributes(0x2);
    pub const SYSTEM: FileAttributes = FileAttributes(0x4);
    pub const DIRECTORY: FileAttributes = FileAttributes(0x10);
    /// Set whenever the object changes; cleared by full and incremental backups.
    pub const ARCHIVE: FileAttributes = FileAttributes(0x20);
    pub const NORMAL: FileAttributes = FileAttributes(0x80);
    pub const TEMPORARY: FileAttributes = FileAttributes(0x100);
    pub const SPARSE_FILE: FileAttributes = FileAttributes(0x200);
    pub const REPARSE_POINT: FileAttributes = FileAttributes(0x400);
    pub const COMPRESSED: FileAttributes = FileAttributes(0x800);

    pub const fn empty() -> FileAttributes {
        FileAttributes(0)
    }

    pub const fn from_bits(bits: u32) -> FileAttributes {
        FileAttributes(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: FileAttributes) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn with(self, other: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 | other.0)
    }

    pub const fn without(self, other: FileAttributes) -> FileAttributes {
        FileAttributes(self.0 & !other.0)
    }

    pub fn set(&mut self, other: FileAttributes, on: bool) {
        *self = if on { self.with(other) } else { self.without(other) };
    }

    pub const fn is_directory(self) -> bool {
        self.contains(FileAttributes::DIRECTORY)
    }

    pub const fn is_reparse_point(self) -> bool {
        self.contains(FileAttributes::REPARSE_POINT)
    }
}

impl BitOr for FileAttributes {
    type Output = FileAttributes;

    fn bitor(self, rhs: FileAttributes) -> FileAttributes {
        self.with(rhs)
    }
}

impl fmt::Debug for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileAttributes({:#x})", self.0)
    }
}

/// A point in time as 100ns ticks since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }

    /// Times before 1601 clamp to zero.
    pub fn from_unix(seconds: i64, nanos: u32) -> Timestamp {
        let ticks = seconds as i128 * TICKS_PER_SECOND as i128
            + (nanos / 100) as i128
            + UNIX_EPOCH_TICKS as i128;
        Timestamp(ticks.clamp(0, u64::MAX as i128) as u64)
    }

    pub fn from_system_time(time: SystemTime) -> Timestamp {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Timestamp::from_unix(after.as_secs() as i64, after.subsec_nanos()),
            Err(before) => {
                let before = before.duration();
                let mut seconds = -(before.as_secs() as i64);
                let mut nanos = before.subsec_nanos();
                if nanos > 0 {
                    seconds -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                Timestamp::from_unix(seconds, nanos)
            }
        }
    }

    pub fn from_filetime(time: FileTime) -> Timestamp {
        Timestamp::from_unix(time.unix_seconds(), time.nanoseconds())
    }

    /// Seconds and nanoseconds relative to the Unix epoch.
    pub fn to_unix(self) -> (i64, u32) {
        let relative = self.0 as i128 - UNIX_EPOCH_TICKS as i128;
        let seconds = relative.div_euclid(TICKS_PER_SECOND as i128) as i64;
        let nanos = (relative.rem_euclid(TICKS_PER_SECOND as i128) * 100) as u32;
        (seconds, nanos)
    }

    pub fn to_filetime(self) -> FileTime {
        let (seconds, nanos) = self.to_unix();
        FileTime::from_unix_time(seconds, nanos)
    }

    pub fn to_system_time(self) -> SystemTime {
        let (seconds, nanos) = self.to_unix();
        if seconds >= 0 {
            UNIX_EPOCH + Duration::new(seconds as u64, nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(seconds.unsigned_abs()) + Duration::from_nanos(nanos as u64)
        }
    }
}

/// Per-object metadata carried in every file entry marker.
///
/// The on-disk layout is the 52 byte handle information block: attributes,
/// three timestamps, volume serial, size (high word first), link count and
/// object index (high word first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub attributes: FileAttributes,
    pub creation_time: Timestamp,
    pub last_access_time: Timestamp,
    pub last_write_time: Timestamp,
    pub volume_serial: u32,
    pub file_size: u64,
    pub number_of_links: u32,
    pub file_index: u64,
}

impl FileInfo {
    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_reparse_point(&self) -> bool {
        self.attributes.is_reparse_point()
    }

    pub fn is_modified(&self) -> bool {
        self.attributes.contains(FileAttributes::ARCHIVE)
    }
}

/// Encodes a short name into its fixed slot. Names that do not fit are
/// refused.
pub(crate) fn encode_short_name(name: &str) -> Option<[u8; SHORT_NAME_SIZE]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.is_empty() || units.len() > SHORT_NAME_MAX_LEN {
        return None;
    }

    let mut slot = [0u8; SHORT_NAME_SIZE];
    for (chunk, unit) in slot.chunks_exact_mut(2).zip(units) {
        chunk.copy_from_slice(&unit.to_le_bytes());
    }
    Some(slot)
}

/// Reads a short name slot up to its first NUL. Empty slots yield `None`.
pub(crate) fn decode_short_name(slot: &[u8]) -> Option<String> {
    let units: Vec<u16> = slot
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|unit| *unit != 0)
        .collect();

    if units.is_empty() {
        return None;
    }
    Some(String::from_utf16_lossy(&units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_epoch_in_ticks() {
        assert_eq!(Timestamp::from_unix(0, 0).0, UNIX_EPOCH_TICKS);
        assert_eq!(Timestamp::from_system_time(UNIX_EPOCH).0, UNIX_EPOCH_TICKS);
        assert_eq!(Timestamp(UNIX_EPOCH_TICKS).to_unix(), (0, 0));
    }

    #[test]
    fn timestamps_keep_100ns_precision() {
        let ts = Timestamp::from_unix(1_600_000_000, 123_456_789);
        assert_eq!(ts.to_unix(), (1_600_000_000, 123_456_700));

        let ft = ts.to_filetime();
        assert_eq!(Timestamp::from_filetime(ft), ts);
    }

    #[test]
    fn timestamps_before_unix_epoch() {
        let ts = Timestamp::from_unix(-1, 500_000_000);
        assert_eq!(ts.0, UNIX_EPOCH_TICKS - 5_000_000);
        assert_eq!(ts.to_unix(), (-1, 500_000_000));
        assert_eq!(Timestamp::from_unix(i64::MIN / 2, 0).0, 0);
    }

    #[test]
    fn short_name_slot() {
        let slot = encode_short_name("PROGRA~1").unwrap();
        assert_eq!(&slot[..4], &[b'P', 0, b'R', 0]);
        assert_eq!(decode_short_name(&slot).as_deref(), Some("PROGRA~1"));

        assert!(encode_short_name("").is_none());
        assert!(encode_short_name("ABCDEFGHIJKLM").is_none());
        assert!(encode_short_name("ABCDEFGH.TXT").is_some());
        assert_eq!(decode_short_name(&[0u8; SHORT_NAME_SIZE]), None);
    }

    #[test]
    fn attribute_helpers() {
        let mut attrs = FileAttributes::DIRECTORY | FileAttributes::ARCHIVE;
        assert!(attrs.is_directory());
        attrs.set(FileAttributes::ARCHIVE, false);
        assert!(!attrs.contains(FileAttributes::ARCHIVE));
        assert_eq!(attrs.bits(), 0x10);
    }
}
