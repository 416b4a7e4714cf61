use std::fmt;

use crate::meta::{FILE_INFO_SIZE, SHORT_NAME_SIZE};

/// Size in bytes of an encoded [`StreamHeader`].
pub const HEADER_SIZE: usize = 20;

/// Carried in the attributes field of a file entry marker.
pub const MAGIC: u32 = 0xBAC0_0001;

/// Upper bound for `name_size` of any record.
pub const MAX_NAME_SIZE: u32 = 0xFFFF;

/// Length of the region offset that prefixes sparse payloads.
pub const SPARSE_OFFSET_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    /// Also the kind of a file entry marker.
    Invalid,
    Data,
    ExtendedAttributeData,
    SecurityData,
    AlternateData,
    Link,
    PropertyData,
    ObjectId,
    ReparseData,
    SparseBlock,
    TransactionData,
    Unknown(u32),
}

impl StreamId {
    pub fn from_id(id: u32) -> StreamId {
        match id {
            0 => StreamId::Invalid,
            1 => StreamId::Data,
            2 => StreamId::ExtendedAttributeData,
            3 => StreamId::SecurityData,
            4 => StreamId::AlternateData,
            5 => StreamId::Link,
            6 => StreamId::PropertyData,
            7 => StreamId::ObjectId,
            8 => StreamId::ReparseData,
            9 => StreamId::SparseBlock,
            10 => StreamId::TransactionData,
            other => StreamId::Unknown(other),
        }
    }

    pub fn id(self) -> u32 {
        match self {
            StreamId::Invalid => 0,
            StreamId::Data => 1,
            StreamId::ExtendedAttributeData => 2,
            StreamId::SecurityData => 3,
            StreamId::AlternateData => 4,
            StreamId::Link => 5,
            StreamId::PropertyData => 6,
            StreamId::ObjectId => 7,
            StreamId::ReparseData => 8,
            StreamId::SparseBlock => 9,
            StreamId::TransactionData => 10,
            StreamId::Unknown(id) => id,
        }
    }
}

/// Bit set stored in [`StreamHeader::attributes`] for stream records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamAttributes(u32);

impl StreamAttributes {
    pub const NORMAL: StreamAttributes = StreamAttributes(0x0);
    pub const MODIFIED_WHEN_READ: StreamAttributes = StreamAttributes(0x1);
    pub const CONTAINS_SECURITY: StreamAttributes = StreamAttributes(0x2);
    pub const CONTAINS_PROPERTIES: StreamAttributes = StreamAttributes(0x4);
    pub const SPARSE: StreamAttributes = StreamAttributes(0x8);

    const DEFINED: u32 = 0xF;

    pub const fn from_bits(bits: u32) -> StreamAttributes {
        StreamAttributes(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: StreamAttributes) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Whether only known bits are set.
    pub const fn is_defined(self) -> bool {
        self.0 & !Self::DEFINED == 0
    }
}

impl fmt::Debug for StreamAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamAttributes({:#x})", self.0)
    }
}

/// The fixed 20 byte prefix of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub id: StreamId,
    pub attributes: u32,
    pub size: u64,
    pub name_size: u32,
}

impl StreamHeader {
    pub(crate) fn file_entry(name_size: u32, with_short_name: bool) -> StreamHeader {
        let size = if with_short_name {
            FILE_INFO_SIZE + SHORT_NAME_SIZE
        } else {
            FILE_INFO_SIZE
        };

        StreamHeader {
            id: StreamId::Invalid,
            attributes: MAGIC,
            size: size as u64,
            name_size,
        }
    }

    pub(crate) fn stream(
        id: StreamId,
        attributes: StreamAttributes,
        size: u64,
        name_size: u32,
    ) -> StreamHeader {
        StreamHeader {
            id,
            attributes: attributes.bits(),
            size,
            name_size,
        }
    }

    /// Whether this header satisfies every structural rule of a file entry
    /// marker. Resynchronization relies on this check alone.
    pub fn is_file_entry_marker(&self) -> bool {
        self.id == StreamId::Invalid
            && self.attributes == MAGIC
            && (self.size == FILE_INFO_SIZE as u64
                || self.size == (FILE_INFO_SIZE + SHORT_NAME_SIZE) as u64)
            && self.name_size > 0
            && self.name_size <= MAX_NAME_SIZE
            && self.name_size % 2 == 0
    }

    /// Whether this header can start a stream record belonging to the
    /// current object. Unknown kinds, undefined attribute bits and names on
    /// unnamed kinds all count as corruption.
    pub fn is_plausible_stream(&self) -> bool {
        if self.name_size > MAX_NAME_SIZE || self.name_size % 2 != 0 {
            return false;
        }
        if !self.stream_attributes().is_defined() {
            return false;
        }

        match self.id {
            StreamId::Invalid | StreamId::Unknown(_) => false,
            StreamId::Data | StreamId::SparseBlock => self.name_size == 0,
            StreamId::Link => self.name_size == 0 && self.size <= MAX_NAME_SIZE as u64,
            _ => true,
        }
    }

    pub fn has_short_name(&self) -> bool {
        self.size == (FILE_INFO_SIZE + SHORT_NAME_SIZE) as u64
    }

    pub fn stream_attributes(&self) -> StreamAttributes {
        StreamAttributes::from_bits(self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_rules() {
        let marker = StreamHeader::file_entry(10, false);
        assert!(marker.is_file_entry_marker());
        assert!(StreamHeader::file_entry(10, true).is_file_entry_marker());

        let odd = StreamHeader {
            name_size: 9,
            ..marker
        };
        assert!(!odd.is_file_entry_marker());

        let unnamed = StreamHeader {
            name_size: 0,
            ..marker
        };
        assert!(!unnamed.is_file_entry_marker());

        let oversize = StreamHeader {
            name_size: 0x1_0000,
            ..marker
        };
        assert!(!oversize.is_file_entry_marker());

        let wrong_size = StreamHeader { size: 60, ..marker };
        assert!(!wrong_size.is_file_entry_marker());

        let no_magic = StreamHeader {
            attributes: 0,
            ..marker
        };
        assert!(!no_magic.is_file_entry_marker());
    }

    #[test]
    fn stream_plausibility() {
        let data = StreamHeader::stream(StreamId::Data, StreamAttributes::NORMAL, 4, 0);
        assert!(data.is_plausible_stream());
        assert!(!data.is_file_entry_marker());

        let odd_name = StreamHeader::stream(StreamId::AlternateData, StreamAttributes::NORMAL, 4, 3);
        assert!(!odd_name.is_plausible_stream());

        let invalid = StreamHeader::stream(StreamId::Invalid, StreamAttributes::NORMAL, 4, 0);
        assert!(!invalid.is_plausible_stream());

        let unknown = StreamHeader::stream(StreamId::Unknown(11), StreamAttributes::NORMAL, 4, 0);
        assert!(!unknown.is_plausible_stream());

        let named_data = StreamHeader::stream(StreamId::Data, StreamAttributes::NORMAL, 4, 2);
        assert!(!named_data.is_plausible_stream());

        let stray_bits = StreamHeader::stream(StreamId::Data, StreamAttributes::from_bits(0x10), 4, 0);
        assert!(!stray_bits.is_plausible_stream());

        let sparse = StreamHeader::stream(StreamId::AlternateData, StreamAttributes::SPARSE, 4, 2);
        assert!(sparse.is_plausible_stream());
    }

    #[test]
    fn stream_ids_map_both_ways() {
        for id in 0..=12 {
            assert_eq!(StreamId::from_id(id).id(), id);
        }
        assert_eq!(StreamId::from_id(5), StreamId::Link);
        assert_eq!(StreamId::from_id(42), StreamId::Unknown(42));
    }

    #[test]
    fn attribute_bits() {
        let attrs = StreamAttributes::from_bits(0x9);
        assert!(attrs.contains(StreamAttributes::SPARSE));
        assert!(attrs.contains(StreamAttributes::MODIFIED_WHEN_READ));
        assert!(!attrs.contains(StreamAttributes::CONTAINS_SECURITY));
        assert!(!attrs.contains(StreamAttributes::NORMAL));
    }
}
