use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::{header::StreamHeader, meta::FileInfo, meta::Timestamp};

pub(crate) trait Serialize {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;
}

/// Writes a 64-bit value as low word then high word.
#[inline(always)]
fn write_split_low_high<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>(value as u32)?;
    writer.write_u32::<LittleEndian>((value >> 32) as u32)
}

/// Writes a 64-bit value as high word then low word.
#[inline(always)]
fn write_split_high_low<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    writer.write_u32::<LittleEndian>((value >> 32) as u32)?;
    writer.write_u32::<LittleEndian>(value as u32)
}

pub(crate) fn encode_utf16le(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() * 2);
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

impl Serialize for StreamHeader {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.id.id())?;
        writer.write_u32::<LittleEndian>(self.attributes)?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u32::<LittleEndian>(self.name_size)
    }
}

impl Serialize for Timestamp {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        write_split_low_high(writer, self.0)
    }
}

impl Serialize for FileInfo {
    fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.attributes.bits())?;
        self.creation_time.write(writer)?;
        self.last_access_time.write(writer)?;
        self.last_write_time.write(writer)?;
        writer.write_u32::<LittleEndian>(self.volume_serial)?;
        write_split_high_low(writer, self.file_size)?;
        writer.write_u32::<LittleEndian>(self.number_of_links)?;
        write_split_high_low(writer, self.file_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{StreamAttributes, StreamId, HEADER_SIZE};
    use crate::meta::{FileAttributes, FILE_INFO_SIZE};

    #[test]
    fn header_layout() {
        let header = StreamHeader::stream(
            StreamId::AlternateData,
            StreamAttributes::SPARSE,
            0x0102_0304_0506_0708,
            6,
        );
        let mut out = vec![];
        header.write(&mut out).unwrap();

        assert_eq!(out.len(), HEADER_SIZE);
        assert_eq!(&out[0..4], &[4, 0, 0, 0]);
        assert_eq!(&out[4..8], &[8, 0, 0, 0]);
        assert_eq!(&out[8..16], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&out[16..20], &[6, 0, 0, 0]);
    }

    #[test]
    fn file_info_layout() {
        let info = FileInfo {
            attributes: FileAttributes::ARCHIVE,
            creation_time: Timestamp(0x1111_1111_2222_2222),
            last_access_time: Timestamp(0),
            last_write_time: Timestamp(0),
            volume_serial: 0xABCD,
            file_size: 0x0000_0001_0000_0002,
            number_of_links: 2,
            file_index: 0x0000_0003_0000_0004,
        };
        let mut out = vec![];
        info.write(&mut out).unwrap();

        assert_eq!(out.len(), FILE_INFO_SIZE);
        assert_eq!(&out[0..4], &[0x20, 0, 0, 0]);
        // times are low word first
        assert_eq!(&out[4..8], &[0x22, 0x22, 0x22, 0x22]);
        assert_eq!(&out[8..12], &[0x11, 0x11, 0x11, 0x11]);
        assert_eq!(&out[28..32], &[0xCD, 0xAB, 0, 0]);
        // size and index are high word first
        assert_eq!(&out[32..36], &[1, 0, 0, 0]);
        assert_eq!(&out[36..40], &[2, 0, 0, 0]);
        assert_eq!(&out[40..44], &[2, 0, 0, 0]);
        assert_eq!(&out[44..48], &[3, 0, 0, 0]);
        assert_eq!(&out[48..52], &[4, 0, 0, 0]);
    }

    #[test]
    fn utf16le_names() {
        assert_eq!(encode_utf16le("a\\b"), vec![b'a', 0, b'\\', 0, b'b', 0]);
        assert_eq!(encode_utf16le("🧊").len(), 4);
    }
}
