use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use crate::{
    header::{StreamHeader, StreamId, HEADER_SIZE},
    meta::{FileAttributes, FileInfo, Timestamp},
};

pub(crate) trait DeserializeOwned {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self>
    where
        Self: Sized;
}

#[inline(always)]
fn read_split_low_high<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let low = reader.read_u32::<LittleEndian>()? as u64;
    let high = reader.read_u32::<LittleEndian>()? as u64;
    Ok(high << 32 | low)
}

#[inline(always)]
fn read_split_high_low<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let high = reader.read_u32::<LittleEndian>()? as u64;
    let low = reader.read_u32::<LittleEndian>()? as u64;
    Ok(high << 32 | low)
}

/// Strict UTF-16LE decoding; `None` for odd lengths or unpaired surrogates.
pub(crate) fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16(&units).ok()
}

pub(crate) fn decode_utf16le_lossy(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16_lossy(&units)
}

impl StreamHeader {
    /// Interprets a window of raw archive bytes as a header. Never fails;
    /// validity is judged separately.
    pub(crate) fn from_bytes(raw: &[u8; HEADER_SIZE]) -> StreamHeader {
        StreamHeader {
            id: StreamId::from_id(LittleEndian::read_u32(&raw[0..4])),
            attributes: LittleEndian::read_u32(&raw[4..8]),
            size: LittleEndian::read_u64(&raw[8..16]),
            name_size: LittleEndian::read_u32(&raw[16..20]),
        }
    }
}

impl DeserializeOwned for StreamHeader {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let mut raw = [0u8; HEADER_SIZE];
        reader.read_exact(&mut raw)?;
        let header = StreamHeader::from_bytes(&raw);
        tracing::trace!(
            id = ?header.id,
            attributes = format_args!("{:#x}", header.attributes),
            size = header.size,
            name_size = header.name_size,
            "deserialized StreamHeader"
        );
        Ok(header)
    }
}

impl DeserializeOwned for Timestamp {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(Timestamp(read_split_low_high(reader)?))
    }
}

impl DeserializeOwned for FileInfo {
    fn deserialize_owned<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let attributes = FileAttributes::from_bits(reader.read_u32::<LittleEndian>()?);
        let creation_time = Timestamp::deserialize_owned(reader)?;
        let last_access_time = Timestamp::deserialize_owned(reader)?;
        let last_write_time = Timestamp::deserialize_owned(reader)?;
        let volume_serial = reader.read_u32::<LittleEndian>()?;
        let file_size = read_split_high_low(reader)?;
        let number_of_links = reader.read_u32::<LittleEndian>()?;
        let file_index = read_split_high_low(reader)?;

        tracing::debug!(
            attributes = format_args!("{:#x}", attributes.bits()),
            file_size,
            number_of_links,
            file_index = format_args!("{:#x}", file_index),
            "deserialized FileInfo"
        );

        Ok(FileInfo {
            attributes,
            creation_time,
            last_access_time,
            last_write_time,
            volume_serial,
            file_size,
            number_of_links,
            file_index,
        })
    }
}
