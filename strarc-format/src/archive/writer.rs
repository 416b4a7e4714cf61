use std::io::Write;

use crate::{
    counting::CountingWriter,
    error::ArchiveError,
    header::{StreamAttributes, StreamHeader, StreamId, HEADER_SIZE, MAX_NAME_SIZE, SPARSE_OFFSET_SIZE},
    meta::{encode_short_name, FileInfo, FILE_INFO_SIZE, SHORT_NAME_SIZE},
    path::ArchivePath,
    ser::{encode_utf16le, Serialize},
};

/// Encodes records onto an archive byte stream. Every record goes out in a
/// single write.
pub struct ArchiveWriter<W: Write> {
    inner: CountingWriter<W>,
    buffer_size: usize,
    record: Vec<u8>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W, buffer_size: usize) -> ArchiveWriter<W> {
        ArchiveWriter {
            inner: CountingWriter::new(inner),
            buffer_size,
            record: Vec::with_capacity(buffer_size),
        }
    }

    #[inline(always)]
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }

    /// Largest payload a record named with `name_size` bytes can carry.
    pub fn max_payload(&self, name_size: usize) -> Result<usize, ArchiveError> {
        match self.buffer_size.checked_sub(HEADER_SIZE + name_size) {
            Some(room) if room > 0 => Ok(room),
            _ => Err(ArchiveError::BadBufferSize {
                needed: (HEADER_SIZE + name_size + 1) as u64,
                buffer_size: self.buffer_size,
            }),
        }
    }

    /// Writes a file entry marker. A short name is stored only when it fits
    /// its slot.
    pub fn write_file_entry(
        &mut self,
        path: &ArchivePath,
        info: &FileInfo,
        short_name: Option<&str>,
    ) -> Result<(), ArchiveError> {
        let name = path.to_utf16le();
        let slot = short_name.and_then(|short| {
            let slot = encode_short_name(short);
            if slot.is_none() {
                tracing::debug!(%path, short, "short name does not fit its slot");
            }
            slot
        });

        let body_size = name.len() + FILE_INFO_SIZE + if slot.is_some() { SHORT_NAME_SIZE } else { 0 };
        if name.len() > MAX_NAME_SIZE as usize || body_size > self.buffer_size.saturating_sub(HEADER_SIZE) {
            return Err(ArchiveError::BadBufferSize {
                needed: (HEADER_SIZE + body_size) as u64,
                buffer_size: self.buffer_size,
            });
        }

        self.record.clear();
        let header = StreamHeader::file_entry(name.len() as u32, slot.is_some());
        header.write(&mut self.record).map_err(ArchiveError::ArchiveIo)?;
        self.record.extend_from_slice(&name);
        info.write(&mut self.record).map_err(ArchiveError::ArchiveIo)?;
        if let Some(slot) = slot {
            self.record.extend_from_slice(&slot);
        }

        tracing::debug!(%path, size = info.file_size, "writing file entry");
        self.flush_record()
    }

    pub fn write_stream(
        &mut self,
        id: StreamId,
        attributes: StreamAttributes,
        name: Option<&str>,
        payload: &[u8],
    ) -> Result<(), ArchiveError> {
        let name = name.map(encode_utf16le).unwrap_or_default();
        self.check_fits(name.len(), payload.len())?;

        self.record.clear();
        let header = StreamHeader::stream(id, attributes, payload.len() as u64, name.len() as u32);
        header.write(&mut self.record).map_err(ArchiveError::ArchiveIo)?;
        self.record.extend_from_slice(&name);
        self.record.extend_from_slice(payload);
        self.flush_record()
    }

    /// Writes one allocated region of a sparse stream.
    pub fn write_sparse_block(&mut self, offset: u64, data: &[u8]) -> Result<(), ArchiveError> {
        self.check_fits(0, SPARSE_OFFSET_SIZE + data.len())?;

        self.record.clear();
        let header = StreamHeader::stream(
            StreamId::SparseBlock,
            StreamAttributes::SPARSE,
            (SPARSE_OFFSET_SIZE + data.len()) as u64,
            0,
        );
        header.write(&mut self.record).map_err(ArchiveError::ArchiveIo)?;
        self.record.extend_from_slice(&offset.to_le_bytes());
        self.record.extend_from_slice(data);
        self.flush_record()
    }

    /// Writes a reference to the first archived name of a linked object.
    pub fn write_link(&mut self, target: &ArchivePath) -> Result<(), ArchiveError> {
        let payload = target.to_utf16le();
        if payload.len() > MAX_NAME_SIZE as usize {
            return Err(ArchiveError::BadHeader {
                kind: StreamId::Link,
            });
        }
        self.write_stream(StreamId::Link, StreamAttributes::NORMAL, None, &payload)
    }

    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        self.inner.flush().map_err(ArchiveError::ArchiveIo)
    }

    pub fn into_inner(mut self) -> Result<W, ArchiveError> {
        self.flush()?;
        Ok(self.inner.into_inner())
    }

    fn check_fits(&self, name_size: usize, payload_size: usize) -> Result<(), ArchiveError> {
        if name_size > MAX_NAME_SIZE as usize || payload_size > self.max_payload(name_size)? {
            return Err(ArchiveError::BadBufferSize {
                needed: (HEADER_SIZE + name_size + payload_size) as u64,
                buffer_size: self.buffer_size,
            });
        }
        Ok(())
    }

    fn flush_record(&mut self) -> Result<(), ArchiveError> {
        let pending = self.record.len();
        self.inner
            .write_all(&self.record)
            .map_err(|e| ArchiveError::from_write(e, pending))
    }
}
