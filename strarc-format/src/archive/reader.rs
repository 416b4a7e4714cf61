use std::io::{ErrorKind, Read};

use crate::{
    de::{decode_utf16le_lossy, DeserializeOwned},
    error::ArchiveError,
    header::{StreamHeader, HEADER_SIZE},
    meta::{decode_short_name, FileInfo, FILE_INFO_SIZE},
    path::ArchivePath,
    record::{FileEntry, Record, StreamRecord},
    session::CancelToken,
};

/// Decodes records from an archive byte stream.
///
/// Stream payloads are not buffered: after [`next_record`](Self::next_record)
/// returns a [`StreamRecord`], its payload is consumed with
/// [`read_payload`](Self::read_payload) or skipped automatically by the next
/// decode call.
pub struct ArchiveReader<R> {
    inner: R,
    buffer_size: usize,
    cancel: CancelToken,
    position: u64,
    remaining: u64,
    peeked: Option<Record>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(inner: R, buffer_size: usize, cancel: CancelToken) -> ArchiveReader<R> {
        ArchiveReader {
            inner,
            buffer_size,
            cancel,
            position: 0,
            remaining: 0,
            peeked: None,
        }
    }

    /// Bytes consumed from the underlying reader so far.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Unread payload bytes of the current stream record.
    #[inline(always)]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Makes the next decode call return `record` again. Only valid right
    /// after `record` was decoded, before any of its payload was read.
    pub fn put_back(&mut self, record: Record) {
        self.peeked = Some(record);
    }

    /// Decodes the next record. `Ok(None)` marks the end of the archive.
    ///
    /// A header that cannot start a stream record is treated as corruption
    /// and the reader resynchronizes on the next file entry marker.
    pub fn next_record(&mut self) -> Result<Option<Record>, ArchiveError> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.skip_payload()?;

        let start = self.position;
        let window = match self.read_window()? {
            Some(window) => window,
            None => return Ok(None),
        };
        let header = StreamHeader::from_bytes(&window);

        if header.is_file_entry_marker() {
            if let Some(entry) = self.read_entry_body(&header)? {
                return Ok(Some(Record::FileEntry(entry)));
            }
            return Ok(self.next_file_entry()?.map(Record::FileEntry));
        }

        if !header.is_plausible_stream() {
            tracing::warn!(
                offset = format_args!("{:#x}", start),
                "Invalid stream header, seeking next file header"
            );
            return Ok(self.scan_file_entry(window)?.map(Record::FileEntry));
        }

        let name_size = header.name_size as usize;
        if name_size > self.buffer_size.saturating_sub(HEADER_SIZE) {
            return Err(ArchiveError::BadBufferSize {
                needed: (HEADER_SIZE + name_size) as u64,
                buffer_size: self.buffer_size,
            });
        }

        let mut raw_name = vec![0u8; name_size];
        let read = self.fill(&mut raw_name)?;
        if read < name_size {
            return Err(ArchiveError::TruncatedArchive {
                missing: (name_size - read) as u64 + header.size,
            });
        }

        let name = if raw_name.is_empty() {
            None
        } else {
            Some(decode_utf16le_lossy(&raw_name))
        };

        self.remaining = header.size;
        tracing::trace!(
            offset = format_args!("{:#x}", start),
            id = ?header.id,
            size = header.size,
            name = ?name,
            "decoded stream record"
        );

        Ok(Some(Record::Stream(StreamRecord {
            id: header.id,
            attributes: header.stream_attributes(),
            name,
            size: header.size,
        })))
    }

    /// Advances to the next file entry marker, skipping any stream records
    /// and garbage in between.
    pub fn next_file_entry(&mut self) -> Result<Option<FileEntry>, ArchiveError> {
        match self.peeked.take() {
            Some(Record::FileEntry(entry)) => return Ok(Some(entry)),
            Some(Record::Stream(_)) | None => {}
        }
        self.skip_payload()?;

        let start = self.position;
        let window = match self.read_trailing_window()? {
            Some(window) => window,
            None => return Ok(None),
        };

        if !StreamHeader::from_bytes(&window).is_file_entry_marker() {
            tracing::warn!(
                offset = format_args!("{:#x}", start),
                "Invalid file header, seeking next file header"
            );
        }
        self.scan_file_entry(window)
    }

    /// Slides `window` one byte at a time until it holds a file entry
    /// marker whose name and metadata can be read.
    fn scan_file_entry(
        &mut self,
        mut window: [u8; HEADER_SIZE],
    ) -> Result<Option<FileEntry>, ArchiveError> {
        let mut skipped = 0u64;

        loop {
            let header = StreamHeader::from_bytes(&window);
            if header.is_file_entry_marker() {
                if let Some(entry) = self.read_entry_body(&header)? {
                    if skipped > 0 {
                        tracing::info!(skipped, path = %entry.path, "Resynchronized on file header");
                    }
                    return Ok(Some(entry));
                }
                window = match self.read_trailing_window()? {
                    Some(next) => next,
                    None => return Ok(None),
                };
                continue;
            }

            self.cancel.check()?;

            let mut byte = [0u8; 1];
            if self.fill(&mut byte)? == 0 {
                tracing::info!(skipped, "End of archive reached while seeking file header");
                return Ok(None);
            }
            window.copy_within(1.., 0);
            window[HEADER_SIZE - 1] = byte[0];
            skipped += 1;
        }
    }

    /// Reads the name and metadata of a file entry marker. `Ok(None)` when
    /// the stored name is not an acceptable path.
    fn read_entry_body(&mut self, header: &StreamHeader) -> Result<Option<FileEntry>, ArchiveError> {
        let name_size = header.name_size as usize;
        let needed = name_size + header.size as usize;
        if needed > self.buffer_size.saturating_sub(HEADER_SIZE) {
            return Err(ArchiveError::BadBufferSize {
                needed: (HEADER_SIZE + needed) as u64,
                buffer_size: self.buffer_size,
            });
        }

        let mut body = vec![0u8; needed];
        let read = self.fill(&mut body)?;
        if read < needed {
            return Err(ArchiveError::TruncatedArchive {
                missing: (needed - read) as u64,
            });
        }

        let (raw_name, meta) = body.split_at(name_size);
        let path = match ArchivePath::from_utf16le(raw_name) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(
                    name = %decode_utf16le_lossy(raw_name),
                    "Rejecting file entry: {}",
                    e
                );
                return Ok(None);
            }
        };

        let info = FileInfo::deserialize_owned(&mut &meta[..FILE_INFO_SIZE])
            .map_err(ArchiveError::ArchiveIo)?;
        let short_name = if header.has_short_name() {
            decode_short_name(&meta[FILE_INFO_SIZE..])
        } else {
            None
        };

        tracing::debug!(%path, ?short_name, "decoded file entry");
        Ok(Some(FileEntry {
            path,
            info,
            short_name,
        }))
    }

    /// Reads up to `buf.len()` bytes of the current payload. Returns 0 once
    /// the payload is exhausted.
    pub fn read_payload(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }

        let want = (buf.len() as u64).min(self.remaining) as usize;
        let read = self.fill(&mut buf[..want])?;
        self.remaining -= read as u64;

        if read < want {
            return Err(ArchiveError::TruncatedArchive {
                missing: self.remaining,
            });
        }
        Ok(read)
    }

    /// Reads the whole current payload, which must fit the buffer.
    pub fn read_payload_to_vec(&mut self) -> Result<Vec<u8>, ArchiveError> {
        if self.remaining > self.buffer_size as u64 {
            return Err(ArchiveError::BadBufferSize {
                needed: self.remaining,
                buffer_size: self.buffer_size,
            });
        }

        let mut out = vec![0u8; self.remaining as usize];
        let mut filled = 0;
        while filled < out.len() {
            filled += self.read_payload(&mut out[filled..])?;
        }
        Ok(out)
    }

    /// Discards the rest of the current payload.
    pub fn skip_payload(&mut self) -> Result<u64, ArchiveError> {
        let total = self.remaining;
        if total == 0 {
            return Ok(0);
        }

        let mut scratch = vec![0u8; (self.buffer_size as u64).min(total) as usize];
        while self.remaining > 0 {
            self.cancel.check()?;
            self.read_payload(&mut scratch)?;
        }
        Ok(total)
    }

    /// Reads a full header window. A partial window at the end of the
    /// input is reported as [`ArchiveError::TruncatedHeader`].
    fn read_window(&mut self) -> Result<Option<[u8; HEADER_SIZE]>, ArchiveError> {
        let mut window = [0u8; HEADER_SIZE];
        match self.fill(&mut window)? {
            0 => Ok(None),
            HEADER_SIZE => Ok(Some(window)),
            read => Err(ArchiveError::TruncatedHeader { read }),
        }
    }

    /// Like [`read_window`](Self::read_window), but a partial window only
    /// means there is nothing left to scan.
    fn read_trailing_window(&mut self) -> Result<Option<[u8; HEADER_SIZE]>, ArchiveError> {
        match self.read_window() {
            Err(ArchiveError::TruncatedHeader { read }) => {
                tracing::info!(bytes = read, "Ignoring trailing bytes at end of archive");
                Ok(None)
            }
            other => other,
        }
    }

    /// Reads until `buf` is full or the input ends. Broken pipes count as
    /// the end of input.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize, ArchiveError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::BrokenPipe
                            | ErrorKind::ConnectionAborted
                            | ErrorKind::ConnectionReset
                            | ErrorKind::UnexpectedEof
                    ) =>
                {
                    tracing::debug!("archive input closed: {}", e);
                    break;
                }
                Err(e) => return Err(ArchiveError::ArchiveIo(e)),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }
}
