use std::io::{self, Read, Write};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

/// Creates a bounded in-memory byte pipe holding at most `depth` pending
/// writes.
///
/// Dropping the writer ends the reader's input. Dropping the reader makes
/// further writes fail with [`io::ErrorKind::BrokenPipe`].
pub fn pipe(depth: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(depth);
    (
        PipeWriter(tx),
        PipeReader {
            rx,
            pending: vec![],
            offset: 0,
        },
    )
}

#[derive(Debug)]
pub struct PipeWriter(SyncSender<Vec<u8>>);

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))
            .and(Ok(buf.len()))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let len = buf.len().min(self.pending.len() - self.offset);
        buf[..len].copy_from_slice(&self.pending[self.offset..self.offset + len]);
        self.offset += len;
        Ok(len)
    }
}
