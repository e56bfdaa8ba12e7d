use crate::constants::{CONTROL_BUFFER_SIZE, LINE_TERMINATOR};
use crate::core_error::BufferOverflow;
use log::trace;
use std::io::{self, Read, Write};

/// Fixed-capacity byte buffer used for both directions of the control channel.
///
/// Reads append at the tail, writes and line consumption shift bytes out of the head.
/// Appends are all-or-nothing: a failed append leaves the contents untouched.
pub struct ControlBuffer {
    data: [u8; CONTROL_BUFFER_SIZE],
    len: usize,
}

impl ControlBuffer {
    pub fn new() -> Self {
        Self {
            data: [0; CONTROL_BUFFER_SIZE],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == CONTROL_BUFFER_SIZE
    }

    pub fn available(&self) -> usize {
        CONTROL_BUFFER_SIZE - self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Appends every part, or nothing if their total length does not fit.
    pub fn append(&mut self, parts: &[&[u8]]) -> Result<(), BufferOverflow> {
        let needed: usize = parts.iter().map(|p| p.len()).sum();
        if needed > self.available() {
            return Err(BufferOverflow {
                needed,
                available: self.available(),
            });
        }
        for part in parts {
            self.data[self.len..self.len + part.len()].copy_from_slice(part);
            self.len += part.len();
        }
        Ok(())
    }

    /// Drops `count` bytes from the head, keeping the remainder in order.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.data.copy_within(count..self.len, 0);
        self.len -= count;
    }

    /// Length of the first CRLF-terminated line, terminator excluded.
    pub fn line_len(&self) -> Option<usize> {
        self.as_slice()
            .windows(LINE_TERMINATOR.len())
            .position(|w| w == LINE_TERMINATOR)
    }

    pub fn has_line(&self) -> bool {
        self.line_len().is_some()
    }

    /// Drops the first line and its terminator.
    pub fn consume_line(&mut self) {
        if let Some(line_len) = self.line_len() {
            self.consume(line_len + LINE_TERMINATOR.len());
        }
    }

    /// One read into the spare capacity. Returns the number of bytes appended.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let read = reader.read(&mut self.data[self.len..])?;
        self.len += read;
        trace!("Buffered {} bytes ({} total)", read, self.len);
        Ok(read)
    }

    /// One write of the buffered bytes. Written bytes are shifted out.
    pub fn drain_to<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        let written = writer.write(self.as_slice())?;
        self.consume(written);
        trace!("Flushed {} bytes ({} left)", written, self.len);
        Ok(written)
    }
}

impl Default for ControlBuffer {
    fn default() -> Self {
        Self::new()
    }
}
