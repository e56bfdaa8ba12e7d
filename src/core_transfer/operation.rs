use crate::constants::FILE_CHUNK_SIZE;
use crate::core_error::ClientError;
use crate::core_network::socket::{check_connected, is_transient};
use log::{trace, warn};
use mio::net::TcpStream;
use mio::Registry;
use std::io::{self, Read, Write};
use std::net::Shutdown;

/// Invoked at most once with the outcome of an upload.
///
/// Never invoked for uploads still pending when the client is dropped.
pub type CompletionCallback<'a> = Box<dyn FnOnce(bool) + 'a>;

/// Where the bytes of an upload come from.
pub enum Source<'a> {
    /// The caller's buffer; the borrow keeps it alive until the client is gone.
    Borrowed(&'a [u8]),
    /// A private copy owned by the slot.
    Owned(Vec<u8>),
    /// Streamed in `FILE_CHUNK_SIZE` chunks.
    Reader(Box<dyn Read + 'a>),
}

/// Upload bytes plus the write cursor into them.
pub struct Payload<'a> {
    source: Source<'a>,
    chunk: Vec<u8>,
    chunk_len: usize,
    offset: usize,
    eof: bool,
}

impl<'a> Payload<'a> {
    pub fn new(source: Source<'a>) -> Self {
        Self {
            source,
            chunk: Vec::new(),
            chunk_len: 0,
            offset: 0,
            eof: false,
        }
    }

    fn pending(&self) -> &[u8] {
        match &self.source {
            Source::Borrowed(bytes) => &bytes[self.offset..],
            Source::Owned(bytes) => &bytes[self.offset..],
            Source::Reader(_) => &self.chunk[self.offset..self.chunk_len],
        }
    }

    /// All bytes written, and for readers the end of input has been seen.
    pub fn is_complete(&self) -> bool {
        self.pending().is_empty()
            && match self.source {
                Source::Reader(_) => self.eof,
                _ => true,
            }
    }

    fn refill(&mut self) -> io::Result<()> {
        let Source::Reader(reader) = &mut self.source else {
            return Ok(());
        };
        if self.chunk.is_empty() {
            self.chunk = vec![0; FILE_CHUNK_SIZE];
        }
        loop {
            match reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    self.chunk_len = 0;
                }
                Ok(read) => self.chunk_len = read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            self.offset = 0;
            trace!("Refilled upload chunk with {} bytes", self.chunk_len);
            return Ok(());
        }
    }

    /// Performs at most one write of pending bytes, refilling from the reader first if the
    /// current chunk is exhausted. Returns the number of bytes written.
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> Result<usize, ClientError> {
        if self.pending().is_empty() && !self.is_complete() {
            self.refill().map_err(ClientError::DataFileRead)?;
        }
        if self.pending().is_empty() {
            return Ok(0);
        }

        match out.write(self.pending()) {
            Ok(0) => Err(ClientError::DataWrite(io::Error::from(
                io::ErrorKind::WriteZero,
            ))),
            Ok(written) => {
                self.offset += written;
                Ok(written)
            }
            Err(e) if is_transient(&e) => Ok(0),
            Err(e) => Err(ClientError::DataWrite(e)),
        }
    }
}

/// Result of servicing one writable data socket.
#[derive(Debug)]
pub enum SlotProgress {
    Pending,
    Completed,
    Failed(ClientError),
}

/// One queued upload, owned by its slot in the send queue.
pub struct SendOperation<'a> {
    remote_name: String,
    sequence: u64,
    stream: Option<TcpStream>,
    connected: bool,
    payload: Payload<'a>,
    sent: u64,
    on_complete: Option<CompletionCallback<'a>>,
}

impl<'a> SendOperation<'a> {
    pub fn new(
        remote_name: &str,
        source: Source<'a>,
        on_complete: Option<CompletionCallback<'a>>,
    ) -> Self {
        Self {
            remote_name: remote_name.to_string(),
            sequence: 0,
            stream: None,
            connected: false,
            payload: Payload::new(source),
            sent: 0,
            on_complete,
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    /// Still waiting for the server's `150` to open a data channel.
    pub fn awaits_channel(&self) -> bool {
        self.stream.is_none()
    }

    pub fn attach_stream(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
        self.connected = false;
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Handles one writability event of the data socket.
    pub fn service(&mut self) -> SlotProgress {
        let Some(stream) = self.stream.as_mut() else {
            return SlotProgress::Pending;
        };

        if !self.connected {
            match check_connected(stream) {
                Ok(true) => self.connected = true,
                Ok(false) => return SlotProgress::Pending,
                Err(e) => return SlotProgress::Failed(ClientError::DataSocketConnect(e)),
            }
        }

        match self.payload.write_to(stream) {
            Ok(written) => self.sent += written as u64,
            Err(e) => return SlotProgress::Failed(e),
        }

        if self.payload.is_complete() {
            SlotProgress::Completed
        } else {
            SlotProgress::Pending
        }
    }

    /// Closes the data channel and reports the outcome to the callback.
    ///
    /// A successful upload half-closes the socket first so the server sees end of data.
    pub fn finish(mut self, registry: &Registry, success: bool) {
        if let Some(mut stream) = self.stream.take() {
            if success {
                if let Err(e) = stream.shutdown(Shutdown::Write) {
                    warn!("Failed to shut down data channel for {}: {}", self.remote_name, e);
                }
            }
            let _ = registry.deregister(&mut stream);
        }
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(success);
        }
    }
}
