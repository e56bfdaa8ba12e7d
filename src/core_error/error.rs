// Error types for the control channel, the data channels and the send queue
use std::collections::TryReserveError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A command did not fit in the remaining capacity of a control buffer.
///
/// The buffer is left exactly as it was before the failed append.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("control buffer overflow: {needed} bytes needed, {available} available")]
pub struct BufferOverflow {
    pub needed: usize,
    pub available: usize,
}

/// Violations of the control protocol. All of them are fatal for the control channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed PASV reply: {0}")]
    InvalidPasvReply(String),

    #[error("reply line exceeds {0} bytes without a line terminator")]
    ReplyTooLong(usize),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid client context: {0}")]
    Context(String),

    #[error("failed to reserve client resources: {0}")]
    Resource(String),

    #[error("failed to create control socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("failed to connect control socket: {0}")]
    Connect(#[source] io::Error),

    #[error("timed out connecting control socket")]
    ConnectTimeout,

    #[error("readiness wait failed: {0}")]
    SelectFailed(#[source] io::Error),

    #[error("failed to read control socket: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write control socket: {0}")]
    Write(#[source] io::Error),

    #[error("control connection closed by the server")]
    RemoteClosed,

    #[error("server requested a password but none is configured")]
    PasswordRejected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to create data socket: {0}")]
    DataSocketCreate(#[source] io::Error),

    #[error("failed to connect data socket: {0}")]
    DataSocketConnect(#[source] io::Error),

    #[error("failed to write data socket: {0}")]
    DataWrite(#[source] io::Error),

    #[error("failed to read upload source: {0}")]
    DataFileRead(#[source] io::Error),

    #[error(transparent)]
    BufferOverflow(#[from] BufferOverflow),
}

impl ClientError {
    /// Stable numeric status for diagnostics output.
    pub fn code(&self) -> u32 {
        match self {
            ClientError::Context(_) => 10,
            ClientError::Resource(_) => 11,
            ClientError::SelectFailed(_) => 1000,
            ClientError::Read(_) => 1001,
            ClientError::Write(_) => 1002,
            ClientError::RemoteClosed => 2000,
            ClientError::Protocol(_) => 2001,
            ClientError::PasswordRejected => 2002,
            ClientError::Connect(_) => 3000,
            ClientError::ConnectTimeout => 3001,
            ClientError::SocketCreate(_) => 3002,
            ClientError::DataSocketCreate(_) => 5000,
            ClientError::DataFileRead(_) => 5002,
            ClientError::DataSocketConnect(_) => 6000,
            ClientError::DataWrite(_) => 6001,
            ClientError::BufferOverflow(_) => 8000,
        }
    }

    /// Platform error code carried by the error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ClientError::SocketCreate(e)
            | ClientError::Connect(e)
            | ClientError::SelectFailed(e)
            | ClientError::Read(e)
            | ClientError::Write(e)
            | ClientError::DataSocketCreate(e)
            | ClientError::DataSocketConnect(e)
            | ClientError::DataWrite(e)
            | ClientError::DataFileRead(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// Reasons an enqueue call is rejected. A rejected enqueue has no side effects.
#[derive(Error, Debug)]
pub enum EnqueueError {
    #[error("client is not fully connected")]
    NotConnected,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("all {0} send slots are in use")]
    NoFreeSlot(usize),

    #[error(transparent)]
    BufferOverflow(#[from] BufferOverflow),

    #[error("failed to allocate upload buffer: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("failed to open {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Successful outcomes of one poll step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// At least one descriptor was serviced.
    Progress,
    /// Nothing became ready before the timeout. Not an error.
    Timeout,
}

/// True for every status except `Progress` and `Timeout`.
pub fn is_error(status: &Result<PollStatus, ClientError>) -> bool {
    status.is_err()
}
