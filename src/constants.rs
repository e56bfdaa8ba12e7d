// src/constants.rs

use std::time::Duration;

/// Capacity of the control-channel receive and send buffers.
pub const CONTROL_BUFFER_SIZE: usize = 1023;

/// Number of uploads that can be in flight at the same time.
pub const MAX_SEND_OPERATIONS: usize = 4;

/// Size of the chunk read from a file (or any reader) per refill.
pub const FILE_CHUNK_SIZE: usize = 4096;

/// Used by `connect` when the caller passes a zero timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);

pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_CONTROL_PORT: u16 = 21;

pub const LINE_TERMINATOR: &[u8] = b"\r\n";
