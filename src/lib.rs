// Non-blocking FTP upload client driven by a caller-owned poll loop

pub mod client;
pub mod config;
pub mod constants;
pub mod core_error;
pub mod core_ftpcommand;
pub mod core_log;
pub mod core_network;
pub mod core_transfer;
pub mod session;

pub use client::FtpClient;
pub use config::{ClientConfig, ClientOptions, Config};
pub use core_error::{is_error, BufferOverflow, ClientError, EnqueueError, PollStatus, ProtocolError};
pub use core_transfer::CompletionCallback;
pub use session::ConnectionState;
