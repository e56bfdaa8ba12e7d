pub mod error;

pub use error::{is_error, BufferOverflow, ClientError, EnqueueError, PollStatus, ProtocolError};
