pub mod operation;
pub mod send_queue;

pub use operation::{CompletionCallback, SendOperation, SlotProgress, Source};
pub use send_queue::SendQueue;
