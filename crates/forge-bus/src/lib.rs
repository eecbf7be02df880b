//! Inter-agent message bus: a durable per-recipient queue with broadcast
//! fan-out, wrapped in envelope validation and chat-log capture. File-backed
//! rather than in-process, since agents here are separate worker processes,
//! not in-process listeners.

mod bus;
mod chatlog;
mod queue;

pub use bus::AgentBus;
pub use chatlog::{ActivityStreamEntry, ChatLogCapture, ChatLogCategory, ChatLogEntry, ChatLogFilter};
pub use queue::{FileQueueBackend, MessageQueue, QueueBackend};
