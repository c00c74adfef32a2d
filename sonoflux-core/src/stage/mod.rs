//! Actor runtime: named actors, bounded mailboxes, message pooling.
//!
//! ```text
//! hot path ──try_send──► processor ──send──► router ──send──► endpoints
//!     │                      │                                    │
//!     └── raw pool ◄─────────┘          processed pool ◄──────────┘
//! ```
//!
//! Dispatch on the hot path never blocks: a full mailbox means the frame
//! is dropped and its record returned to the pool.

pub mod actor;
pub mod message;
pub mod pool;
pub mod scheduler;

pub use actor::{Actor, ActorState, Handler, MailboxError, DEFAULT_MAILBOX_CAPACITY};
pub use message::{FrameMessage, ProcessedFrame, RawFrame, Reusable, DEFAULT_MAG_BINS};
pub use pool::{FramePool, SharedFrame};
pub use scheduler::Scheduler;
