//! Realtime event protocol.
//!
//! Typed JSON events exchanged over the data channel, the channel state gate that
//! outbound events pass through, and the sequential engine that interprets inbound
//! events for one session.
//!
//! # Flow
//!
//! - `session.created` → `session.update` (once), then an optional greeting
//! - transcription completed → user transcript entry
//! - `response.done` → assistant transcript entry and/or tool call
//! - tool result → `conversation.item.create` then `response.create`

mod channel;
mod engine;
pub mod messages;

pub use channel::{ChannelState, EventSender};
pub use engine::{EngineCommand, EngineHandle, EventEngine, NoticeCallback};
pub use messages::{ClientEvent, InboundEvent, ServerEvent, decode_server_event};
