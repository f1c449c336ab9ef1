//! PostgreSQL wire protocol (v3.0) implementation.
//!
//! This module provides the low-level protocol layers:
//! - Framing the inbound byte stream into discrete messages ([`framing`])
//! - Encoding frontend messages into outbound buffers ([`frontend`])
//! - Decoding backend message payloads ([`backend`])
//! - Reply parsers consuming message streams ([`reply`])
//!
//! # Wire Protocol Overview
//!
//! PostgreSQL uses a message-based protocol where each message consists of:
//! - 1 byte: message type tag
//! - 4 bytes: message length, big-endian, including these 4 bytes
//! - N bytes: message payload
//!
//! Exception: the startup message omits the type tag.
//!
//! Responses to a request form an ordered message sequence ending (for
//! Sync-terminated batches and simple queries) in `ReadyForQuery`. The
//! reply parsers in [`reply`] encode those sequences as feedable state
//! machines so the interpreter loop can drive them one message at a time.

pub mod backend;
pub mod framing;
pub mod frontend;
pub mod reply;

pub use backend::{
    AuthRequest, BackendKeyData, ColumnDescription, CommandTag, Notification, ParameterStatus,
    TransactionStatus,
};
pub use framing::{BackendMessage, MAX_MESSAGE_SIZE, MessageSlicer};
pub use reply::{BoxReply, ReplyParser, ReplyParserExt, Step};
