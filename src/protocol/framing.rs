use bytes::{Buf, Bytes, BytesMut};

use crate::error::{PgPipeError, Result};

/// Maximum backend message size (1GB) - prevents memory exhaustion from malformed length fields.
/// This is more than enough.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024 * 1024;

/// Backend message tags (protocol v3).
pub mod tag {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const DATA_ROW: u8 = b'D';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NO_DATA: u8 = b'n';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
}

/// One framed backend message: type tag plus payload.
///
/// The payload excludes the 4-byte length field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMessage {
    pub tag: u8,
    pub payload: Bytes,
}

impl BackendMessage {
    /// Returns true if this is an ErrorResponse ('E')
    #[inline]
    pub fn is_error(&self) -> bool {
        self.tag == tag::ERROR_RESPONSE
    }

    /// Returns true if this is a ReadyForQuery ('Z')
    #[inline]
    pub fn is_ready_for_query(&self) -> bool {
        self.tag == tag::READY_FOR_QUERY
    }

    /// Returns true if this is a NotificationResponse ('A')
    #[inline]
    pub fn is_notification(&self) -> bool {
        self.tag == tag::NOTIFICATION_RESPONSE
    }

    /// Returns true if this is an AuthenticationRequest ('R')
    #[inline]
    pub fn is_auth_request(&self) -> bool {
        self.tag == tag::AUTHENTICATION
    }
}

/// Framing state machine: peels discrete protocol messages off a rolling
/// byte buffer.
///
/// The v3 format is a 1-byte type tag, a 4-byte big-endian length that
/// includes itself, then `length - 4` payload bytes. Chunk boundaries carry
/// no meaning: a message may span many chunks, and one chunk may carry many
/// messages. Payloads are split out of the rolling buffer without copying.
#[derive(Debug, Default)]
pub struct MessageSlicer {
    buf: BytesMut,
}

impl MessageSlicer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk read from the wire.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Bytes currently buffered but not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to peel one complete message off the front of the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds less than one message; call
    /// again after the next [`push_chunk`](Self::push_chunk).
    pub fn next_message(&mut self) -> Result<Option<BackendMessage>> {
        const HEADER: usize = 5;

        if self.buf.len() < HEADER {
            return Ok(None);
        }

        let tag = self.buf[0];
        let len = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);

        if len < 4 {
            return Err(PgPipeError::Protocol(format!(
                "invalid backend message length: {len}"
            )));
        }

        let payload_len = (len - 4) as usize;

        if payload_len > MAX_MESSAGE_SIZE {
            return Err(PgPipeError::Protocol(format!(
                "backend message too large: {payload_len} bytes (max {MAX_MESSAGE_SIZE})"
            )));
        }

        if self.buf.len() < HEADER + payload_len {
            return Ok(None);
        }

        self.buf.advance(HEADER);
        let payload = self.buf.split_to(payload_len).freeze();

        Ok(Some(BackendMessage { tag, payload }))
    }
}
