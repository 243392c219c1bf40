//! Greybus operation messages.
//!
//! Every operation travels as an 8-byte little-endian header followed by the
//! payload:
//! - `size` (2B): header + payload length
//! - `operation_id` (2B): correlates a response with its request, 0 for one-shot requests
//! - `type` (1B): operation code, bit 0x80 set on responses
//! - `result` (1B): status code, meaningful in responses only
//! - two pad bytes (socket links carry the cport id here)
//!
//! A [`Message`] is a move-only value: whoever holds it owns it, and it is
//! released when the last owner drops it.

pub mod codec;
pub mod error;
pub mod message;
pub mod operation;
pub mod reader;
pub mod result;
pub mod writer;

pub use codec::{
    decode_message, encode_message, CportMessage, MessageHeader, HEADER_SIZE, MAX_MESSAGE_SIZE,
    MAX_PAYLOAD_SIZE, RESPONSE_FLAG,
};
pub use error::{MessageError, Result};
pub use message::{Message, PING_TYPE};
pub use operation::OperationIdAllocator;
pub use reader::MessageReader;
pub use result::OperationResult;
pub use writer::MessageWriter;
