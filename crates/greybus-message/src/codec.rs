use bytes::{Buf, BufMut, BytesMut};

use crate::error::{MessageError, Result};
use crate::message::Message;

/// Operation header: size (2) + id (2) + type (1) + result (1) + pad (2) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Type bit marking a response.
pub const RESPONSE_FLAG: u8 = 0x80;

/// Largest operation the 16-bit size field can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Largest payload a single operation can carry.
pub const MAX_PAYLOAD_SIZE: usize = MAX_MESSAGE_SIZE - HEADER_SIZE;

/// Decoded operation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total size, header included.
    pub size: u16,
    pub operation_id: u16,
    pub op_type: u8,
    pub result: u8,
    /// Pad bytes. Socket links carry the cport id here; zero otherwise.
    pub pad: u16,
}

impl MessageHeader {
    /// Parse a header from the first [`HEADER_SIZE`] bytes of `src`.
    ///
    /// Returns `Ok(None)` when fewer than [`HEADER_SIZE`] bytes are available.
    pub fn parse(src: &[u8]) -> Result<Option<Self>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut buf = &src[..HEADER_SIZE];
        let header = Self {
            size: buf.get_u16_le(),
            operation_id: buf.get_u16_le(),
            op_type: buf.get_u8(),
            result: buf.get_u8(),
            pad: buf.get_u16_le(),
        };

        if (header.size as usize) < HEADER_SIZE {
            return Err(MessageError::InvalidSize {
                declared: header.size as usize,
                min: HEADER_SIZE,
            });
        }

        Ok(Some(header))
    }

    /// Append the wire form of this header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u16_le(self.size);
        dst.put_u16_le(self.operation_id);
        dst.put_u8(self.op_type);
        dst.put_u8(self.result);
        dst.put_u16_le(self.pad);
    }

    pub fn payload_len(&self) -> usize {
        self.size as usize - HEADER_SIZE
    }
}

/// A message tagged with the cport it travels on.
#[derive(Debug, PartialEq, Eq)]
pub struct CportMessage {
    pub cport: u16,
    pub message: Message,
}

impl CportMessage {
    pub fn new(cport: u16, message: Message) -> Self {
        Self { cport, message }
    }
}

/// Encode a message for a byte-stream link.
///
/// Wire format:
/// ```text
/// ┌───────────┬───────────┬──────┬────────┬───────────┬──────────────┐
/// │ Size      │ Op id     │ Type │ Result │ CPort     │ Payload      │
/// │ (2B LE)   │ (2B LE)   │ (1B) │ (1B)   │ (2B LE)   │ (Size - 8 B) │
/// └───────────┴───────────┴──────┴────────┴───────────┴──────────────┘
/// ```
pub fn encode_message(cport: u16, message: &Message, dst: &mut BytesMut) {
    let mut header = message.header();
    header.pad = cport;

    dst.reserve(message.size());
    header.write(dst);
    dst.put_slice(message.payload());
}

/// Decode a message from a byte-stream buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer.
pub fn decode_message(src: &mut BytesMut, max_message_size: usize) -> Result<Option<CportMessage>> {
    let header = match MessageHeader::parse(src)? {
        Some(header) => header,
        None => return Ok(None),
    };

    let size = header.size as usize;
    if size > max_message_size {
        return Err(MessageError::PayloadTooLarge {
            size: header.payload_len(),
            max: max_message_size.saturating_sub(HEADER_SIZE),
        });
    }

    if src.len() < size {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(size - HEADER_SIZE).to_vec();

    Ok(Some(CportMessage {
        cport: header.pad,
        message: Message::from_wire(&header, payload),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::OperationResult;

    fn sample(payload: &[u8]) -> Message {
        Message::with_payload(0x05, 42, OperationResult::Success, payload).unwrap()
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let msg = sample(b"greybus");

        encode_message(3, &msg, &mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 7);

        let decoded = decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().unwrap();
        assert_eq!(decoded.cport, 3);
        assert_eq!(decoded.message, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        let msg = Message::with_payload(0x82, 0x1234, OperationResult::Invalid, &[0xaa]).unwrap();
        encode_message(0x0102, &msg, &mut buf);

        assert_eq!(
            &buf[..],
            &[0x09, 0x00, 0x34, 0x12, 0x82, 0x06, 0x02, 0x01, 0xaa]
        );
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x08, 0x00, 0x01][..]);
        assert!(decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_message(1, &sample(b"hello"), &mut buf);
        buf.truncate(HEADER_SIZE + 2);

        assert!(decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().is_none());
    }

    #[test]
    fn test_decode_size_below_header() {
        let mut buf = BytesMut::from(&[0x04, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00][..]);
        let result = decode_message(&mut buf, MAX_MESSAGE_SIZE);
        assert!(matches!(
            result,
            Err(MessageError::InvalidSize { declared: 4, min: HEADER_SIZE })
        ));
    }

    #[test]
    fn test_decode_message_too_large() {
        let mut buf = BytesMut::new();
        encode_message(1, &sample(&[0u8; 64]), &mut buf);

        let result = decode_message(&mut buf, 32);
        assert!(matches!(result, Err(MessageError::PayloadTooLarge { size: 64, max: 24 })));
    }

    #[test]
    fn test_multiple_messages() {
        let mut buf = BytesMut::new();
        encode_message(1, &sample(b"first"), &mut buf);
        encode_message(2, &sample(b"second"), &mut buf);

        let m1 = decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().unwrap();
        let m2 = decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().unwrap();

        assert_eq!(m1.cport, 1);
        assert_eq!(m1.message.payload(), b"first");
        assert_eq!(m2.cport, 2);
        assert_eq!(m2.message.payload(), b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        let msg = Message::allocate(0, 0x00, 7, OperationResult::Success).unwrap();
        encode_message(0, &msg, &mut buf);

        let decoded = decode_message(&mut buf, MAX_MESSAGE_SIZE).unwrap().unwrap();
        assert_eq!(decoded.message.payload_len(), 0);
        assert_eq!(decoded.message.size(), HEADER_SIZE);
    }
}
