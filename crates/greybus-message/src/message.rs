use std::fmt;

use crate::codec::{MessageHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE, RESPONSE_FLAG};
use crate::error::{MessageError, Result};
use crate::operation::OperationIdAllocator;
use crate::result::OperationResult;

/// Operation type every cport answers without involving its driver.
pub const PING_TYPE: u8 = 0x00;

/// One Greybus operation, request or response.
///
/// Messages are move-only: the value travels from the allocator through the
/// dispatch queue to a driver and on to the transport, and is released when
/// its last owner drops it. Use [`Message::copy`] when an independent
/// duplicate is genuinely needed.
#[derive(PartialEq, Eq)]
pub struct Message {
    operation_id: u16,
    op_type: u8,
    result: u8,
    payload: Vec<u8>,
}

impl Message {
    /// Allocate a message with a zero-filled payload of `payload_len` bytes.
    pub fn allocate(
        payload_len: usize,
        op_type: u8,
        operation_id: u16,
        result: OperationResult,
    ) -> Result<Self> {
        let mut payload = alloc_payload(payload_len)?;
        payload.resize(payload_len, 0);
        Ok(Self {
            operation_id,
            op_type,
            result: result.code(),
            payload,
        })
    }

    /// Allocate an outbound request.
    ///
    /// One-shot requests carry operation id 0 and expect no response; all
    /// others take the next id from `ids`.
    pub fn request(
        payload_len: usize,
        op_type: u8,
        oneshot: bool,
        ids: &OperationIdAllocator,
    ) -> Result<Self> {
        let operation_id = if oneshot { 0 } else { ids.next_id() };
        Self::allocate(payload_len, op_type, operation_id, OperationResult::Success)
    }

    /// Build a message carrying a copy of `payload`.
    pub fn with_payload(
        op_type: u8,
        operation_id: u16,
        result: OperationResult,
        payload: &[u8],
    ) -> Result<Self> {
        let mut buf = alloc_payload(payload.len())?;
        buf.extend_from_slice(payload);
        Ok(Self {
            operation_id,
            op_type,
            result: result.code(),
            payload: buf,
        })
    }

    /// Build the response to `request`: same operation id, type with
    /// [`RESPONSE_FLAG`] set.
    pub fn response(request: &Message, result: OperationResult, payload: &[u8]) -> Result<Self> {
        Self::with_payload(
            request.op_type | RESPONSE_FLAG,
            request.operation_id,
            result,
            payload,
        )
    }

    /// Build a response with no payload.
    pub fn empty_response(request: &Message, result: OperationResult) -> Result<Self> {
        Self::response(request, result, &[])
    }

    /// Deep copy into an independently owned message.
    pub fn copy(&self) -> Result<Self> {
        Self::with_payload(
            self.op_type,
            self.operation_id,
            OperationResult::from(self.result),
            &self.payload,
        )
        .map(|mut msg| {
            msg.result = self.result;
            msg
        })
    }

    pub(crate) fn from_wire(header: &MessageHeader, payload: Vec<u8>) -> Self {
        Self {
            operation_id: header.operation_id,
            op_type: header.op_type,
            result: header.result,
            payload,
        }
    }

    /// Header for this message, pad bytes zeroed.
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            size: self.size() as u16,
            operation_id: self.operation_id,
            op_type: self.op_type,
            result: self.result,
            pad: 0,
        }
    }

    /// Operation type as carried on the wire, response flag included.
    pub fn op_type(&self) -> u8 {
        self.op_type
    }

    /// Operation type with the response flag cleared.
    pub fn request_type(&self) -> u8 {
        self.op_type & !RESPONSE_FLAG
    }

    pub fn is_response(&self) -> bool {
        self.op_type & RESPONSE_FLAG != 0
    }

    pub fn operation_id(&self) -> u16 {
        self.operation_id
    }

    /// A request with operation id 0 expects no response.
    pub fn is_oneshot(&self) -> bool {
        self.operation_id == 0
    }

    pub fn result(&self) -> OperationResult {
        OperationResult::from(self.result)
    }

    /// Raw result byte, preserved even when it is not an assigned code.
    pub fn result_code(&self) -> u8 {
        self.result
    }

    pub fn is_success(&self) -> bool {
        self.result == OperationResult::Success.code()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Total framed length, header included.
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Shorten the payload to `len` bytes. Longer lengths are ignored.
    pub fn truncate_payload(&mut self, len: usize) {
        self.payload.truncate(len);
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("operation_id", &self.operation_id)
            .field("op_type", &format_args!("0x{:02x}", self.op_type))
            .field("result", &format_args!("0x{:02x}", self.result))
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

fn alloc_payload(len: usize) -> Result<Vec<u8>> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(MessageError::PayloadTooLarge {
            size: len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| MessageError::OutOfMemory { size: len })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_zero_fills_payload() {
        let msg = Message::allocate(16, 0x02, 9, OperationResult::Success).unwrap();
        assert_eq!(msg.payload_len(), 16);
        assert!(msg.payload().iter().all(|b| *b == 0));
        assert_eq!(msg.size(), HEADER_SIZE + 16);
        assert_eq!(msg.operation_id(), 9);
    }

    #[test]
    fn payload_roundtrips_exactly() {
        for len in [0usize, 1, 7, 255, 4096, MAX_PAYLOAD_SIZE] {
            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let msg = Message::with_payload(0x03, 1, OperationResult::Success, &data).unwrap();
            assert_eq!(msg.payload_len(), len);
            assert_eq!(msg.payload(), data.as_slice());
            assert_eq!(msg.header().size as usize, HEADER_SIZE + len);
        }
    }

    #[test]
    fn oversize_payload_rejected() {
        let err = Message::allocate(MAX_PAYLOAD_SIZE + 1, 0x01, 1, OperationResult::Success)
            .unwrap_err();
        assert!(matches!(err, MessageError::PayloadTooLarge { .. }));
    }

    #[test]
    fn request_takes_ids_unless_oneshot() {
        let ids = OperationIdAllocator::new();
        let first = Message::request(0, 0x05, false, &ids).unwrap();
        let oneshot = Message::request(0, 0x05, true, &ids).unwrap();
        let second = Message::request(0, 0x05, false, &ids).unwrap();

        assert_eq!(first.operation_id(), 1);
        assert!(oneshot.is_oneshot());
        assert_eq!(second.operation_id(), 2);
    }

    #[test]
    fn response_mirrors_request() {
        let req = Message::with_payload(0x06, 77, OperationResult::Success, b"in").unwrap();
        let resp = Message::response(&req, OperationResult::Invalid, b"out").unwrap();

        assert_eq!(resp.op_type(), 0x86);
        assert!(resp.is_response());
        assert_eq!(resp.request_type(), 0x06);
        assert_eq!(resp.operation_id(), 77);
        assert_eq!(resp.result(), OperationResult::Invalid);
        assert!(!resp.is_success());
        assert_eq!(resp.payload(), b"out");
    }

    #[test]
    fn empty_response_has_no_payload() {
        let req = Message::with_payload(0x00, 3, OperationResult::Success, b"xyz").unwrap();
        let resp = Message::empty_response(&req, OperationResult::Success).unwrap();
        assert_eq!(resp.payload_len(), 0);
        assert!(resp.is_success());
        assert_eq!(resp.op_type(), RESPONSE_FLAG);
    }

    #[test]
    fn copy_is_independent() {
        let original = Message::with_payload(0x03, 5, OperationResult::Success, b"abc").unwrap();
        let mut dup = original.copy().unwrap();
        dup.payload_mut()[0] = b'z';

        assert_eq!(original.payload(), b"abc");
        assert_eq!(dup.payload(), b"zbc");
        assert_eq!(dup.operation_id(), 5);
    }

    #[test]
    fn copy_preserves_unassigned_result_byte() {
        let header = MessageHeader {
            size: HEADER_SIZE as u16,
            operation_id: 1,
            op_type: 0x81,
            result: 0x42,
            pad: 0,
        };
        let msg = Message::from_wire(&header, Vec::new());
        let dup = msg.copy().unwrap();
        assert_eq!(dup.result_code(), 0x42);
        assert_eq!(dup.result(), OperationResult::UnknownError);
    }

    #[test]
    fn truncate_shrinks_payload() {
        let mut msg = Message::allocate(10, 0x01, 1, OperationResult::Success).unwrap();
        msg.truncate_payload(4);
        assert_eq!(msg.payload_len(), 4);
        msg.truncate_payload(100);
        assert_eq!(msg.payload_len(), 4);
    }

    #[test]
    fn debug_shows_hex_type() {
        let msg = Message::allocate(2, 0x85, 1, OperationResult::Success).unwrap();
        let dbg = format!("{msg:?}");
        assert!(dbg.contains("0x85"));
        assert!(dbg.contains("payload_len: 2"));
    }
}
