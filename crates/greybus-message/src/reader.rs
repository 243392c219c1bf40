use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_message, CportMessage, MAX_MESSAGE_SIZE};
use crate::error::{MessageError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Handles partial reads internally; callers always get whole messages.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    max_message_size: usize,
}

impl<T: Read> MessageReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_max_message_size(inner, MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(inner: T, max_message_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_message_size,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(MessageError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<CportMessage> {
        loop {
            if let Some(msg) = decode_message(&mut self.buf, self.max_message_size)? {
                return Ok(msg);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(MessageError::Io(err)),
            };

            if read == 0 {
                return Err(MessageError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::encode_message;
    use crate::message::Message;
    use crate::result::OperationResult;

    fn wire(messages: &[(u16, &str)]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (i, (cport, payload)) in messages.iter().enumerate() {
            let msg = Message::with_payload(
                0x02,
                i as u16 + 1,
                OperationResult::Success,
                payload.as_bytes(),
            )
            .unwrap();
            encode_message(*cport, &msg, &mut buf);
        }
        buf.to_vec()
    }

    #[test]
    fn read_single_message() {
        let mut reader = MessageReader::new(Cursor::new(wire(&[(1, "hello")])));
        let msg = reader.read_message().unwrap();

        assert_eq!(msg.cport, 1);
        assert_eq!(msg.message.payload(), b"hello");
        assert_eq!(msg.message.operation_id(), 1);
    }

    #[test]
    fn read_multiple_messages() {
        let bytes = wire(&[(1, "one"), (2, "two"), (3, "three")]);
        let mut reader = MessageReader::new(Cursor::new(bytes));

        for (cport, expected) in [(1u16, &b"one"[..]), (2, &b"two"[..]), (3, &b"three"[..])] {
            let msg = reader.read_message().unwrap();
            assert_eq!(msg.cport, cport);
            assert_eq!(msg.message.payload(), expected);
        }
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&[(4, "slow")]),
            pos: 0,
        };
        let mut reader = MessageReader::new(byte_reader);

        let msg = reader.read_message().unwrap();
        assert_eq!(msg.cport, 4);
        assert_eq!(msg.message.payload(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = MessageReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, MessageError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_message() {
        let mut bytes = wire(&[(2, "only-part")]);
        bytes.truncate(10);

        let mut reader = MessageReader::new(Cursor::new(bytes));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, MessageError::ConnectionClosed));
    }

    #[test]
    fn oversized_message_in_stream() {
        let big = "x".repeat(128);
        let bytes = wire(&[(1, big.as_str())]);
        let mut reader = MessageReader::with_max_message_size(Cursor::new(bytes), 64);
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, MessageError::PayloadTooLarge { .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[(8, "ok")])),
        };
        let mut framed = MessageReader::new(reader);
        let msg = framed.read_message().unwrap();

        assert_eq!(msg.cport, 8);
        assert_eq!(msg.message.payload(), b"ok");
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::MessageWriter::new(left);
        let mut reader = MessageReader::new(right);

        let msg = Message::with_payload(0x00, 1, OperationResult::Success, b"ping").unwrap();
        writer.write_message(6, &msg).unwrap();
        let got = reader.read_message().unwrap();

        assert_eq!(got.cport, 6);
        assert_eq!(got.message, msg);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
