use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_message, HEADER_SIZE};
use crate::error::{MessageError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = HEADER_SIZE + 1024;

/// Writes complete messages to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> MessageWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Encode `message` for `cport` and write it out (blocking).
    pub fn write_message(&mut self, cport: u16, message: &Message) -> Result<()> {
        self.buf.clear();
        encode_message(cport, message, &mut self.buf);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(MessageError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MessageError::Io(err)),
            }
        }

        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(MessageError::Io(err)),
            }
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
    use crate::codec::{decode_message, MAX_MESSAGE_SIZE};
    use crate::result::OperationResult;

    fn msg(payload: &[u8]) -> Message {
        Message::with_payload(0x03, 11, OperationResult::Success, payload).unwrap()
    }

    #[test]
    fn write_single_message() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_message(1, &msg(b"hello")).unwrap();

        let inner = writer.into_inner().into_inner();
        let mut wire = BytesMut::from(inner.as_slice());
        let got = decode_message(&mut wire, MAX_MESSAGE_SIZE).unwrap().unwrap();
        assert_eq!(got.cport, 1);
        assert_eq!(got.message.payload(), b"hello");
    }

    #[test]
    fn write_multiple_messages() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.write_message(1, &msg(b"one")).unwrap();
        writer.write_message(2, &msg(b"two")).unwrap();

        let inner = writer.into_inner().into_inner();
        let mut wire = BytesMut::from(inner.as_slice());
        let m1 = decode_message(&mut wire, MAX_MESSAGE_SIZE).unwrap().unwrap();
        let m2 = decode_message(&mut wire, MAX_MESSAGE_SIZE).unwrap().unwrap();

        assert_eq!((m1.cport, m1.message.payload()), (1, &b"one"[..]));
        assert_eq!((m2.cport, m2.message.payload()), (2, &b"two"[..]));
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let sink = FlakyWriter {
            write_error: Some(ErrorKind::Interrupted),
            flush_error: Some(ErrorKind::Interrupted),
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        writer.write_message(5, &msg(b"retry")).unwrap();
        assert_eq!(writer.get_ref().data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn handles_would_block_write_and_flush() {
        let sink = FlakyWriter {
            write_error: Some(ErrorKind::WouldBlock),
            flush_error: Some(ErrorKind::WouldBlock),
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        writer.write_message(6, &msg(b"retry")).unwrap();
        assert_eq!(writer.get_ref().data.len(), HEADER_SIZE + 5);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.write_message(1, &msg(b"x")).unwrap_err();
        assert!(matches!(err, MessageError::ConnectionClosed));
    }

    #[test]
    fn broken_pipe_propagates() {
        let sink = FlakyWriter {
            write_error: Some(ErrorKind::BrokenPipe),
            flush_error: None,
            data: Vec::new(),
        };
        let mut writer = MessageWriter::new(sink);
        let err = writer.write_message(1, &msg(b"x")).unwrap_err();
        assert!(matches!(err, MessageError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    struct FlakyWriter {
        write_error: Option<ErrorKind>,
        flush_error: Option<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.write_error.take() {
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if let Some(kind) = self.flush_error.take() {
                return Err(std::io::Error::from(kind));
            }
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
