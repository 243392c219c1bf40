#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use greybus_core::{Greybus, GreybusConfig, Protocol};
use greybus_message::{CportMessage, Message, OperationIdAllocator, OperationResult};
use greybus_protocols::sim::SimBoard;
use greybus_transport::MemoryTransport;

pub const WAIT: Duration = Duration::from_secs(5);

pub const CONTROL: u16 = 0;
pub const GPIO: u16 = 1;
pub const I2C: u16 = 2;
pub const SPI: u16 = 3;
pub const UART: u16 = 4;
pub const LOOPBACK: u16 = 5;
pub const LOG: u16 = 6;
pub const FW_MANAGEMENT: u16 = 7;
pub const FW_DOWNLOAD: u16 = 8;

pub const MANIFEST: &[u8] = b"\x10\x00\x00\x01manifest-blob";

/// An engine with one cport per protocol, backed by simulated peripherals.
pub struct Node {
    pub engine: Greybus,
    pub transport: Arc<MemoryTransport>,
    pub board: SimBoard,
    ids: OperationIdAllocator,
}

impl Node {
    pub fn new() -> Self {
        let config = GreybusConfig::new()
            .with_cport(0, Protocol::Control)
            .with_cport(1, Protocol::Gpio)
            .with_cport(1, Protocol::I2c)
            .with_cport(1, Protocol::Spi)
            .with_cport(1, Protocol::Uart)
            .with_cport(1, Protocol::Loopback)
            .with_cport(1, Protocol::Log)
            .with_cport(2, Protocol::FwManagement)
            .with_cport(2, Protocol::FwDownload);
        let transport = Arc::new(MemoryTransport::new());
        let engine = Greybus::init(config, transport.clone()).expect("engine init");

        let board = SimBoard::new();
        let peripherals = board.peripherals(MANIFEST);
        let bound = engine.register_from_config(|_, entry| peripherals.driver_for(entry.protocol));
        assert_eq!(bound, 9, "every cport should get a driver");

        Self {
            engine,
            transport,
            board,
            ids: OperationIdAllocator::new(),
        }
    }

    /// Deliver a request on `cport` without waiting for an answer.
    pub fn submit(&self, cport: u16, op_type: u8, payload: &[u8]) -> u16 {
        let id = self.ids.next_id();
        let request = Message::with_payload(op_type, id, OperationResult::Success, payload)
            .expect("build request");
        self.transport.inject(cport, request).expect("inject");
        id
    }

    /// Send a request and wait for the response.
    pub fn call(&self, cport: u16, op_type: u8, payload: &[u8]) -> Message {
        let id = self.submit(cport, op_type, payload);
        let response = self.next_sent();
        assert_eq!(response.cport, cport, "response on wrong cport");
        assert!(response.message.is_response(), "expected a response");
        assert_eq!(response.message.operation_id(), id);
        assert_eq!(response.message.op_type(), op_type | 0x80);
        response.message
    }

    /// Next message the node transmitted.
    pub fn next_sent(&self) -> CportMessage {
        self.transport.recv_timeout(WAIT).expect("node sent nothing")
    }

    /// Assert the node transmits nothing for a short while.
    pub fn expect_silence(&self) {
        assert!(
            self.transport
                .recv_timeout(Duration::from_millis(100))
                .is_none(),
            "unexpected message from node"
        );
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

pub fn assert_status(response: &Message, expected: OperationResult) {
    assert_eq!(response.result(), expected, "payload: {:?}", response.payload());
}
