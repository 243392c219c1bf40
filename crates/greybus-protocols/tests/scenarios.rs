mod common;

use common::*;
use greybus_message::OperationResult;
use greybus_protocols::hal::Direction;
use greybus_protocols::{gpio, i2c, loopback, spi};

#[test]
fn i2c_write_then_read_on_two_addresses() {
    let node = Node::new();
    node.board.i2c.load(0x02, &pattern(128));

    let mut request = Vec::new();
    request.extend_from_slice(&2u16.to_le_bytes());
    // write 128 bytes to 0x01
    request.extend_from_slice(&0x01u16.to_le_bytes());
    request.extend_from_slice(&0u16.to_le_bytes());
    request.extend_from_slice(&128u16.to_le_bytes());
    // read 128 bytes from 0x02
    request.extend_from_slice(&0x02u16.to_le_bytes());
    request.extend_from_slice(&i2c::FLAG_READ.to_le_bytes());
    request.extend_from_slice(&128u16.to_le_bytes());
    request.extend_from_slice(&pattern(128));

    let response = node.call(I2C, i2c::TYPE_TRANSFER, &request);
    assert_status(&response, OperationResult::Success);
    assert_eq!(response.payload(), pattern(128).as_slice());
    assert_eq!(node.board.i2c.contents(0x01), pattern(128));
    assert_eq!(node.board.i2c.transactions(), vec![0x01, 0x02]);
}

fn spi_descriptor(len: u32, rdwr: u8) -> Vec<u8> {
    let mut desc = Vec::new();
    desc.extend_from_slice(&1_000_000u32.to_le_bytes());
    desc.extend_from_slice(&len.to_le_bytes());
    desc.extend_from_slice(&0u16.to_le_bytes());
    desc.extend_from_slice(&[0, 8, rdwr]);
    desc
}

#[test]
fn spi_write_read_and_duplex_descriptors() {
    let node = Node::new();

    let mut request = vec![0, 0];
    request.extend_from_slice(&3u16.to_le_bytes());
    request.extend(spi_descriptor(128, spi::XFER_WRITE));
    request.extend(spi_descriptor(128, spi::XFER_READ));
    request.extend(spi_descriptor(128, spi::XFER_READ | spi::XFER_WRITE));
    request.extend_from_slice(&pattern(128));
    request.extend_from_slice(&pattern(128));

    let response = node.call(SPI, spi::TYPE_TRANSFER, &request);
    assert_status(&response, OperationResult::Success);
    assert_eq!(response.payload().len(), 256);
    assert_eq!(&response.payload()[..128], pattern(128).as_slice());
    assert_eq!(&response.payload()[128..], pattern(128).as_slice());

    let batches = node.board.spi.transfers();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].bits_per_word, 8);
    assert_eq!(batches[0].speed_hz, 1_000_000);
    assert_eq!(node.board.spi.written().len(), 256);
}

fn loopback_request(len: usize) -> Vec<u8> {
    let mut request = Vec::new();
    request.extend_from_slice(&(len as u32).to_le_bytes());
    request.extend_from_slice(&[0; 8]);
    request.extend_from_slice(&pattern(len));
    request
}

#[test]
fn loopback_sink_answers_empty_success() {
    let node = Node::new();
    let response = node.call(LOOPBACK, loopback::TYPE_SINK, &loopback_request(256));
    assert_status(&response, OperationResult::Success);
    assert!(response.payload().is_empty());
}

#[test]
fn loopback_transfer_echoes_request() {
    let node = Node::new();
    let request = loopback_request(256);
    let response = node.call(LOOPBACK, loopback::TYPE_TRANSFER, &request);
    assert_status(&response, OperationResult::Success);
    assert_eq!(response.payload(), request.as_slice());
}

#[test]
fn short_gpio_direction_in_touches_no_hardware() {
    let node = Node::new();
    let response = node.call(GPIO, gpio::TYPE_DIRECTION_OUT, &[5, 1]);
    assert_status(&response, OperationResult::Success);
    assert_eq!(
        node.board.gpio.line(5).map(|l| l.direction),
        Some(Direction::Output)
    );

    let response = node.call(GPIO, gpio::TYPE_DIRECTION_IN, &[]);
    assert_status(&response, OperationResult::Invalid);
    assert!(response.payload().is_empty());
    assert_eq!(
        node.board.gpio.line(5).map(|l| l.direction),
        Some(Direction::Output)
    );
}
