#![cfg(unix)]

use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use greybus_message::{Message, OperationResult};
use greybus_transport::{InboundSink, SocketClient, SocketTransport, Transport, TransportError};

struct RecordingSink(Mutex<mpsc::Sender<(u16, Message)>>);

impl InboundSink for RecordingSink {
    fn deliver(&self, cport: u16, message: Message) -> greybus_transport::Result<()> {
        self.0
            .lock()
            .expect("sink lock")
            .send((cport, message))
            .map_err(|_| TransportError::Shutdown)
    }
}

fn socket_path(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    PathBuf::from(format!(
        "/tmp/greybus-{tag}-{}-{nanos}.sock",
        std::process::id()
    ))
}

fn wait_connected(transport: &SocketTransport) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !transport.is_connected() {
        assert!(Instant::now() < deadline, "host never connected");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn start(tag: &str) -> (SocketTransport, mpsc::Receiver<(u16, Message)>, PathBuf) {
    let path = socket_path(tag);
    let transport = SocketTransport::bind(&path).expect("bind");
    let (tx, rx) = mpsc::channel();
    transport
        .init(Arc::new(RecordingSink(Mutex::new(tx))))
        .expect("init");
    (transport, rx, path)
}

#[test]
fn host_request_reaches_sink_with_cport() {
    let (transport, rx, path) = start("deliver");
    transport.listen(3).expect("listen");

    let mut client = SocketClient::connect(&path).expect("connect");
    wait_connected(&transport);

    let request = Message::with_payload(0x02, 17, OperationResult::Success, b"abc").expect("msg");
    client.send(3, &request).expect("send");

    let (cport, got) = rx.recv_timeout(Duration::from_secs(5)).expect("delivered");
    assert_eq!(cport, 3);
    assert_eq!(got.operation_id(), 17);
    assert_eq!(got.payload(), b"abc");

    transport.exit();
}

#[test]
fn traffic_for_idle_cport_is_dropped() {
    let (transport, rx, path) = start("idle");
    transport.listen(1).expect("listen");

    let mut client = SocketClient::connect(&path).expect("connect");
    wait_connected(&transport);

    let idle = Message::with_payload(0x02, 1, OperationResult::Success, b"x").expect("msg");
    let live = Message::with_payload(0x02, 2, OperationResult::Success, b"y").expect("msg");
    client.send(5, &idle).expect("send idle");
    client.send(1, &live).expect("send live");

    let (cport, got) = rx.recv_timeout(Duration::from_secs(5)).expect("delivered");
    assert_eq!(cport, 1);
    assert_eq!(got.operation_id(), 2);
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

    transport.exit();
}

#[test]
fn request_waits_for_matching_response() {
    let (transport, rx, path) = start("request");
    transport.listen(2).expect("listen");
    let transport = Arc::new(transport);

    let responder = {
        let transport = Arc::clone(&transport);
        std::thread::spawn(move || {
            let (cport, request) = rx.recv_timeout(Duration::from_secs(5)).expect("request");
            let noise = Message::with_payload(0x02, 0, OperationResult::Success, b"log")
                .expect("noise");
            transport.send(cport, &noise).expect("send noise");
            let response =
                Message::response(&request, OperationResult::Success, b"pong").expect("response");
            transport.send(cport, &response).expect("send response");
        })
    };

    let mut client = SocketClient::connect(&path).expect("connect");
    wait_connected(&transport);
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");

    let response = client
        .request(2, 0x03, b"ping", false)
        .expect("request")
        .expect("response");
    assert_eq!(response.op_type(), 0x83);
    assert_eq!(response.payload(), b"pong");

    responder.join().expect("responder");
    transport.exit();
}

#[test]
fn oneshot_request_returns_immediately() {
    let (transport, rx, path) = start("oneshot");
    transport.listen(4).expect("listen");

    let mut client = SocketClient::connect(&path).expect("connect");
    wait_connected(&transport);

    let response = client.request(4, 0x0e, &[1], true).expect("request");
    assert!(response.is_none());

    let (_, got) = rx.recv_timeout(Duration::from_secs(5)).expect("delivered");
    assert!(got.is_oneshot());

    transport.exit();
}

#[test]
fn exit_disconnects_host_and_removes_socket_on_drop() {
    let (transport, _rx, path) = start("exit");
    let mut client = SocketClient::connect(&path).expect("connect");
    wait_connected(&transport);

    transport.exit();
    assert!(!transport.is_connected());
    assert!(client.recv().is_err());

    drop(transport);
    assert!(!path.exists());
}
