#![cfg(all(unix, feature = "cli"))]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use greybus_transport::SocketClient;

const CONFIG: &str = r#"{
    "cports": [
        { "bundle": 0, "protocol": "control" },
        { "bundle": 1, "protocol": "gpio" },
        { "bundle": 1, "protocol": "i2c" },
        { "bundle": 1, "protocol": "loopback" },
        { "bundle": 1, "protocol": 66 }
    ],
    "queue_capacity": 4
}"#;

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/gbcli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn greybus() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_greybus"));
    cmd.arg("--log-level").arg("error");
    cmd
}

/// Ping the control cport until the node answers.
fn wait_for_node(path: &Path, timeout: Duration) {
    let start = Instant::now();
    loop {
        if let Ok(mut client) = SocketClient::connect(path) {
            let answered = client
                .set_read_timeout(Some(Duration::from_millis(200)))
                .and_then(|()| client.request(0, 0x00, &[], false))
                .map(|response| response.is_some())
                .unwrap_or(false);
            if answered {
                return;
            }
        }
        if start.elapsed() >= timeout {
            panic!("node did not come up");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

struct Node {
    child: Child,
    sock: PathBuf,
}

impl Node {
    fn start(tag: &str) -> Self {
        let dir = unique_temp_dir(tag);
        let sock = dir.join("node.sock");
        let config = dir.join("node.json");
        let manifest = dir.join("manifest.bin");
        std::fs::write(&config, CONFIG).expect("write config");
        std::fs::write(&manifest, b"\x08\x00\x00\x01manifest").expect("write manifest");

        let child = greybus()
            .arg("serve")
            .arg(&sock)
            .arg("--config")
            .arg(&config)
            .arg("--manifest")
            .arg(&manifest)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("serve command should start");
        wait_for_node(&sock, Duration::from_secs(5));
        Self { child, sock }
    }

    fn send(&self, cport: &str, op_type: &str, extra: &[&str]) -> Output {
        greybus()
            .arg("--format")
            .arg("json")
            .arg("send")
            .arg(&self.sock)
            .arg("--cport")
            .arg(cport)
            .arg("--type")
            .arg(op_type)
            .args(extra)
            .output()
            .expect("send command should run")
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let text = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(text.trim()).expect("stdout should be one JSON object")
}

#[test]
fn send_prints_response_fields() {
    let node = Node::start("send");
    let output = node.send("1", "0x02", &[]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["cport"], 1);
    assert_eq!(json["op_type"], 0x82);
    assert_eq!(json["result"], "success");
    assert_eq!(json["payload"], "10");
}

#[test]
fn send_serves_configured_manifest() {
    let node = Node::start("manifest");
    let output = node.send("0", "0x03", &[]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["payload"], "0c00");
}

#[test]
fn send_exits_nonzero_on_failed_operation() {
    let node = Node::start("failed");
    let output = node.send("1", "0x7f", &[]);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["result"], "invalid");
}

#[test]
fn loopback_transfer_round_trips_hex_payload() {
    let node = Node::start("loopback");
    let payload = "04000000000000000000000001020304";
    let output = node.send("3", "0x03", &["--hex", payload]);
    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["payload"], payload);
}

#[test]
fn oneshot_send_prints_nothing() {
    let node = Node::start("oneshot");
    let output = node.send("3", "0x04", &["--oneshot", "--hex", "00000000"]);
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn send_to_missing_socket_fails() {
    let dir = unique_temp_dir("missing");
    let output = greybus()
        .arg("send")
        .arg(dir.join("absent.sock"))
        .arg("--cport")
        .arg("0")
        .arg("--type")
        .arg("1")
        .output()
        .expect("send command should run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}

#[test]
fn config_prints_cport_table() {
    let dir = unique_temp_dir("config");
    let config = dir.join("node.json");
    std::fs::write(&config, CONFIG).expect("write config");

    let output = greybus()
        .arg("--format")
        .arg("json")
        .arg("config")
        .arg(&config)
        .output()
        .expect("config command should run");
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["cport_count"], 5);
    assert_eq!(json["queue_capacity"], 4);
    assert_eq!(json["cports"][1]["protocol"], "gpio");
    assert_eq!(json["cports"][4]["protocol"], "unknown(0x42)");
}

#[test]
fn config_rejects_empty_table() {
    let dir = unique_temp_dir("empty");
    let config = dir.join("node.json");
    std::fs::write(&config, r#"{ "cports": [] }"#).expect("write config");

    let output = greybus()
        .arg("config")
        .arg(&config)
        .output()
        .expect("config command should run");
    assert_eq!(output.status.code(), Some(40));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cport table is empty"));
}
