use std::collections::BTreeSet;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use greybus_message::{
    CportMessage, Message, MessageError, MessageReader, MessageWriter, OperationIdAllocator,
    OperationResult,
};
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{InboundSink, Transport};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
const MAX_PATH_LEN: usize = 104;

/// Unix domain socket transport.
///
/// Binds a filesystem socket and serves one host connection at a time. Each
/// message carries its cport id in the header pad bytes. Inbound messages
/// for cports that are not listening are dropped.
pub struct SocketTransport {
    shared: Arc<SocketShared>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

struct SocketShared {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
    listening: RwLock<BTreeSet<u16>>,
    writer: Mutex<Option<MessageWriter<UnixStream>>>,
    shutdown: AtomicBool,
}

impl SocketTransport {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

    /// Bind a socket at `path`.
    ///
    /// If the path already exists and is a socket, it is removed first (stale
    /// socket cleanup). Any other existing file is refused.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind a socket at `path` with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let path_bytes = path.as_os_str().len();
        if path_bytes >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: MAX_PATH_LEN,
            });
        }

        let bind_err = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "greybus socket bound");

        Ok(Self {
            shared: Arc::new(SocketShared {
                listener,
                path,
                created_inode: (created.dev(), created.ino()),
                listening: RwLock::new(BTreeSet::new()),
                writer: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            }),
            accept_thread: Mutex::new(None),
        })
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Whether a host is currently connected.
    pub fn is_connected(&self) -> bool {
        self.shared.lock_writer().is_some()
    }

    pub fn is_listening(&self, cport: u16) -> bool {
        self.shared.is_listening(cport)
    }
}

impl SocketShared {
    fn lock_writer(&self) -> MutexGuard<'_, Option<MessageWriter<UnixStream>>> {
        self.writer.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn is_listening(&self, cport: u16) -> bool {
        self.listening
            .read()
            .map(|set| set.contains(&cport))
            .unwrap_or(false)
    }

    fn accept_loop(&self, sink: Arc<dyn InboundSink>) {
        while !self.shutdown.load(Ordering::Acquire) {
            let stream = match self.listener.accept() {
                Ok((stream, _addr)) => stream,
                Err(err) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(error = %TransportError::Accept(err), "accept failed");
                    continue;
                }
            };
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            match peer_credentials(&stream) {
                Some((uid, gid, pid)) => info!(uid, gid, pid, "host connected"),
                None => info!("host connected"),
            }

            let write_half = match stream.try_clone() {
                Ok(half) => half,
                Err(err) => {
                    warn!(error = %err, "failed to clone host stream");
                    continue;
                }
            };
            *self.lock_writer() = Some(MessageWriter::new(write_half));

            self.serve(stream, sink.as_ref());

            *self.lock_writer() = None;
        }
        debug!("accept loop finished");
    }

    fn serve(&self, stream: UnixStream, sink: &dyn InboundSink) {
        let mut reader = MessageReader::new(stream);
        loop {
            let CportMessage { cport, message } = match reader.read_message() {
                Ok(msg) => msg,
                Err(MessageError::ConnectionClosed) => {
                    info!("host disconnected");
                    return;
                }
                Err(err) => {
                    if !self.shutdown.load(Ordering::Acquire) {
                        warn!(error = %err, "dropping host connection");
                    }
                    return;
                }
            };

            if !self.is_listening(cport) {
                warn!(
                    cport,
                    op_type = message.op_type(),
                    "dropping message for cport that is not listening"
                );
                continue;
            }

            if let Err(err) = sink.deliver(cport, message) {
                warn!(cport, error = %err, "inbound message rejected");
            }
        }
    }
}

impl Transport for SocketTransport {
    fn init(&self, sink: Arc<dyn InboundSink>) -> Result<()> {
        let mut slot = self
            .accept_thread
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        self.shared.shutdown.store(false, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("greybus-socket".into())
            .spawn(move || shared.accept_loop(sink))?;
        *slot = Some(handle);
        Ok(())
    }

    fn exit(&self) {
        self.shared.shutdown.store(true, Ordering::Release);

        if let Some(writer) = self.shared.lock_writer().take() {
            let _ = writer.get_ref().shutdown(std::net::Shutdown::Both);
        }

        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            // Wake the blocking accept so the thread can observe the flag.
            let _ = UnixStream::connect(&self.shared.path);
            if handle.join().is_err() {
                warn!("socket accept thread panicked");
            }
        }

        if let Ok(mut set) = self.shared.listening.write() {
            set.clear();
        }
        info!(path = ?self.shared.path, "greybus socket closed");
    }

    fn listen(&self, cport: u16) -> Result<()> {
        let mut set = self
            .shared
            .listening
            .write()
            .map_err(|_| TransportError::Shutdown)?;
        set.insert(cport);
        debug!(cport, "listening");
        Ok(())
    }

    fn stop_listening(&self, cport: u16) -> Result<()> {
        let mut set = self
            .shared
            .listening
            .write()
            .map_err(|_| TransportError::Shutdown)?;
        if set.remove(&cport) {
            debug!(cport, "stopped listening");
            Ok(())
        } else {
            Err(TransportError::NotListening(cport))
        }
    }

    fn send(&self, cport: u16, message: &Message) -> Result<()> {
        let mut writer = self.shared.lock_writer();
        match writer.as_mut() {
            Some(writer) => writer.write_message(cport, message).map_err(Into::into),
            None => Err(TransportError::NotConnected),
        }
    }

    fn name(&self) -> &'static str {
        "unix-socket"
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let running = self
            .accept_thread
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false);
        if running {
            self.exit();
        }

        let (expected_dev, expected_ino) = self.shared.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.shared.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.shared.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.shared.path);
            } else {
                debug!(
                    path = ?self.shared.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

/// Host side of a [`SocketTransport`] link.
pub struct SocketClient {
    reader: MessageReader<UnixStream>,
    writer: MessageWriter<UnixStream>,
    ids: OperationIdAllocator,
}

impl SocketClient {
    /// Connect to a listening Greybus socket (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        let write_half = stream.try_clone()?;
        debug!(?path, "connected to greybus socket");
        Ok(Self {
            reader: MessageReader::new(stream),
            writer: MessageWriter::new(write_half),
            ids: OperationIdAllocator::new(),
        })
    }

    /// Bound how long [`SocketClient::recv`] may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a message as-is.
    pub fn send(&mut self, cport: u16, message: &Message) -> Result<()> {
        self.writer.write_message(cport, message)?;
        Ok(())
    }

    /// Receive the next message from the node.
    pub fn recv(&mut self) -> Result<CportMessage> {
        Ok(self.reader.read_message()?)
    }

    /// Send a request and wait for its response.
    ///
    /// One-shot requests return `None` immediately. Unrelated traffic that
    /// arrives while waiting is logged and skipped.
    pub fn request(
        &mut self,
        cport: u16,
        op_type: u8,
        payload: &[u8],
        oneshot: bool,
    ) -> Result<Option<Message>> {
        let operation_id = if oneshot { 0 } else { self.ids.next_id() };
        let request =
            Message::with_payload(op_type, operation_id, OperationResult::Success, payload)?;
        self.send(cport, &request)?;
        if oneshot {
            return Ok(None);
        }

        loop {
            let incoming = self.recv()?;
            if incoming.cport == cport
                && incoming.message.is_response()
                && incoming.message.operation_id() == operation_id
            {
                return Ok(Some(incoming.message));
            }
            debug!(
                cport = incoming.cport,
                op_type = incoming.message.op_type(),
                operation_id = incoming.message.operation_id(),
                "skipping unrelated message"
            );
        }
    }
}

/// Credentials of the connected peer as `(uid, gid, pid)`, via `SO_PEERCRED`.
#[cfg(target_os = "linux")]
fn peer_credentials(stream: &UnixStream) -> Option<(u32, u32, u32)> {
    use std::os::fd::AsRawFd;

    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: `cred` and `len` are valid writable pointers for the provided sizes,
    // and the descriptor is an open Unix socket owned by `stream`.
    let rc = unsafe {
        libc::getsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            (&mut cred as *mut libc::ucred).cast::<libc::c_void>(),
            &mut len,
        )
    };

    if rc == 0 && len as usize == std::mem::size_of::<libc::ucred>() {
        Some((cred.uid, cred.gid, cred.pid as u32))
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn peer_credentials(_stream: &UnixStream) -> Option<(u32, u32, u32)> {
    None
}
