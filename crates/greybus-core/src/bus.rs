use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use greybus_message::{Message, OperationIdAllocator, OperationResult};
use greybus_transport::Transport;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{GreybusConfig, Protocol};
use crate::driver::Event;
use crate::error::{GreybusError, Result};
use crate::registry::{CportInfo, Registry};

/// Engine state shared by the engine, its worker and every [`Bus`] handle.
pub(crate) struct Shared {
    pub(crate) config: GreybusConfig,
    pub(crate) registry: Registry,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) ids: OperationIdAllocator,
    pub(crate) stats: Stats,
}

#[derive(Default)]
pub(crate) struct Stats {
    pub(crate) received: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) pinged: AtomicU64,
    pub(crate) dropped_unbound: AtomicU64,
    pub(crate) drained: AtomicU64,
    pub(crate) handler_errors: AtomicU64,
}

impl Stats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            pinged: self.pinged.load(Ordering::Relaxed),
            dropped_unbound: self.dropped_unbound.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }
}

/// Message counters of one engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Messages accepted onto the receive queue.
    pub received: u64,
    /// Messages handed to a driver.
    pub dispatched: u64,
    /// Pings answered by the engine itself.
    pub pinged: u64,
    /// Messages dropped because no driver was bound.
    pub dropped_unbound: u64,
    /// Messages discarded because their cport was being torn down.
    pub drained: u64,
    /// Driver handlers that returned an error.
    pub handler_errors: u64,
}

/// Handle drivers use to talk to the engine and the host.
///
/// Cheap to clone; all clones refer to the same engine.
#[derive(Clone)]
pub struct Bus {
    pub(crate) shared: Arc<Shared>,
}

impl Bus {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Transmit `message` on `cport`.
    pub fn send(&self, cport: u16, message: &Message) -> Result<()> {
        self.shared.registry.check_range(cport)?;
        self.shared.transport.send(cport, message)?;
        Ok(())
    }

    /// Answer `request` with `result` and `payload`.
    ///
    /// One-shot requests (operation id 0) expect no answer, so nothing is
    /// sent for them.
    pub fn respond(
        &self,
        cport: u16,
        request: &Message,
        result: OperationResult,
        payload: &[u8],
    ) -> Result<()> {
        if request.is_oneshot() {
            debug!(
                cport,
                op_type = request.op_type(),
                result = %result,
                "suppressing response to one-shot request"
            );
            return Ok(());
        }
        let response = Message::response(request, result, payload)?;
        debug!(
            cport,
            op_type = response.op_type(),
            operation_id = response.operation_id(),
            result = %result,
            "sending response"
        );
        self.send(cport, &response)
    }

    /// Answer `request` with `result` and no payload.
    pub fn respond_empty(&self, cport: u16, request: &Message, result: OperationResult) -> Result<()> {
        self.respond(cport, request, result, &[])
    }

    /// Send a request originated by this node and return its operation id.
    pub fn request(&self, cport: u16, op_type: u8, payload: &[u8], oneshot: bool) -> Result<u16> {
        let mut message = Message::request(payload.len(), op_type, oneshot, &self.shared.ids)?;
        message.payload_mut().copy_from_slice(payload);
        self.send(cport, &message)?;
        Ok(message.operation_id())
    }

    /// Ask the transport to deliver traffic for `cport`.
    pub fn listen(&self, cport: u16) -> Result<()> {
        self.require_bound(cport)?;
        self.shared.transport.listen(cport)?;
        Ok(())
    }

    /// Ask the transport to stop delivering traffic for `cport`.
    pub fn stop_listening(&self, cport: u16) -> Result<()> {
        self.require_bound(cport)?;
        self.shared.transport.stop_listening(cport)?;
        Ok(())
    }

    /// Deliver a connection event to the driver bound on `cport`.
    pub fn notify(&self, cport: u16, event: Event) -> Result<()> {
        self.shared.registry.check_range(cport)?;
        let driver = self
            .shared
            .registry
            .driver(cport)
            .ok_or(GreybusError::NotConnected(cport))?;

        debug!(cport, ?event, driver = driver.name(), "notify");
        let outcome = match event {
            Event::Connected => driver.connected(self, cport),
            Event::Disconnected => driver.disconnected(self, cport),
        };
        outcome.map_err(|err| {
            warn!(cport, ?event, error = %err, "driver rejected event");
            GreybusError::Driver(err)
        })
    }

    pub fn cport_info(&self, cport: u16) -> Option<CportInfo> {
        self.shared.registry.get(cport)
    }

    pub fn cport_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Reverse lookup: the cport in `bundle` carrying `protocol`.
    pub fn find_cport(&self, bundle: u8, protocol: Protocol) -> Option<u16> {
        self.shared.registry.find(bundle, protocol)
    }

    pub fn config(&self) -> &GreybusConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.stats.snapshot()
    }

    fn require_bound(&self, cport: u16) -> Result<()> {
        self.shared.registry.check_range(cport)?;
        if self.shared.registry.is_bound(cport) {
            Ok(())
        } else {
            Err(GreybusError::NotBound(cport))
        }
    }
}
