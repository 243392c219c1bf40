use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use greybus_message::{CportMessage, Message};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{InboundSink, Transport};

/// In-process transport.
///
/// Everything the engine sends is queued and can be collected with
/// [`MemoryTransport::recv_timeout`]; [`MemoryTransport::inject`] feeds a
/// message into the engine as if it had arrived from the host. Injection does
/// not require the cport to be listening, so tests can exercise the engine's
/// own validation.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    sent: Mutex<VecDeque<CportMessage>>,
    sent_ready: Condvar,
}

#[derive(Default)]
struct State {
    sink: Option<Arc<dyn InboundSink>>,
    listening: BTreeSet<u16>,
    refuse_listen: BTreeSet<u16>,
    fail_sends: bool,
    init_calls: usize,
    exit_calls: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` on `cport` to the engine.
    pub fn inject(&self, cport: u16, message: Message) -> Result<()> {
        let sink = self.lock_state().sink.clone();
        match sink {
            Some(sink) => sink.deliver(cport, message),
            None => Err(TransportError::NotInitialized),
        }
    }

    /// Wait up to `timeout` for the next message the engine sent.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CportMessage> {
        let deadline = Instant::now() + timeout;
        let mut sent = self.lock_sent();
        loop {
            if let Some(msg) = sent.pop_front() {
                return Some(msg);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            sent = match self.sent_ready.wait_timeout(sent, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Take the next sent message without waiting.
    pub fn try_recv(&self) -> Option<CportMessage> {
        self.lock_sent().pop_front()
    }

    /// Number of sent messages not yet collected.
    pub fn pending(&self) -> usize {
        self.lock_sent().len()
    }

    pub fn is_listening(&self, cport: u16) -> bool {
        self.lock_state().listening.contains(&cport)
    }

    pub fn listening(&self) -> Vec<u16> {
        self.lock_state().listening.iter().copied().collect()
    }

    /// Make subsequent `listen` calls for `cport` fail.
    pub fn refuse_listen(&self, cport: u16) {
        self.lock_state().refuse_listen.insert(cport);
    }

    /// Make subsequent `send` calls fail with [`TransportError::NotConnected`].
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock_state().fail_sends = fail;
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_state().sink.is_some()
    }

    /// `(init, exit)` call counts.
    pub fn lifecycle_calls(&self) -> (usize, usize) {
        let state = self.lock_state();
        (state.init_calls, state.exit_calls)
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_sent(&self) -> MutexGuard<'_, VecDeque<CportMessage>> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Transport for MemoryTransport {
    fn init(&self, sink: Arc<dyn InboundSink>) -> Result<()> {
        let mut state = self.lock_state();
        state.sink = Some(sink);
        state.init_calls += 1;
        Ok(())
    }

    fn exit(&self) {
        let mut state = self.lock_state();
        state.sink = None;
        state.listening.clear();
        state.exit_calls += 1;
    }

    fn listen(&self, cport: u16) -> Result<()> {
        let mut state = self.lock_state();
        if state.refuse_listen.contains(&cport) {
            return Err(TransportError::Unsupported("listen refused"));
        }
        state.listening.insert(cport);
        debug!(cport, "memory transport listening");
        Ok(())
    }

    fn stop_listening(&self, cport: u16) -> Result<()> {
        if self.lock_state().listening.remove(&cport) {
            Ok(())
        } else {
            Err(TransportError::NotListening(cport))
        }
    }

    fn send(&self, cport: u16, message: &Message) -> Result<()> {
        if self.lock_state().fail_sends {
            return Err(TransportError::NotConnected);
        }
        let copy = message.copy()?;
        self.lock_sent().push_back(CportMessage::new(cport, copy));
        self.sent_ready.notify_all();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
