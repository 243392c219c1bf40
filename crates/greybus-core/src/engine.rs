use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::JoinHandle;

use greybus_message::{Message, OperationIdAllocator, OperationResult, PING_TYPE};
use greybus_transport::{InboundSink, Transport, TransportError};
use tracing::{debug, error, info, warn};

use crate::bus::{Bus, EngineStats, Shared, Stats};
use crate::config::{CportConfig, GreybusConfig};
use crate::driver::{Driver, Event};
use crate::error::{GreybusError, Result};
use crate::registry::{CportInfo, Registry, Route};

/// Queue entry: a received message and the cport it arrived on.
struct Pending {
    cport: u16,
    message: Message,
}

struct Inner {
    bus: Bus,
    queue: RwLock<Option<SyncSender<Pending>>>,
    running: AtomicBool,
}

/// The Greybus engine: cport registry, receive queue and dispatch worker.
///
/// Received messages go through one bounded FIFO queue to a single worker
/// thread, so all driver handlers run serialised and messages on a cport are
/// handled in arrival order.
pub struct Greybus {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Greybus {
    /// Validate `config`, start the dispatch worker and initialise `transport`.
    ///
    /// Failing to start the worker or the transport aborts start-up.
    pub fn init(config: GreybusConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let mut builder = std::thread::Builder::new().name(config.worker_name.clone());
        if let Some(size) = config.worker_stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::new(Shared {
            registry: Registry::new(&config),
            transport: Arc::clone(&transport),
            ids: OperationIdAllocator::new(),
            stats: Stats::default(),
            config,
        });
        let bus = Bus::new(shared);

        let worker_bus = bus.clone();
        let handle = builder
            .spawn(move || worker_loop(worker_bus, rx))
            .map_err(GreybusError::Worker)?;

        let inner = Arc::new(Inner {
            bus,
            queue: RwLock::new(Some(tx)),
            running: AtomicBool::new(true),
        });

        let sink: Arc<dyn InboundSink> = Arc::new(EngineSink {
            inner: Arc::downgrade(&inner),
        });
        if let Err(err) = transport.init(sink) {
            error!(transport = transport.name(), error = %err, "transport init failed");
            inner.close_queue();
            let _ = handle.join();
            return Err(err.into());
        }

        let shared = &inner.bus.shared;
        info!(
            cports = shared.registry.len(),
            queue_capacity = shared.config.queue_capacity,
            transport = transport.name(),
            "greybus engine started"
        );

        Ok(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Unbind every driver, stop the worker and shut the transport down.
    ///
    /// Does nothing when the engine is already stopped.
    pub fn deinit(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        for cport in self.inner.bus.shared.registry.bound_cports() {
            if let Err(err) = self.unregister_driver(cport) {
                warn!(cport, error = %err, "failed to unregister driver");
            }
        }

        self.inner.close_queue();
        let handle = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                warn!("deinit called from the dispatch worker; not joining");
            } else if handle.join().is_err() {
                error!("dispatch worker panicked");
            }
        }

        self.inner.bus.shared.transport.exit();
        info!("greybus engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Entry point for received messages.
    ///
    /// Blocks while the queue is full. Messages for an unbound cport are
    /// dropped without error.
    pub fn receive(&self, cport: u16, message: Message) -> Result<()> {
        self.inner.receive(cport, message)
    }

    /// Bind `driver` to `cport` and run its `init` callback.
    pub fn register_driver(&self, cport: u16, bundle: u8, driver: Arc<dyn Driver>) -> Result<()> {
        let bus = &self.inner.bus;
        let registry = &bus.shared.registry;

        let configured = registry.bundle(cport)?;
        if configured != bundle {
            error!(cport, bundle, configured, "bundle mismatch");
            return Err(GreybusError::InvalidArgument(format!(
                "cport {cport} belongs to bundle {configured}, not {bundle}"
            )));
        }
        registry.ensure_vacant(cport)?;

        driver.init(bus, cport).map_err(|err| {
            error!(cport, driver = driver.name(), error = %err, "driver init failed");
            GreybusError::Driver(err)
        })?;

        if let Err(err) = registry.bind(cport, Arc::clone(&driver)) {
            driver.exit(bus, cport);
            return Err(err);
        }

        debug!(cport, bundle, driver = driver.name(), "driver registered");
        Ok(())
    }

    /// Unbind the driver on `cport`.
    ///
    /// Queued messages for the cport are discarded by the worker from here on.
    pub fn unregister_driver(&self, cport: u16) -> Result<()> {
        let bus = &self.inner.bus;
        let registry = &bus.shared.registry;

        registry.check_range(cport)?;
        if !registry.is_bound(cport) {
            return Err(GreybusError::NotBound(cport));
        }

        match bus.shared.transport.stop_listening(cport) {
            Ok(()) | Err(TransportError::NotListening(_)) => {}
            Err(err) => warn!(cport, error = %err, "stop listening failed"),
        }

        let driver = registry.begin_teardown(cport)?;
        driver.exit(bus, cport);
        registry.unbind(cport);

        debug!(cport, driver = driver.name(), "driver unregistered");
        Ok(())
    }

    /// Register drivers for the configured cport table.
    ///
    /// `factory` is asked once per cport; cports it returns `None` for stay
    /// unbound. Registration failures are logged and skipped. Returns the
    /// number of drivers bound.
    pub fn register_from_config<F>(&self, mut factory: F) -> usize
    where
        F: FnMut(u16, &CportConfig) -> Option<Arc<dyn Driver>>,
    {
        let table = self.inner.bus.shared.config.cports.clone();
        let mut bound = 0;
        for (index, entry) in table.iter().enumerate() {
            let cport = index as u16;
            let Some(driver) = factory(cport, entry) else {
                debug!(cport, protocol = %entry.protocol, "no driver for cport");
                continue;
            };
            match self.register_driver(cport, entry.bundle, driver) {
                Ok(()) => bound += 1,
                Err(err) => {
                    error!(cport, protocol = %entry.protocol, error = %err, "registration failed")
                }
            }
        }
        info!(bound, cports = table.len(), "drivers registered");
        bound
    }

    pub fn listen(&self, cport: u16) -> Result<()> {
        self.inner.bus.listen(cport)
    }

    pub fn stop_listening(&self, cport: u16) -> Result<()> {
        self.inner.bus.stop_listening(cport)
    }

    pub fn notify(&self, cport: u16, event: Event) -> Result<()> {
        self.inner.bus.notify(cport, event)
    }

    pub fn cport_info(&self, cport: u16) -> Option<CportInfo> {
        self.inner.bus.cport_info(cport)
    }

    pub fn cports(&self) -> Vec<CportInfo> {
        self.inner.bus.shared.registry.snapshot()
    }

    pub fn cport_count(&self) -> usize {
        self.inner.bus.cport_count()
    }

    pub fn stats(&self) -> EngineStats {
        self.inner.bus.stats()
    }

    /// A handle for sending on behalf of this engine.
    pub fn bus(&self) -> Bus {
        self.inner.bus.clone()
    }
}

impl Drop for Greybus {
    fn drop(&mut self) {
        self.deinit();
    }
}

impl Inner {
    fn receive(&self, cport: u16, message: Message) -> Result<()> {
        let shared = &self.bus.shared;
        if let Err(err) = shared.registry.check_range(cport) {
            error!(cport, op_type = message.op_type(), "message for invalid cport");
            return Err(err);
        }
        if !shared.registry.is_bound(cport) {
            warn!(cport, op_type = message.op_type(), "no driver bound; dropping message");
            Stats::bump(&shared.stats.dropped_unbound);
            return Ok(());
        }

        let sender = self
            .queue
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
            .ok_or(GreybusError::NotInitialized)?;

        sender
            .send(Pending { cport, message })
            .map_err(|_| GreybusError::NotInitialized)?;
        Stats::bump(&shared.stats.received);
        Ok(())
    }

    fn close_queue(&self) {
        self.queue.write().unwrap_or_else(|p| p.into_inner()).take();
    }
}

/// Feeds transport traffic into the engine without keeping it alive.
struct EngineSink {
    inner: Weak<Inner>,
}

impl InboundSink for EngineSink {
    fn deliver(&self, cport: u16, message: Message) -> greybus_transport::Result<()> {
        let inner = self.inner.upgrade().ok_or(TransportError::Shutdown)?;
        inner.receive(cport, message).map_err(|err| match err {
            GreybusError::InvalidCport(cport) => TransportError::InvalidCport(cport),
            _ => TransportError::Shutdown,
        })
    }
}

fn worker_loop(bus: Bus, queue: Receiver<Pending>) {
    debug!("dispatch worker running");
    for Pending { cport, message } in queue.iter() {
        dispatch(&bus, cport, message);
    }
    debug!("dispatch worker exiting");
}

fn dispatch(bus: &Bus, cport: u16, message: Message) {
    let stats = &bus.shared.stats;
    let driver = match bus.shared.registry.route(cport) {
        Route::Driver(driver) => driver,
        Route::Draining => {
            debug!(cport, op_type = message.op_type(), "cport draining; discarding message");
            Stats::bump(&stats.drained);
            return;
        }
        Route::Unbound => {
            warn!(cport, op_type = message.op_type(), "driver gone; dropping message");
            Stats::bump(&stats.dropped_unbound);
            return;
        }
    };

    if message.op_type() == PING_TYPE {
        Stats::bump(&stats.pinged);
        if let Err(err) = bus.respond_empty(cport, &message, OperationResult::Success) {
            warn!(cport, error = %err, "failed to answer ping");
        }
        return;
    }

    debug!(
        cport,
        op_type = message.op_type(),
        operation_id = message.operation_id(),
        driver = driver.name(),
        "dispatching"
    );
    Stats::bump(&stats.dispatched);
    if let Err(err) = driver.handle(bus, cport, message) {
        Stats::bump(&stats.handler_errors);
        warn!(cport, driver = driver.name(), error = %err, "handler failed");
    }
}
