use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use greybus_core::{Greybus, GreybusConfig};
use greybus_protocols::sim::SimBoard;
use greybus_transport::SocketTransport;
use tracing::{info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{greybus_error, io_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let mut config = GreybusConfig::load(&args.config).map_err(|err| {
        greybus_error(&format!("failed loading {}", args.config.display()), err)
    })?;
    if let Some(path) = args.manifest {
        config.manifest = Some(path);
    }
    let manifest = match &config.manifest {
        Some(path) => std::fs::read(path).map_err(|err| {
            io_error(&format!("failed reading manifest {}", path.display()), err)
        })?,
        None => Vec::new(),
    };

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let transport =
        SocketTransport::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    let engine = Greybus::init(config, Arc::new(transport))
        .map_err(|err| greybus_error("engine start failed", err))?;

    let board = SimBoard::new();
    let peripherals = board.peripherals(manifest);
    let bound = engine.register_from_config(|_, entry| peripherals.driver_for(entry.protocol));

    for info in engine.cports() {
        if info.driver.is_none() {
            continue;
        }
        if let Err(err) = engine.listen(info.cport) {
            warn!(cport = info.cport, error = %err, "failed to listen");
        }
    }
    info!(path = ?args.path, bound, "node ready");

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(POLL_INTERVAL);
    }

    let stats = engine.stats();
    info!(
        received = stats.received,
        dispatched = stats.dispatched,
        pinged = stats.pinged,
        dropped = stats.dropped_unbound,
        "shutting down"
    );
    engine.deinit();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
