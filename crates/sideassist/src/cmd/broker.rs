use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use sideassist_bus::{Broker, BrokerConfig};
use tracing::info;

use crate::cmd::{interrupt_flag, BrokerArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::OutputFormat;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: BrokerArgs, _format: OutputFormat) -> CliResult<i32> {
    let mut config = BrokerConfig::default();
    if let Some(credentials) = args.credentials.credentials()? {
        config = config.with_credentials(credentials);
    }
    let broker = Broker::bind(&args.path, config).map_err(|err| bus_error("bind failed", err))?;
    let running = interrupt_flag(|| {})?;
    let handle = broker
        .spawn()
        .map_err(|err| bus_error("broker start failed", err))?;
    info!(path = %args.path.display(), "broker running");

    while running.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
    }

    info!(clients = handle.clients().len(), "shutting down broker");
    handle
        .shutdown()
        .map_err(|err| bus_error("broker shutdown failed", err))?;
    Ok(SUCCESS)
}
