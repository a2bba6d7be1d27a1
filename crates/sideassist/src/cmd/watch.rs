use std::sync::atomic::Ordering;

use sideassist_bus::{BusClient, BusError, ConnectOptions};

use crate::cmd::{interrupt_flag, WatchArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: WatchArgs, format: OutputFormat) -> CliResult<i32> {
    let mut options = ConnectOptions::new(args.client.client_id.clone());
    if let Some(credentials) = args.client.credentials.credentials()? {
        options = options.with_credentials(credentials);
    }
    let bus = BusClient::connect(&args.path, &options)
        .map_err(|err| bus_error("connect failed", err))?;
    bus.subscribe(&args.filter)
        .map_err(|err| bus_error("subscribe failed", err))?;

    let (publisher, mut receiver) = bus.split();
    let running = {
        let publisher = publisher.clone();
        interrupt_flag(move || {
            let _ = publisher.disconnect();
        })?
    };

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let message = match receiver.recv() {
            Ok(message) => message,
            Err(_) if !running.load(Ordering::SeqCst) => break,
            Err(err @ BusError::Disconnected(_)) => return Err(bus_error("broker went away", err)),
            Err(err) => return Err(bus_error("receive failed", err)),
        };

        print_message(&message, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    let _ = publisher.disconnect();
    Ok(SUCCESS)
}
