use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sideassist_client::{Client, ClientConfig, NamedValue, ValueEvent};
use tracing::{info, warn};

use crate::cmd::{interrupt_flag, load_rule, parse_json, EchoArgs};
use crate::exit::{client_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::OutputFormat;

const OPTION: &str = "opt";
const PARAMETER: &str = "param";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: EchoArgs, _format: OutputFormat) -> CliResult<i32> {
    let initial = parse_json("--initial", &args.initial)?;
    let validator = args
        .validator
        .as_deref()
        .map(|rule| load_rule(rule, false))
        .transpose()?;

    let mut config = ClientConfig::new(&args.client_id).with_topic_root(&args.topic_root);
    if let Some(credentials) = args.credentials.credentials()? {
        config = config.with_credentials(credentials);
    }
    let client = Client::new(config);
    let opt = client
        .add_option(OPTION)
        .map_err(|err| client_error("option setup failed", err))?;
    let param = client
        .add_parameter(PARAMETER)
        .map_err(|err| client_error("parameter setup failed", err))?;
    mirror(&opt, param);

    if validator.is_some() {
        opt.set_validator(validator);
    }
    opt.set_value(initial)
        .map_err(|err| client_error("initial value refused", err))?;

    let running = interrupt_flag(|| {})?;
    client
        .connect(&args.path)
        .map_err(|err| client_error("connect failed", err))?;
    info!(client_id = client.client_id(), "echo running");

    while running.load(Ordering::SeqCst) {
        if !client.is_connected() {
            return Err(CliError::new(FAILURE, "lost connection to broker"));
        }
        thread::sleep(POLL_INTERVAL);
    }

    client
        .disconnect()
        .map_err(|err| client_error("disconnect failed", err))?;
    Ok(SUCCESS)
}

/// Copy every value committed to `source` into `target`.
fn mirror(source: &NamedValue, target: Arc<NamedValue>) {
    source.subscribe(move |source, event| {
        if let ValueEvent::ValueChanged(value) = event {
            info!(from = source.name(), to = target.name(), %value, "mirroring value");
            if let Err(err) = target.set_value(value.clone()) {
                warn!(error = %err, "mirror refused value");
            }
        }
    });
}
