use serde_json::json;
use sideassist_bus::{BusClient, ConnectOptions};
use sideassist_client::{validate_name, TopicLayout};
use tracing::info;

use crate::cmd::{parse_json, SetArgs};
use crate::exit::{bus_error, client_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

pub fn run(args: SetArgs, format: OutputFormat) -> CliResult<i32> {
    validate_name(&args.option).map_err(|err| client_error("invalid option", err))?;
    let value = parse_json("--value", &args.value)?;
    let topic = TopicLayout::new(&args.topic_root, &args.target).set_request(&args.option);

    let mut options = ConnectOptions::new(args.client.client_id.clone());
    if let Some(credentials) = args.client.credentials.credentials()? {
        options = options.with_credentials(credentials);
    }
    let bus = BusClient::connect(&args.path, &options)
        .map_err(|err| bus_error("connect failed", err))?;

    let payload = json!({ "value": value }).to_string();
    bus.publish(&topic, payload.into_bytes(), false)
        .map_err(|err| bus_error("publish failed", err))?;
    info!(%topic, "set request sent");
    bus.disconnect()
        .map_err(|err| bus_error("disconnect failed", err))?;

    print_json(&json!({ "topic": topic, "value": value }), format);
    Ok(SUCCESS)
}
