use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Subcommand};
use sideassist_bus::Credentials;
use sideassist_client::DEFAULT_TOPIC_ROOT;
use sideassist_validator::{ChildPolicy, DecodeConfig, ValueValidator};

use crate::exit::{decode_error, CliError, CliResult, DATA_INVALID, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod broker;
pub mod canonical;
pub mod echo;
pub mod set;
pub mod validate;
pub mod version;
pub mod watch;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a broker until interrupted.
    Broker(BrokerArgs),
    /// Check JSON values against a rule.
    Validate(ValidateArgs),
    /// Print the canonical encoding of a rule.
    Canonical(CanonicalArgs),
    /// Run the echo client: option `opt` mirrored into parameter `param`.
    Echo(EchoArgs),
    /// Ask a client to change one of its options.
    Set(SetArgs),
    /// Subscribe and print messages.
    Watch(WatchArgs),
    /// Show version information.
    Version(VersionArgs),
}

impl Command {
    /// Base name of the log file written with `--log-dir`.
    pub fn log_name(&self) -> &str {
        match self {
            Command::Broker(_) => "broker",
            Command::Validate(_) => "validate",
            Command::Canonical(_) => "canonical",
            Command::Echo(args) => &args.client_id,
            Command::Set(args) => &args.client.client_id,
            Command::Watch(args) => &args.client.client_id,
            Command::Version(_) => "version",
        }
    }
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Broker(args) => broker::run(args, format),
        Command::Validate(args) => validate::run(args, format),
        Command::Canonical(args) => canonical::run(args, format),
        Command::Echo(args) => echo::run(args, format),
        Command::Set(args) => set::run(args, format),
        Command::Watch(args) => watch::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Username and password for the broker handshake.
#[derive(Args, Debug, Default)]
pub struct CredentialArgs {
    /// Broker username.
    #[arg(long, env = "SIDEASSIST_USERNAME")]
    pub username: Option<String>,
    /// Broker password.
    #[arg(long, env = "SIDEASSIST_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl CredentialArgs {
    pub fn credentials(&self) -> CliResult<Option<Credentials>> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Some(Credentials::new(username, password))),
            (None, None) => Ok(None),
            _ => Err(CliError::new(
                USAGE,
                "--username and --password must be given together",
            )),
        }
    }
}

/// Identity of a bus session opened by the CLI.
#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Client id used for the bus session.
    #[arg(long = "session-id", default_value = "sideassist-cli")]
    pub client_id: String,
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Rule as JSON, or `@file`.
    pub rule: String,
    /// JSON values to check.
    #[arg(required = true, num_args = 1..)]
    pub values: Vec<String>,
    /// Drop undecodable children of `any`/`all` instead of failing.
    #[arg(long)]
    pub skip_invalid_children: bool,
}

#[derive(Args, Debug)]
pub struct CanonicalArgs {
    /// Rule as JSON, or `@file`.
    pub rule: String,
    /// Drop undecodable children of `any`/`all` instead of failing.
    #[arg(long)]
    pub skip_invalid_children: bool,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Broker socket path.
    pub path: PathBuf,
    /// Client id.
    #[arg(long, default_value = "echo")]
    pub client_id: String,
    /// Rule for `opt`, as JSON or `@file`.
    #[arg(long)]
    pub validator: Option<String>,
    /// Initial value of `opt` as JSON.
    #[arg(long, default_value = "123")]
    pub initial: String,
    /// First topic level.
    #[arg(long, default_value = DEFAULT_TOPIC_ROOT)]
    pub topic_root: String,
    #[command(flatten)]
    pub credentials: CredentialArgs,
}

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Broker socket path.
    pub path: PathBuf,
    /// Id of the client owning the option.
    #[arg(long = "client")]
    pub target: String,
    /// Option name.
    #[arg(long)]
    pub option: String,
    /// New value as JSON.
    #[arg(long)]
    pub value: String,
    /// First topic level.
    #[arg(long, default_value = DEFAULT_TOPIC_ROOT)]
    pub topic_root: String,
    #[command(flatten)]
    pub client: SessionArgs,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Broker socket path.
    pub path: PathBuf,
    /// Topic filter.
    #[arg(long, default_value = "side_assist/#")]
    pub filter: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub client: SessionArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Set the returned flag to false on Ctrl-C, then run `on_stop`.
pub fn interrupt_flag<F>(on_stop: F) -> CliResult<Arc<AtomicBool>>
where
    F: Fn() + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
        on_stop();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

/// Decode a rule given inline or as `@file`.
pub fn load_rule(arg: &str, skip_invalid_children: bool) -> CliResult<ValueValidator> {
    let text = read_argument(arg)?;
    let json = parse_json("rule", &text)?;
    let policy = if skip_invalid_children {
        ChildPolicy::Skip
    } else {
        ChildPolicy::Reject
    };
    let config = DecodeConfig::default().with_child_policy(policy);
    ValueValidator::from_json_with_config(&json, &config)
        .map_err(|err| decode_error("invalid rule", err))
}

/// Inline text, or the contents of the file named after a leading `@`.
pub fn read_argument(arg: &str) -> CliResult<String> {
    match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .map_err(|err| CliError::new(USAGE, format!("failed reading {path}: {err}"))),
        None => Ok(arg.to_string()),
    }
}

pub fn parse_json(what: &str, text: &str) -> CliResult<serde_json::Value> {
    serde_json::from_str(text)
        .map_err(|err| CliError::new(DATA_INVALID, format!("{what} is not valid JSON: {err}")))
}
