use std::fmt;
use std::io;

use sideassist_bus::BusError;
use sideassist_client::ClientError;
use sideassist_validator::DecodeError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn bus_error(context: &str, err: BusError) -> CliError {
    match err {
        BusError::Io(source) => io_error(context, source),
        BusError::Bind { path, source } | BusError::Connect { path, source } => {
            io_error(&format!("{context} ({})", path.display()), source)
        }
        BusError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        BusError::Rejected(_) => CliError::new(PERMISSION_DENIED, format!("{context}: {err}")),
        BusError::InvalidTopic { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        BusError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        BusError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    match err {
        ClientError::Bus(err) => bus_error(context, err),
        ClientError::InvalidName { .. } | ClientError::AlreadyExists { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        ClientError::Rejected { .. } | ClientError::Json(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        ClientError::NotConnected => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
    }
}

pub fn decode_error(context: &str, err: DecodeError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn bus_errors_map_to_exit_codes() {
        let timeout = bus_error("connect", BusError::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.code, TIMEOUT);

        let rejected = bus_error("connect", BusError::Rejected("bad credentials".into()));
        assert_eq!(rejected.code, PERMISSION_DENIED);
        assert!(rejected.message.starts_with("connect: "));

        let refused = bus_error(
            "connect",
            BusError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)),
        );
        assert_eq!(refused.code, TRANSPORT_ERROR);
    }

    #[test]
    fn client_errors_unwrap_bus_errors() {
        let err = client_error(
            "connect",
            ClientError::Bus(BusError::Disconnected("closed".into())),
        );
        assert_eq!(err.code, FAILURE);

        let err = client_error(
            "option",
            ClientError::InvalidName {
                name: "a/b".into(),
                reason: "contains '/'",
            },
        );
        assert_eq!(err.code, USAGE);
    }
}
