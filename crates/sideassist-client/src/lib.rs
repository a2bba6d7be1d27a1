//! Named, validated options and parameters shared over the SideAssist bus.
//!
//! A [`Client`] owns two registries of [`NamedValue`]s. Options can be set
//! remotely through `<root>/<id>/option/<name>/set`; parameters are only
//! reported. Every value and validator is mirrored as a retained message so
//! other processes, and the next session of the same client, can see it.
//!
//! ```no_run
//! use sideassist_client::{Client, ClientConfig, ValueEvent};
//! use serde_json::json;
//!
//! # fn main() -> sideassist_client::Result<()> {
//! let client = Client::new(ClientConfig::new("echo"));
//! let opt = client.add_option("opt")?;
//! let param = client.add_parameter("param")?;
//! opt.subscribe(move |_, event| {
//!     if let ValueEvent::ValueChanged(value) = event {
//!         let _ = param.set_value(value.clone());
//!     }
//! });
//! opt.set_value(json!(123))?;
//! client.connect("/tmp/sideassist.sock")?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod named_value;
pub mod registry;
pub mod topics;

pub use client::{excerpt, Client};
pub use config::{ClientConfig, DEFAULT_LOG_PAYLOAD_LIMIT, DEFAULT_TOPIC_ROOT};
pub use error::{ClientError, Result};
pub use named_value::{NamedValue, ValueEvent};
pub use registry::{validate_name, ValueRegistry, ValueRole};
pub use topics::{Incoming, TopicLayout};
