//! Composable value-acceptance rules.
//!
//! A [`ValueValidator`] is a small rule tree that decides whether a JSON value
//! is acceptable. Rules travel as single-key JSON objects (`{"types": [...]}`,
//! `{"any": [...]}`, ...) and round-trip through [`ValueValidator::to_json`]
//! and [`ValueValidator::from_json`].
//!
//! ```
//! use serde_json::json;
//! use sideassist_validator::{ValueKind, ValueValidator};
//!
//! let rule = ValueValidator::decode(&json!({"types": ["Null", "Integer"]})).unwrap();
//! assert!(rule.validate(&json!(42)));
//! assert!(!rule.validate(&json!("42")));
//! assert_eq!(rule, ValueValidator::types(ValueKind::NULL | ValueKind::INTEGER));
//! ```

pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod field;
pub mod path;
pub mod validator;

pub use config::{ChildPolicy, DecodeConfig};
pub use error::{DecodeError, Result};
pub use field::{is_integral, FieldSet, PathExistence, PathPermission, PathType, ValueKind};
pub use path::PathProbe;
pub use validator::{PathRule, ValueValidator};
