//! Decoding of wire rules.
//!
//! Kinds are probed in a fixed order. A kind matches when its key is present
//! with the expected JSON shape; the first match decides, and malformed
//! contents of a matched kind fail the decode without probing further.

use std::collections::BTreeSet;
use std::str::FromStr;

use bitflags::Flags;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{ChildPolicy, DecodeConfig};
use crate::error::{DecodeError, Result};
use crate::field::{PathPermission, PathType, ValueKind};
use crate::validator::{PathRule, ValueValidator};

type DecodeFn = fn(&Decoder, &Value, usize) -> Result<ValueValidator>;

struct KindEntry {
    key: &'static str,
    shape: fn(&Value) -> bool,
    decode: DecodeFn,
}

/// Probe order of the rule kinds.
const KINDS: [KindEntry; 9] = [
    KindEntry {
        key: "dummy",
        shape: Value::is_null,
        decode: Decoder::dummy,
    },
    KindEntry {
        key: "types",
        shape: |v| v.is_array() || v.is_string(),
        decode: Decoder::types,
    },
    KindEntry {
        key: "path",
        shape: Value::is_object,
        decode: Decoder::path,
    },
    KindEntry {
        key: "options",
        shape: Value::is_array,
        decode: Decoder::options,
    },
    KindEntry {
        key: "prefix",
        shape: Value::is_array,
        decode: Decoder::prefix,
    },
    KindEntry {
        key: "suffix",
        shape: Value::is_array,
        decode: Decoder::suffix,
    },
    KindEntry {
        key: "any",
        shape: Value::is_array,
        decode: Decoder::any,
    },
    KindEntry {
        key: "all",
        shape: Value::is_array,
        decode: Decoder::all,
    },
    KindEntry {
        key: "list",
        shape: |_| true,
        decode: Decoder::list,
    },
];

struct Decoder {
    config: DecodeConfig,
}

impl Decoder {
    fn decode_at(&self, value: &Value, depth: usize) -> Result<ValueValidator> {
        if depth > self.config.max_depth {
            return Err(DecodeError::TooDeep {
                max: self.config.max_depth,
            });
        }
        let object = value
            .as_object()
            .ok_or(DecodeError::NotAnObject(json_type(value)))?;

        for entry in &KINDS {
            match object.get(entry.key) {
                Some(body) if (entry.shape)(body) => return (entry.decode)(self, body, depth),
                _ => continue,
            }
        }
        Err(DecodeError::UnknownKind(key_list(object)))
    }

    fn dummy(&self, _body: &Value, _depth: usize) -> Result<ValueValidator> {
        Ok(ValueValidator::Dummy)
    }

    fn types(&self, body: &Value, _depth: usize) -> Result<ValueValidator> {
        if let Some(name) = body.as_str() {
            return ValueKind::from_wire_name(name)
                .map(ValueValidator::Types)
                .ok_or_else(|| invalid_item("types", body));
        }

        let mut kinds = ValueKind::empty();
        for item in body.as_array().into_iter().flatten() {
            match item.as_str().and_then(ValueKind::from_wire_name) {
                Some(kind) => kinds |= kind,
                None => self.bad_entry("types", item)?,
            }
        }
        if kinds.is_empty() {
            return Err(DecodeError::Empty { kind: "types" });
        }
        Ok(ValueValidator::Types(kinds))
    }

    fn options(&self, body: &Value, _depth: usize) -> Result<ValueValidator> {
        self.string_set("options", body).map(ValueValidator::Options)
    }

    fn prefix(&self, body: &Value, _depth: usize) -> Result<ValueValidator> {
        self.string_set("prefix", body)
            .map(ValueValidator::StringPrefix)
    }

    fn suffix(&self, body: &Value, _depth: usize) -> Result<ValueValidator> {
        self.string_set("suffix", body)
            .map(ValueValidator::StringSuffix)
    }

    fn path(&self, body: &Value, _depth: usize) -> Result<ValueValidator> {
        let mut rule = PathRule::new();
        let Some(fields) = body.as_object() else {
            return Ok(ValueValidator::Path(rule));
        };

        if let Some(existence) = fields.get("existance") {
            let must_exist = existence.as_bool().ok_or(DecodeError::InvalidField {
                field: "existance",
                expected: "a boolean",
            })?;
            rule = if must_exist {
                rule.existing()
            } else {
                rule.missing()
            };
        }
        if let Some(perm) = fields.get("perm") {
            let (min, max) = range::<PathPermission>("perm", perm)?;
            rule = rule.with_permissions(min, max);
        }
        if let Some(kind) = fields.get("type") {
            let (min, max) = range::<PathType>("type", kind)?;
            rule = rule.with_types(min, max);
        }
        Ok(ValueValidator::Path(rule))
    }

    fn any(&self, body: &Value, depth: usize) -> Result<ValueValidator> {
        self.children("any", body, depth).map(ValueValidator::Any)
    }

    fn all(&self, body: &Value, depth: usize) -> Result<ValueValidator> {
        self.children("all", body, depth).map(ValueValidator::All)
    }

    fn list(&self, body: &Value, depth: usize) -> Result<ValueValidator> {
        match self.decode_at(body, depth + 1) {
            Ok(item) => Ok(ValueValidator::list_item(item)),
            Err(err @ DecodeError::TooDeep { .. }) => Err(err),
            Err(source) => Err(DecodeError::InvalidChild {
                kind: "list",
                source: Box::new(source),
            }),
        }
    }

    fn string_set(&self, kind: &'static str, body: &Value) -> Result<BTreeSet<String>> {
        let mut set = BTreeSet::new();
        for item in body.as_array().into_iter().flatten() {
            match item.as_str() {
                Some(s) => {
                    set.insert(s.to_string());
                }
                None => self.bad_entry(kind, item)?,
            }
        }
        if set.is_empty() {
            return Err(DecodeError::Empty { kind });
        }
        Ok(set)
    }

    fn children(
        &self,
        kind: &'static str,
        body: &Value,
        depth: usize,
    ) -> Result<Vec<ValueValidator>> {
        let mut children = Vec::new();
        for child in body.as_array().into_iter().flatten() {
            match self.decode_at(child, depth + 1) {
                Ok(rule) => children.push(rule),
                Err(err @ DecodeError::TooDeep { .. }) => return Err(err),
                Err(err) => match self.config.child_policy {
                    ChildPolicy::Reject => {
                        return Err(DecodeError::InvalidChild {
                            kind,
                            source: Box::new(err),
                        })
                    }
                    ChildPolicy::Skip => {
                        warn!(kind, error = %err, "skipping invalid child rule");
                    }
                },
            }
        }
        if children.is_empty() {
            return Err(DecodeError::Empty { kind });
        }
        Ok(children)
    }

    fn bad_entry(&self, kind: &'static str, item: &Value) -> Result<()> {
        match self.config.child_policy {
            ChildPolicy::Reject => Err(invalid_item(kind, item)),
            ChildPolicy::Skip => {
                warn!(kind, item = %item, "skipping invalid rule entry");
                Ok(())
            }
        }
    }
}

fn range<F>(field: &'static str, value: &Value) -> Result<(F, F)>
where
    F: Flags<Bits = u32> + Copy,
{
    let bounds = match value.as_array() {
        Some(bounds) if bounds.len() == 2 => bounds,
        _ => {
            return Err(DecodeError::InvalidRange {
                field,
                reason: format!("expected [min, max], got {value}"),
            })
        }
    };

    let bound = |raw: &Value| -> Result<F> {
        raw.as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .and_then(F::from_bits)
            .ok_or_else(|| DecodeError::InvalidRange {
                field,
                reason: format!("{raw} is not a valid set"),
            })
    };
    let min = bound(&bounds[0])?;
    let max = bound(&bounds[1])?;
    if !max.contains(min) {
        return Err(DecodeError::InvalidRange {
            field,
            reason: format!("min {:#x} is not within max {:#x}", min.bits(), max.bits()),
        });
    }
    Ok((min, max))
}

fn invalid_item(kind: &'static str, item: &Value) -> DecodeError {
    DecodeError::InvalidItem {
        kind,
        item: item.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn key_list(object: &Map<String, Value>) -> String {
    object.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl ValueValidator {
    /// Decode a wire rule with the default [`DecodeConfig`].
    pub fn from_json(value: &Value) -> Result<Self> {
        Self::from_json_with_config(value, &DecodeConfig::default())
    }

    /// Decode a wire rule with explicit config.
    pub fn from_json_with_config(value: &Value, config: &DecodeConfig) -> Result<Self> {
        let decoder = Decoder { config: *config };
        decoder.decode_at(value, 1)
    }

    /// Decode a wire rule, logging and discarding the failure reason.
    pub fn decode(value: &Value) -> Option<Self> {
        match Self::from_json(value) {
            Ok(rule) => Some(rule),
            Err(err) => {
                warn!(error = %err, "discarding undecodable rule");
                debug!(rule = %value, "undecodable rule body");
                None
            }
        }
    }
}

impl FromStr for ValueValidator {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_json(&value)
    }
}

impl<'de> Deserialize<'de> for ValueValidator {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}
