//! Canonical JSON encoding of rules.
//!
//! Every rule encodes to a single-key object keyed by its kind. String sets
//! come out sorted, and `path` sub-keys are omitted at their defaults.

use std::collections::BTreeSet;

use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::field::{PathExistence, PathPermission, PathType};
use crate::validator::{PathRule, ValueValidator};

impl ValueValidator {
    /// Canonical wire form of this rule.
    pub fn to_json(&self) -> Value {
        let body = match self {
            Self::Dummy => Value::Null,
            Self::Types(kinds) => kinds.names().map(Value::from).collect(),
            Self::Options(set) | Self::StringPrefix(set) | Self::StringSuffix(set) => {
                string_set(set)
            }
            Self::Path(rule) => path_body(rule),
            Self::Any(children) | Self::All(children) => {
                children.iter().map(ValueValidator::to_json).collect()
            }
            Self::ListItem(item) => item.to_json(),
        };

        let mut object = Map::with_capacity(1);
        object.insert(self.kind_key().to_string(), body);
        Value::Object(object)
    }
}

fn string_set(set: &BTreeSet<String>) -> Value {
    set.iter().map(|s| Value::String(s.clone())).collect()
}

fn path_body(rule: &PathRule) -> Value {
    let mut body = Map::new();
    if rule.constrains_existence() {
        body.insert(
            "existance".to_string(),
            Value::Bool(rule.existence == PathExistence::EXIST),
        );
    }
    if rule.min_perm != PathPermission::empty() || rule.max_perm != PathPermission::all() {
        body.insert(
            "perm".to_string(),
            json!([rule.min_perm.bits(), rule.max_perm.bits()]),
        );
    }
    if rule.min_type != PathType::empty() || rule.max_type != PathType::all() {
        body.insert(
            "type".to_string(),
            json!([rule.min_type.bits(), rule.max_type.bits()]),
        );
    }
    Value::Object(body)
}

impl Serialize for ValueValidator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::field::ValueKind;

    #[test]
    fn scalar_kinds() {
        assert_eq!(ValueValidator::Dummy.to_json(), json!({"dummy": null}));
        assert_eq!(
            ValueValidator::types(ValueKind::OBJECT | ValueKind::NULL | ValueKind::INTEGER)
                .to_json(),
            json!({"types": ["Null", "Integer", "Object"]})
        );
        assert_eq!(
            ValueValidator::options(["Two", "One", "Three"]).to_json(),
            json!({"options": ["One", "Three", "Two"]})
        );
    }

    #[test]
    fn prefix_and_suffix_encode_their_sets() {
        assert_eq!(
            ValueValidator::prefix(["b", "a"]).to_json(),
            json!({"prefix": ["a", "b"]})
        );
        assert_eq!(
            ValueValidator::suffix([".png"]).to_json(),
            json!({"suffix": [".png"]})
        );
    }

    #[test]
    fn path_omits_defaults() {
        assert_eq!(
            ValueValidator::path(PathRule::new()).to_json(),
            json!({"path": {}})
        );
        assert_eq!(
            ValueValidator::path(
                PathRule::new()
                    .existing()
                    .with_types(PathType::FILE, PathType::FILE)
                    .with_permissions(PathPermission::empty(), PathPermission::READABLE)
            )
            .to_json(),
            json!({"path": {"existance": true, "perm": [0, 2], "type": [1, 1]}})
        );
        assert_eq!(
            ValueValidator::path(PathRule::new().missing()).to_json(),
            json!({"path": {"existance": false}})
        );
    }

    #[test]
    fn composites_nest() {
        let rule = ValueValidator::any(vec![
            ValueValidator::Dummy,
            ValueValidator::all(vec![ValueValidator::list_item(
                ValueValidator::single_type(ValueKind::STRING),
            )]),
        ]);
        assert_eq!(
            rule.to_json(),
            json!({"any": [{"dummy": null}, {"all": [{"list": {"types": ["String"]}}]}]})
        );
    }

    #[test]
    fn serde_serialize_matches_to_json() {
        let rule = ValueValidator::options(["a"]);
        assert_eq!(serde_json::to_value(&rule).unwrap(), rule.to_json());
        assert_eq!(
            serde_json::to_string(&rule).unwrap(),
            r#"{"options":["a"]}"#
        );
    }
}
