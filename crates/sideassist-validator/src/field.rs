//! Bitmask field sets.
//!
//! Every rule parameter that is "a set of flags" is a [`bitflags`] type. The
//! empty set doubles as the "undefined"/"none" member and `all()` as the
//! "all" member. [`FieldSet`] adds the range test used by path rules.

use bitflags::{bitflags, Flags};
use serde_json::Value;

/// Range algebra shared by every field set.
pub trait FieldSet: Flags + Copy {
    /// True when `self` holds every bit of `lower` and no bit outside `upper`.
    fn between(self, lower: Self, upper: Self) -> bool {
        self.contains(lower) && upper.contains(self)
    }
}

impl<T: Flags + Copy> FieldSet for T {}

bitflags! {
    /// JSON value kinds accepted by a `types` rule.
    ///
    /// `INTEGER` is not a separate JSON kind: it is derived from the number,
    /// see [`is_integral`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ValueKind: u32 {
        const NULL = 0x01;
        const BOOL = 0x02;
        const INTEGER = 0x04;
        const DOUBLE = 0x08;
        const STRING = 0x10;
        const ARRAY = 0x20;
        const OBJECT = 0x40;
    }
}

bitflags! {
    /// Required existence of a path. Empty means "don't care".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PathExistence: u32 {
        const NONEXIST = 0x01;
        const EXIST = 0x02;
    }
}

bitflags! {
    /// Access rights of a path for the current process.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PathPermission: u32 {
        const EXECUTABLE = 0x01;
        const READABLE = 0x02;
        const WRITABLE = 0x04;
    }
}

bitflags! {
    /// Filesystem object type of a path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PathType: u32 {
        const FILE = 0x01;
        const DIR = 0x02;
    }
}

/// Wire names of the value kinds, in bit order.
const KIND_NAMES: [(ValueKind, &str); 7] = [
    (ValueKind::NULL, "Null"),
    (ValueKind::BOOL, "Bool"),
    (ValueKind::INTEGER, "Integer"),
    (ValueKind::DOUBLE, "Double"),
    (ValueKind::STRING, "String"),
    (ValueKind::ARRAY, "Array"),
    (ValueKind::OBJECT, "Object"),
];

impl ValueKind {
    /// Every kind `value` satisfies.
    ///
    /// Numbers are always `DOUBLE`; integral numbers are `INTEGER` as well.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::NULL,
            Value::Bool(_) => Self::BOOL,
            Value::Number(_) if is_integral(value) => Self::INTEGER | Self::DOUBLE,
            Value::Number(_) => Self::DOUBLE,
            Value::String(_) => Self::STRING,
            Value::Array(_) => Self::ARRAY,
            Value::Object(_) => Self::OBJECT,
        }
    }

    /// Wire name of a single kind, `None` for empty or multi-bit sets.
    pub fn name(self) -> Option<&'static str> {
        KIND_NAMES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, name)| *name)
    }

    /// Parse a wire name. Names are case-sensitive.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        KIND_NAMES
            .iter()
            .find(|(_, candidate)| *candidate == name)
            .map(|(kind, _)| *kind)
    }

    /// Wire names of every flagged kind, in bit order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        KIND_NAMES
            .into_iter()
            .filter(move |(kind, _)| self.contains(*kind))
            .map(|(_, name)| name)
    }

    /// True when exactly one kind is flagged.
    pub fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }
}

/// True when `value` is a number exactly representable as an `i64`.
pub fn is_integral(value: &Value) -> bool {
    const LOWER: f64 = -9_223_372_036_854_775_808.0;
    const UPPER: f64 = 9_223_372_036_854_775_808.0;

    let Value::Number(number) = value else {
        return false;
    };
    if number.is_i64() {
        return true;
    }
    if number.is_u64() {
        // Above i64::MAX.
        return false;
    }
    number
        .as_f64()
        .is_some_and(|f| f.fract() == 0.0 && (LOWER..UPPER).contains(&f))
}
