use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;

use crate::field::{FieldSet, PathExistence, PathPermission, PathType, ValueKind};
use crate::path::PathProbe;

/// One node of a value-acceptance rule tree.
///
/// Composite rules own their children; the tree is immutable once built and
/// may be shared read-only across threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueValidator {
    /// Accepts everything.
    Dummy,
    /// Accepts values whose kind is flagged.
    Types(ValueKind),
    /// Accepts strings from a fixed set.
    Options(BTreeSet<String>),
    /// Accepts strings starting with one of the prefixes.
    StringPrefix(BTreeSet<String>),
    /// Accepts strings ending with one of the suffixes.
    StringSuffix(BTreeSet<String>),
    /// Accepts strings naming a path in the required state.
    Path(PathRule),
    /// Accepts when any child accepts.
    Any(Vec<ValueValidator>),
    /// Accepts when every child accepts.
    All(Vec<ValueValidator>),
    /// Accepts arrays whose every element the child accepts.
    ListItem(Box<ValueValidator>),
}

/// Constraints of a `path` rule.
///
/// Defaults place no constraint: existence undefined, permissions within
/// `[empty, all]`, type within `[empty, all]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRule {
    pub existence: PathExistence,
    pub min_perm: PathPermission,
    pub max_perm: PathPermission,
    pub min_type: PathType,
    pub max_type: PathType,
}

impl Default for PathRule {
    fn default() -> Self {
        Self {
            existence: PathExistence::empty(),
            min_perm: PathPermission::empty(),
            max_perm: PathPermission::all(),
            min_type: PathType::empty(),
            max_type: PathType::all(),
        }
    }
}

impl PathRule {
    /// Rule without constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require the path to exist.
    pub fn existing(mut self) -> Self {
        self.existence = PathExistence::EXIST;
        self
    }

    /// Require the path not to exist.
    pub fn missing(mut self) -> Self {
        self.existence = PathExistence::NONEXIST;
        self
    }

    /// Constrain the permissions to `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `min` has a bit outside `max`.
    pub fn with_permissions(mut self, min: PathPermission, max: PathPermission) -> Self {
        assert_range("permission", min, max);
        self.min_perm = min;
        self.max_perm = max;
        self
    }

    /// Constrain the path type to `[min, max]`.
    ///
    /// # Panics
    ///
    /// Panics if `min` has a bit outside `max`.
    pub fn with_types(mut self, min: PathType, max: PathType) -> Self {
        assert_range("type", min, max);
        self.min_type = min;
        self.max_type = max;
        self
    }

    /// True when the existence requirement is a real constraint.
    pub(crate) fn constrains_existence(&self) -> bool {
        self.existence == PathExistence::EXIST || self.existence == PathExistence::NONEXIST
    }

    /// Check `path` against the live filesystem.
    pub fn check(&self, path: &Path) -> bool {
        self.accepts(&PathProbe::of(path))
    }

    pub(crate) fn accepts(&self, probe: &PathProbe) -> bool {
        if self.constrains_existence() {
            let observed = if probe.exists {
                PathExistence::EXIST
            } else {
                PathExistence::NONEXIST
            };
            if observed != self.existence {
                return false;
            }
        }
        probe.permissions.between(self.min_perm, self.max_perm)
            && probe.kind.between(self.min_type, self.max_type)
    }
}

fn assert_range<F: FieldSet>(field: &str, min: F, max: F) {
    assert!(max.contains(min), "{field} range minimum is not within its maximum");
}

fn non_empty_set(kind: &str, items: BTreeSet<String>) -> BTreeSet<String> {
    assert!(!items.is_empty(), "`{kind}` rule needs at least one entry");
    items
}

impl ValueValidator {
    /// Rule accepting any of `kinds`.
    ///
    /// # Panics
    ///
    /// Panics if `kinds` is empty.
    pub fn types(kinds: ValueKind) -> Self {
        assert!(!kinds.is_empty(), "`types` rule needs at least one kind");
        Self::Types(kinds)
    }

    /// Rule accepting exactly one kind.
    ///
    /// # Panics
    ///
    /// Panics unless `kind` has exactly one bit set.
    pub fn single_type(kind: ValueKind) -> Self {
        assert!(
            kind.is_single(),
            "single_type requires exactly one kind, got {:#x}",
            kind.bits()
        );
        Self::Types(kind)
    }

    /// Rule accepting the listed strings.
    ///
    /// # Panics
    ///
    /// Panics if `options` yields nothing; the same holds for [`prefix`] and
    /// [`suffix`].
    ///
    /// [`prefix`]: Self::prefix
    /// [`suffix`]: Self::suffix
    pub fn options<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        Self::Options(non_empty_set("options", options))
    }

    /// Rule accepting strings with one of the prefixes.
    pub fn prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes.into_iter().map(Into::into).collect();
        Self::StringPrefix(non_empty_set("prefix", prefixes))
    }

    /// Rule accepting strings with one of the suffixes.
    pub fn suffix<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffixes = suffixes.into_iter().map(Into::into).collect();
        Self::StringSuffix(non_empty_set("suffix", suffixes))
    }

    pub fn path(rule: PathRule) -> Self {
        Self::Path(rule)
    }

    /// # Panics
    ///
    /// Panics if `children` is empty.
    pub fn any(children: Vec<ValueValidator>) -> Self {
        assert!(!children.is_empty(), "`any` rule needs at least one child");
        Self::Any(children)
    }

    /// # Panics
    ///
    /// Panics if `children` is empty.
    pub fn all(children: Vec<ValueValidator>) -> Self {
        assert!(!children.is_empty(), "`all` rule needs at least one child");
        Self::All(children)
    }

    pub fn list_item(item: ValueValidator) -> Self {
        Self::ListItem(Box::new(item))
    }

    /// Wire key identifying this rule kind.
    pub fn kind_key(&self) -> &'static str {
        match self {
            Self::Dummy => "dummy",
            Self::Types(_) => "types",
            Self::Options(_) => "options",
            Self::StringPrefix(_) => "prefix",
            Self::StringSuffix(_) => "suffix",
            Self::Path(_) => "path",
            Self::Any(_) => "any",
            Self::All(_) => "all",
            Self::ListItem(_) => "list",
        }
    }

    /// Decide whether `value` is acceptable.
    ///
    /// Pure except for `Path`, which queries the filesystem.
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            Self::Dummy => true,
            Self::Types(kinds) => kinds.intersects(ValueKind::of(value)),
            Self::Options(options) => value.as_str().is_some_and(|s| options.contains(s)),
            Self::StringPrefix(prefixes) => value
                .as_str()
                .is_some_and(|s| prefixes.iter().any(|prefix| s.starts_with(prefix.as_str()))),
            Self::StringSuffix(suffixes) => value
                .as_str()
                .is_some_and(|s| suffixes.iter().any(|suffix| s.ends_with(suffix.as_str()))),
            Self::Path(rule) => value.as_str().is_some_and(|s| rule.check(Path::new(s))),
            Self::Any(children) => children.iter().any(|child| child.validate(value)),
            Self::All(children) => children.iter().all(|child| child.validate(value)),
            Self::ListItem(item) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|element| item.validate(element))),
        }
    }
}
