use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::error::{ClientError, Result};
use crate::named_value::NamedValue;

/// Which side owns a value: options are set remotely, parameters are
/// reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueRole {
    Option,
    Parameter,
}

impl ValueRole {
    /// Topic level naming the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Option => "option",
            Self::Parameter => "parameter",
        }
    }
}

impl fmt::Display for ValueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that `name` can be used as one topic level.
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.contains('/') {
        "contains '/'"
    } else if name.contains(['+', '#']) {
        "contains a wildcard"
    } else if name.contains('\0') {
        "contains NUL"
    } else {
        return Ok(());
    };
    Err(ClientError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

/// Named values of one role, keyed by name.
pub struct ValueRegistry {
    role: ValueRole,
    values: RwLock<BTreeMap<String, Arc<NamedValue>>>,
}

impl ValueRegistry {
    pub fn new(role: ValueRole) -> Self {
        Self {
            role,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn role(&self) -> ValueRole {
        self.role
    }

    /// Create a new, undefined value.
    ///
    /// Fails with `AlreadyExists` if the name is taken; the registry is left
    /// unchanged.
    pub fn add(&self, name: &str) -> Result<Arc<NamedValue>> {
        validate_name(name)?;
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        if values.contains_key(name) {
            warn!(role = %self.role, %name, "value already exists");
            return Err(ClientError::AlreadyExists {
                role: self.role,
                name: name.to_string(),
            });
        }
        let value = Arc::new(NamedValue::new(name));
        values.insert(name.to_string(), Arc::clone(&value));
        info!(role = %self.role, %name, "created value");
        Ok(value)
    }

    pub fn get(&self, name: &str) -> Option<Arc<NamedValue>> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Existing value or a freshly created one.
    pub fn get_or_add(&self, name: &str) -> Result<Arc<NamedValue>> {
        match self.get(name) {
            Some(value) => Ok(value),
            None => match self.add(name) {
                Err(ClientError::AlreadyExists { .. }) => {
                    self.get(name).ok_or_else(|| ClientError::InvalidName {
                        name: name.to_string(),
                        reason: "removed while being created",
                    })
                }
                other => other,
            },
        }
    }

    /// Names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every value, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = Arc<NamedValue>> {
        let snapshot: Vec<Arc<NamedValue>> = self
            .values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        snapshot.into_iter()
    }

    pub fn len(&self) -> usize {
        self.values.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ValueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueRegistry")
            .field("role", &self.role)
            .field("names", &self.names())
            .finish()
    }
}
