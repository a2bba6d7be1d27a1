//! A named JSON value guarded by an optional validator.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use sideassist_validator::ValueValidator;

use crate::error::{ClientError, Result};

/// Change notification delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueEvent {
    ValueChanged(Value),
    ValidatorChanged(Option<Arc<ValueValidator>>),
}

type Listener = Arc<dyn Fn(&NamedValue, &ValueEvent) + Send + Sync>;

#[derive(Default)]
struct State {
    value: Option<Value>,
    validator: Option<Arc<ValueValidator>>,
}

/// A named value. The name never changes; value and validator can be
/// replaced any number of times.
///
/// A value is only committed when the current validator accepts it.
/// Listeners run on the mutating thread after the internal lock has been
/// released, so they may freely read or mutate this or other values.
pub struct NamedValue {
    name: String,
    state: RwLock<State>,
    listeners: RwLock<Vec<Listener>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl NamedValue {
    /// New value with neither a value nor a validator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State::default()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value, `None` while undefined.
    pub fn value(&self) -> Option<Value> {
        read(&self.state).value.clone()
    }

    pub fn validator(&self) -> Option<Arc<ValueValidator>> {
        read(&self.state).validator.clone()
    }

    /// True when the current validator accepts `value`, or there is none.
    pub fn validate(&self, value: &Value) -> bool {
        read(&self.state)
            .validator
            .as_ref()
            .is_none_or(|validator| validator.validate(value))
    }

    /// Commit `value` if the validator accepts it.
    ///
    /// Returns `Ok(false)` without notifying when the value is unchanged.
    pub fn set_value(&self, value: Value) -> Result<bool> {
        {
            let mut state = write(&self.state);
            if state.value.as_ref() == Some(&value) {
                return Ok(false);
            }
            if let Some(validator) = &state.validator {
                if !validator.validate(&value) {
                    return Err(ClientError::Rejected {
                        name: self.name.clone(),
                        value: value.to_string(),
                    });
                }
            }
            state.value = Some(value.clone());
        }
        self.notify(&ValueEvent::ValueChanged(value));
        Ok(true)
    }

    /// Replace the validator. The current value is kept as is.
    pub fn set_validator(&self, validator: Option<ValueValidator>) {
        let validator = validator.map(Arc::new);
        write(&self.state).validator = validator.clone();
        self.notify(&ValueEvent::ValidatorChanged(validator));
    }

    /// Register a change listener.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&NamedValue, &ValueEvent) + Send + Sync + 'static,
    {
        write(&self.listeners).push(Arc::new(listener));
    }

    fn notify(&self, event: &ValueEvent) {
        let listeners: Vec<Listener> = read(&self.listeners).clone();
        for listener in listeners {
            listener(self, event);
        }
    }
}

impl fmt::Debug for NamedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = read(&self.state);
        f.debug_struct("NamedValue")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("validator", &state.validator)
            .field("listeners", &read(&self.listeners).len())
            .finish()
    }
}
