//! Topic names and subscription filters.
//!
//! Levels are separated by `/`. A filter may use `+` for exactly one whole
//! level and `#` as the whole last level, matching the parent level and
//! everything below it.

use crate::error::{BusError, Result};

/// Longest topic or filter accepted, in bytes.
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

fn invalid(topic: &str, reason: &'static str) -> BusError {
    BusError::InvalidTopic {
        topic: topic.to_string(),
        reason,
    }
}

fn check_common(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(invalid(topic, "empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid(topic, "longer than 65535 bytes"));
    }
    if topic.contains('\0') {
        return Err(invalid(topic, "contains NUL"));
    }
    Ok(())
}

/// Check a concrete topic name (publish target).
pub fn validate_topic(topic: &str) -> Result<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(invalid(topic, "wildcards are not allowed in topic names"));
    }
    Ok(())
}

/// Check a subscription filter.
pub fn validate_filter(filter: &str) -> Result<()> {
    check_common(filter)?;
    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        match level {
            "#" if levels.peek().is_some() => {
                return Err(invalid(filter, "'#' must be the last level"))
            }
            "#" | "+" => {}
            _ if level.contains(['+', '#']) => {
                return Err(invalid(filter, "wildcards must occupy a whole level"))
            }
            _ => {}
        }
    }
    Ok(())
}

/// True when `topic` is selected by `filter`.
///
/// Both are assumed valid; see [`validate_topic`] and [`validate_filter`].
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
