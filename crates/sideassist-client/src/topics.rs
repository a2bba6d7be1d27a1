//! Topic names used by one client.

use crate::registry::ValueRole;

const SET: &str = "set";
const VALIDATOR: &str = "validator";

/// Classification of a topic seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming<'a> {
    /// `<root>/<id>/option/<name>`
    OptionValue(&'a str),
    /// `<root>/<id>/option/<name>/set`
    OptionSet(&'a str),
    /// `<root>/<id>/<role>/<name>/validator`
    Validator(ValueRole, &'a str),
    /// Outside `<root>/<id>/`.
    Foreign,
    /// Below the client prefix but not understood.
    Other,
}

/// Builds and parses `<root>/<client-id>/...` topics.
#[derive(Debug, Clone)]
pub struct TopicLayout {
    prefix: String,
}

impl TopicLayout {
    pub fn new(root: &str, client_id: &str) -> Self {
        Self {
            prefix: format!("{root}/{client_id}/"),
        }
    }

    /// `<root>/<id>/` including the trailing separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn value(&self, role: ValueRole, name: &str) -> String {
        format!("{}{}/{}", self.prefix, role, name)
    }

    pub fn validator(&self, role: ValueRole, name: &str) -> String {
        format!("{}{}/{}/{VALIDATOR}", self.prefix, role, name)
    }

    pub fn set_request(&self, name: &str) -> String {
        format!("{}{}/{}/{SET}", self.prefix, ValueRole::Option, name)
    }

    /// Filter covering every option topic of this client.
    pub fn option_filter(&self) -> String {
        format!("{}{}/#", self.prefix, ValueRole::Option)
    }

    pub fn parse<'a>(&self, topic: &'a str) -> Incoming<'a> {
        let Some(rest) = topic.strip_prefix(self.prefix.as_str()) else {
            return Incoming::Foreign;
        };
        let levels: Vec<&str> = rest.split('/').collect();
        let role = match levels.first() {
            Some(&"option") => ValueRole::Option,
            Some(&"parameter") => ValueRole::Parameter,
            _ => return Incoming::Other,
        };
        match (role, levels.as_slice()) {
            (_, [_, name, ..]) if name.is_empty() => Incoming::Other,
            (ValueRole::Option, &[_, name]) => Incoming::OptionValue(name),
            (ValueRole::Option, &[_, name, SET]) => Incoming::OptionSet(name),
            (role, &[_, name, VALIDATOR]) => Incoming::Validator(role, name),
            _ => Incoming::Other,
        }
    }
}
