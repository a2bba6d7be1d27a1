/// What the decoder does with a malformed child or set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildPolicy {
    /// Fail the enclosing rule.
    #[default]
    Reject,
    /// Log and drop the entry. An enclosing rule left empty still fails.
    /// `list` children are never skipped.
    Skip,
}

/// Controls rule decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeConfig {
    /// Handling of malformed children of `any`/`all` and entries of set kinds.
    pub child_policy: ChildPolicy,
    /// Maximum nesting of composite rules.
    pub max_depth: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            child_policy: ChildPolicy::Reject,
            max_depth: 32,
        }
    }
}

impl DecodeConfig {
    pub fn with_child_policy(mut self, policy: ChildPolicy) -> Self {
        self.child_policy = policy;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}
