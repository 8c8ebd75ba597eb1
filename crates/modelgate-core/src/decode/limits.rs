//! Resource ceilings for the restricted decoder.

use serde::Deserialize;

/// Ceilings applied while decoding a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_input_bytes: u64,
    pub max_stack_depth: usize,
    pub max_memo_entries: usize,
    pub max_nesting_depth: usize,
    pub max_output_nodes: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: 1024 * 1024 * 1024, // 1 GB
            max_stack_depth: 100_000,
            max_memo_entries: 1_000_000,
            max_nesting_depth: 256,
            max_output_nodes: 10_000_000,
        }
    }
}

/// Partial overrides for `DecodeLimits`. Used for config file parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecodeLimitsOverrides {
    pub max_input_bytes: Option<u64>,
    pub max_stack_depth: Option<usize>,
    pub max_memo_entries: Option<usize>,
    pub max_nesting_depth: Option<usize>,
    pub max_output_nodes: Option<usize>,
}

impl DecodeLimits {
    /// Apply overrides onto these limits. Only `Some` values override.
    pub fn apply(self, overrides: &DecodeLimitsOverrides) -> Self {
        Self {
            max_input_bytes: overrides.max_input_bytes.unwrap_or(self.max_input_bytes),
            max_stack_depth: overrides.max_stack_depth.unwrap_or(self.max_stack_depth),
            max_memo_entries: overrides.max_memo_entries.unwrap_or(self.max_memo_entries),
            max_nesting_depth: overrides
                .max_nesting_depth
                .unwrap_or(self.max_nesting_depth),
            max_output_nodes: overrides.max_output_nodes.unwrap_or(self.max_output_nodes),
        }
    }
}
