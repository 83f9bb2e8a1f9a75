use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Default upper bound on the size of a compiled byte-level DFA (10 MiB).
pub const DEFAULT_DFA_SIZE_LIMIT: usize = 10 * 1024 * 1024;
/// Default upper bound on the length of a regular expression source.
pub const DEFAULT_MAX_PATTERN_LEN: usize = 64 * 1024;

/// Which whitespace the schema transpiler allows around JSON punctuation.
///
/// The choice decides which serializations of the same value are accepted,
/// e.g. `{"x":1}` versus `{"x": 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WhitespacePolicy {
    /// Compact JSON only.
    None,
    /// At most one space, as emitted by most serializers.
    #[default]
    OptionalSpace,
    /// Up to `max` characters of JSON insignificant whitespace.
    Arbitrary { max: usize },
    /// A caller supplied regex fragment.
    Pattern(String),
}

impl WhitespacePolicy {
    pub fn to_regex(&self) -> String {
        match self {
            WhitespacePolicy::None => String::new(),
            WhitespacePolicy::OptionalSpace => "[ ]?".to_string(),
            WhitespacePolicy::Arbitrary { max } => format!("[ \\t\\n\\r]{{0,{max}}}"),
            WhitespacePolicy::Pattern(pattern) => format!("(?:{pattern})"),
        }
    }
}

/// Options used when compiling a grammar into a guide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub whitespace: WhitespacePolicy,
    pub dfa_size_limit: Option<usize>,
    pub max_pattern_len: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            whitespace: WhitespacePolicy::default(),
            dfa_size_limit: Some(DEFAULT_DFA_SIZE_LIMIT),
            max_pattern_len: DEFAULT_MAX_PATTERN_LEN,
        }
    }
}

impl CompileConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn whitespace(mut self, whitespace: WhitespacePolicy) -> Self {
        self.whitespace = whitespace;
        self
    }

    /// `None` disables the limit.
    pub fn dfa_size_limit(mut self, limit: Option<usize>) -> Self {
        self.dfa_size_limit = limit;
        self
    }

    pub fn max_pattern_len(mut self, len: usize) -> Self {
        self.max_pattern_len = len;
        self
    }
}

/// Sizing of a [`crate::CompilationCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of memoized patterns, `None` for unbounded.
    pub capacity: Option<NonZeroUsize>,
}

impl CacheConfig {
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
        }
    }

    pub fn unbounded() -> Self {
        Self { capacity: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_fragments() {
        assert_eq!(WhitespacePolicy::None.to_regex(), "");
        assert_eq!(WhitespacePolicy::OptionalSpace.to_regex(), "[ ]?");
        assert_eq!(
            WhitespacePolicy::Arbitrary { max: 2 }.to_regex(),
            r"[ \t\n\r]{0,2}"
        );
        assert_eq!(
            WhitespacePolicy::Pattern(" *".into()).to_regex(),
            "(?: *)"
        );
    }

    #[test]
    fn config_from_json() {
        let config: CompileConfig =
            serde_json::from_str(r#"{"whitespace": {"arbitrary": {"max": 4}}}"#).unwrap();
        assert_eq!(config.whitespace, WhitespacePolicy::Arbitrary { max: 4 });
        assert_eq!(config.dfa_size_limit, Some(DEFAULT_DFA_SIZE_LIMIT));

        let config: CompileConfig = serde_json::from_str(r#"{"whitespace": "none"}"#).unwrap();
        assert_eq!(config.whitespace, WhitespacePolicy::None);
    }
}
