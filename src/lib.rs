//! Token-level constrained decoding for regular expressions and JSON Schema.
//!
//! A grammar is compiled into a byte-level DFA, and a [`Guide`] derives from
//! it, one state at a time, which vocabulary tokens keep the generated text a
//! prefix of some string in the grammar.
//!
//! ```
//! use std::sync::Arc;
//! use grammar_guide::{compile, CompilationCache, CompileConfig, Grammar, Vocabulary};
//!
//! let vocabulary = Arc::new(Vocabulary::new(["1", "23", "a"]));
//! let cache = CompilationCache::default();
//! let guide = compile(
//!     &Grammar::regex("[0-9]+"),
//!     &vocabulary,
//!     &cache,
//!     &CompileConfig::default(),
//! )?;
//!
//! let state = guide.initial_state();
//! assert_eq!(guide.get_next_instruction(state)?.tokens(), &[0, 1]);
//! let state = guide.get_next_state(state, 1)?;
//! assert!(guide.is_accepting(state));
//! # Ok::<(), grammar_guide::Error>(())
//! ```

mod cache;
mod config;
mod error;
mod guide;
#[cfg(feature = "hf")]
mod hf;
mod index;
pub mod json_schema;
mod re;
mod trie;
mod vocab;

use std::borrow::Cow;
use std::sync::Arc;

pub use cache::{CacheStats, CompilationCache};
pub use config::{CacheConfig, CompileConfig, WhitespacePolicy};
pub use error::{Error, Result};
pub use guide::Guide;
#[cfg(feature = "hf")]
pub use hf::HfTokenizer;
pub use index::{AllowedTokens, TokenIndex};
pub use json_schema::{compile_json_schema, compile_json_schema_str};
pub use re::{compile_regex, Dfa};
pub use trie::TokenTrie;
pub use vocab::{PieceEncoding, TokenPiece, Tokenizer, Vocabulary};

pub type TokenId = u32;
pub type StateId = u32;

pub trait Constraint {
    type State;

    fn get_state(&self, prefix: &[u8]) -> Option<Self::State>;

    fn get_start_state(&self) -> Self::State;

    fn is_match_state(&self, state: &Self::State) -> bool;

    fn get_valid_continuations(&self, state: &Self::State) -> Vec<TokenId>;

    fn get_next_state(&self, state: &Self::State, continuation: TokenId) -> Option<Self::State>;
}

/// Source of a constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Grammar {
    Regex(String),
    JsonSchema(serde_json::Value),
}

impl Grammar {
    pub fn regex(pattern: impl Into<String>) -> Self {
        Grammar::Regex(pattern.into())
    }

    pub fn json_schema(schema: serde_json::Value) -> Self {
        Grammar::JsonSchema(schema)
    }

    pub fn json_schema_str(schema: &str) -> Result<Self> {
        Ok(Grammar::JsonSchema(serde_json::from_str(schema)?))
    }

    /// The regular expression this grammar compiles to.
    pub fn to_regex(&self, config: &CompileConfig) -> Result<Cow<'_, str>> {
        match self {
            Grammar::Regex(pattern) => Ok(Cow::Borrowed(pattern)),
            Grammar::JsonSchema(schema) => compile_json_schema(schema, config).map(Cow::Owned),
        }
    }
}

/// Compile `grammar` for `vocabulary` into a [`Guide`].
///
/// Every grammar-level error is raised here; walking the returned guide can
/// only fail on tokens or states the caller made up.
pub fn compile(
    grammar: &Grammar,
    vocabulary: &Arc<Vocabulary>,
    cache: &CompilationCache,
    config: &CompileConfig,
) -> Result<Guide> {
    let pattern = grammar.to_regex(config)?;
    let index = cache.index(&pattern, vocabulary, config)?;
    Ok(Guide::new(index))
}
