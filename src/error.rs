use thiserror::Error;

/// Errors raised while compiling a grammar or walking a guide.
///
/// Everything except [`Error::TokenNotAllowed`] and [`Error::UnknownState`] is
/// raised at compile time, so a generation loop only ever sees caller misuse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The regular expression does not parse, or its automaton is too large.
    #[error("invalid pattern near {offending:?}: {message}")]
    InvalidPattern { offending: String, message: String },

    /// The schema uses a feature that has no regular-language encoding.
    #[error("unsupported schema at {path}: {reason}")]
    UnsupportedSchema { path: String, reason: String },

    /// The schema text is not a JSON document.
    #[error("schema is not valid JSON: {0}")]
    InvalidSchema(String),

    /// The tokenizer cannot be turned into an indexed vocabulary.
    #[error("tokenizer incompatible: {reason} (ambiguous ids: {ambiguous:?})")]
    TokenizerIncompatible { reason: String, ambiguous: Vec<u32> },

    /// A transition was requested for a token outside the allowed set.
    #[error("token {token} is not allowed in state {state}")]
    TokenNotAllowed { state: u32, token: u32 },

    /// The state id was never produced by this guide.
    #[error("unknown state {0}")]
    UnknownState(u32),

    /// Two byte-identical fragments were indexed to different trie nodes.
    #[error("inconsistent vocabulary: tokens {first} and {second} share a fragment but not a trie node")]
    InconsistentVocabulary { first: u32, second: u32 },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidSchema(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
