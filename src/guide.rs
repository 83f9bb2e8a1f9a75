use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{AllowedTokens, TokenIndex};
use crate::{Constraint, StateId, TokenId};

/// Cursor-free view of a compiled grammar for one generation loop.
///
/// The guide itself holds no position: callers keep the [`StateId`] and
/// pass it back in, so one guide can drive any number of samples. Cloning is
/// cheap and clones share all resolved states.
#[derive(Debug, Clone)]
pub struct Guide {
    index: Arc<TokenIndex>,
}

impl Guide {
    pub fn new(index: Arc<TokenIndex>) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &Arc<TokenIndex> {
        &self.index
    }

    pub fn initial_state(&self) -> StateId {
        self.index.dfa().start()
    }

    /// Tokens that may be sampled next. An empty set means the text cannot
    /// be continued; check [`Guide::is_accepting`] to tell a finished
    /// generation from a dead end.
    pub fn get_next_instruction(&self, state: StateId) -> Result<Arc<AllowedTokens>> {
        self.index.allowed(state)
    }

    /// The state after emitting `token`, which must be in
    /// `get_next_instruction(state)`.
    pub fn get_next_state(&self, state: StateId, token: TokenId) -> Result<StateId> {
        self.index
            .allowed(state)?
            .next_state(token)
            .ok_or(Error::TokenNotAllowed { state, token })
    }

    /// Whether the text generated so far is a complete match.
    pub fn is_accepting(&self, state: StateId) -> bool {
        self.index.dfa().is_accepting(state)
    }

    /// Advance from the initial state over `tokens`.
    pub fn walk(&self, tokens: &[TokenId]) -> Result<StateId> {
        tokens
            .iter()
            .try_fold(self.initial_state(), |state, &token| {
                self.get_next_state(state, token)
            })
    }

    /// The state reached after the raw bytes `prefix`, if they are a valid
    /// prefix. Ignores token boundaries.
    pub fn state_for_prefix(&self, prefix: &[u8]) -> Option<StateId> {
        self.index.dfa().walk(self.initial_state(), prefix)
    }
}

impl Constraint for Guide {
    type State = StateId;

    fn get_state(&self, prefix: &[u8]) -> Option<StateId> {
        self.state_for_prefix(prefix)
    }

    fn get_start_state(&self) -> StateId {
        self.initial_state()
    }

    fn is_match_state(&self, state: &StateId) -> bool {
        self.is_accepting(*state)
    }

    fn get_valid_continuations(&self, state: &StateId) -> Vec<TokenId> {
        self.get_next_instruction(*state)
            .map(|allowed| allowed.tokens().to_vec())
            .unwrap_or_default()
    }

    fn get_next_state(&self, state: &StateId, continuation: TokenId) -> Option<StateId> {
        Guide::get_next_state(self, *state, continuation).ok()
    }
}
