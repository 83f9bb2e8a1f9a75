//! Token-level transitions derived from a byte-level DFA.
//!
//! For a DFA state the allowed tokens are found with a single depth-first
//! walk over the vocabulary trie, stepping the DFA along each trie edge and
//! abandoning a subtree as soon as the DFA rejects its prefix. A token is
//! allowed when its whole fragment is consumed without rejection; the state
//! it lands in does not need to be accepting.
//!
//! States are resolved lazily, at most once each, and the results are shared
//! by every guide built on the same index.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::re::Dfa;
use crate::vocab::Vocabulary;
use crate::{StateId, TokenId};

/// The tokens allowed from one state, with the state each one leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedTokens {
    state: StateId,
    /// Sorted ascending.
    tokens: Vec<TokenId>,
    /// `next[i]` is the state reached by `tokens[i]`.
    next: Vec<StateId>,
}

impl AllowedTokens {
    fn new(state: StateId, mut reached: Vec<(TokenId, StateId)>) -> Self {
        reached.sort_unstable_by_key(|&(token, _)| token);
        let (tokens, next) = reached.into_iter().unzip();
        Self {
            state,
            tokens,
            next,
        }
    }

    /// The state these tokens are allowed from.
    pub fn state(&self) -> StateId {
        self.state
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// A dead end: nothing can be generated from this state.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: TokenId) -> bool {
        self.tokens.binary_search(&token).is_ok()
    }

    pub fn next_state(&self, token: TokenId) -> Option<StateId> {
        let pos = self.tokens.binary_search(&token).ok()?;
        Some(self.next[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, StateId)> + '_ {
        self.tokens.iter().copied().zip(self.next.iter().copied())
    }

    /// `mask[id]` is true iff `id` is allowed.
    pub fn to_mask(&self, vocab_size: usize) -> Vec<bool> {
        let mut mask = vec![false; vocab_size];
        for &token in &self.tokens {
            if let Some(slot) = mask.get_mut(token as usize) {
                *slot = true;
            }
        }
        mask
    }

    /// Set the logits of all disallowed tokens to negative infinity.
    pub fn mask_logits(&self, logits: &mut [f32]) {
        let mask = self.to_mask(logits.len());
        for (logit, allowed) in logits.iter_mut().zip(mask) {
            if !allowed {
                *logit = f32::NEG_INFINITY;
            }
        }
    }
}

/// Lazily resolved token transitions of one DFA over one vocabulary.
#[derive(Debug)]
pub struct TokenIndex {
    dfa: Arc<Dfa>,
    vocabulary: Arc<Vocabulary>,
    states: Vec<OnceLock<Arc<AllowedTokens>>>,
    resolved: AtomicUsize,
}

impl TokenIndex {
    /// Fails only if the vocabulary trie cannot be built.
    pub fn new(dfa: Arc<Dfa>, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        vocabulary.trie()?;
        let states = (0..dfa.num_states()).map(|_| OnceLock::new()).collect();
        Ok(Self {
            dfa,
            vocabulary,
            states,
            resolved: AtomicUsize::new(0),
        })
    }

    pub fn dfa(&self) -> &Arc<Dfa> {
        &self.dfa
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    /// Number of states resolved so far.
    pub fn resolved_states(&self) -> usize {
        self.resolved.load(Ordering::Relaxed)
    }

    /// The allowed tokens from `state`, walking the trie on first request.
    /// Concurrent first requests for the same state wait for a single walk.
    pub fn allowed(&self, state: StateId) -> Result<Arc<AllowedTokens>> {
        let slot = self
            .states
            .get(state as usize)
            .ok_or(Error::UnknownState(state))?;
        if let Some(allowed) = slot.get() {
            return Ok(allowed.clone());
        }
        let trie = self.vocabulary.trie()?;
        let allowed = slot.get_or_init(|| {
            let reached = trie.walk(state, |s, byte| self.dfa.next(s, byte));
            let allowed = AllowedTokens::new(state, reached);
            self.resolved.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(state, allowed = allowed.len(), "resolved state");
            Arc::new(allowed)
        });
        Ok(allowed.clone())
    }

    /// Resolve every state reachable from the start state, one breadth-first
    /// layer at a time with the states of a layer walked in parallel.
    /// Returns the number of reachable states.
    pub fn resolve_all(&self) -> Result<usize> {
        let mut seen: HashSet<StateId> = HashSet::from([self.dfa.start()]);
        let mut frontier = vec![self.dfa.start()];
        while !frontier.is_empty() {
            let layer: Vec<Arc<AllowedTokens>> = frontier
                .par_iter()
                .map(|&state| self.allowed(state))
                .collect::<Result<_>>()?;
            frontier = layer
                .iter()
                .flat_map(|allowed| allowed.next.iter().copied())
                .filter(|&next| seen.insert(next))
                .collect();
        }
        tracing::debug!(
            states = seen.len(),
            pattern_len = self.dfa.pattern().len(),
            "resolved all reachable states"
        );
        Ok(seen.len())
    }
}
