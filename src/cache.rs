//! Explicit, caller-owned memoization of compiled grammars.
//!
//! The cache hands out `Arc`s and only ever holds shared ownership, so
//! clearing or evicting entries never invalidates a guide that is already in
//! use: it keeps its automaton and every state it has resolved.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use crate::config::{CacheConfig, CompileConfig};
use crate::error::Result;
use crate::index::TokenIndex;
use crate::re::{check_pattern_len, compile_regex, Dfa};
use crate::vocab::Vocabulary;

/// Counters describing how a [`CompilationCache`] has been used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub patterns: usize,
    pub indices: usize,
}

/// A pattern together with the options that change how it compiles.
type DfaKey = (String, Option<usize>);

fn dfa_key(pattern: &str, config: &CompileConfig) -> DfaKey {
    (pattern.to_string(), config.dfa_size_limit)
}

#[derive(Debug)]
pub struct CompilationCache {
    dfas: Mutex<LruCache<DfaKey, Arc<Dfa>>>,
    /// Keyed by the DFA key and [`Vocabulary::id`].
    indices: Mutex<LruCache<(DfaKey, u64), Arc<TokenIndex>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for CompilationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn new_lru<K: Hash + Eq, V>(capacity: Option<NonZeroUsize>) -> LruCache<K, V> {
    match capacity {
        Some(capacity) => LruCache::new(capacity),
        None => LruCache::unbounded(),
    }
}

// Entries are only ever inserted whole, so a poisoned lock still guards a
// consistent map.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CompilationCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            dfas: Mutex::new(new_lru(config.capacity)),
            indices: Mutex::new(new_lru(config.capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The DFA for `pattern`, compiled on a miss. A cache hit reports the
    /// same errors as compiling from scratch.
    pub fn dfa(&self, pattern: &str, config: &CompileConfig) -> Result<Arc<Dfa>> {
        check_pattern_len(pattern, config)?;
        let (dfa, hit) = self.lookup_dfa(dfa_key(pattern, config), config)?;
        self.count(hit);
        Ok(dfa)
    }

    fn lookup_dfa(&self, key: DfaKey, config: &CompileConfig) -> Result<(Arc<Dfa>, bool)> {
        if let Some(dfa) = lock(&self.dfas).get(&key) {
            tracing::debug!(pattern_len = key.0.len(), "dfa cache hit");
            return Ok((dfa.clone(), true));
        }
        tracing::debug!(pattern_len = key.0.len(), "dfa cache miss");

        // compiled without holding the lock; a concurrent compilation of the
        // same pattern may win the insertion, in which case its DFA is used
        let dfa = Arc::new(compile_regex(&key.0, config)?);
        let mut dfas = lock(&self.dfas);
        if let Some(existing) = dfas.get(&key) {
            return Ok((existing.clone(), false));
        }
        dfas.put(key, dfa.clone());
        Ok((dfa, false))
    }

    fn count(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// The token index for `pattern` over `vocabulary`, created on a miss.
    /// States already resolved through a cached index are reused. Hits and
    /// misses count index lookups only, whatever happened to the DFA.
    pub fn index(
        &self,
        pattern: &str,
        vocabulary: &Arc<Vocabulary>,
        config: &CompileConfig,
    ) -> Result<Arc<TokenIndex>> {
        check_pattern_len(pattern, config)?;
        let key = (dfa_key(pattern, config), vocabulary.id());
        if let Some(index) = lock(&self.indices).get(&key) {
            self.count(true);
            return Ok(index.clone());
        }
        self.count(false);
        let (dfa, _) = self.lookup_dfa(key.0.clone(), config)?;
        let index = Arc::new(TokenIndex::new(dfa, vocabulary.clone())?);
        let mut indices = lock(&self.indices);
        if let Some(existing) = indices.get(&key) {
            return Ok(existing.clone());
        }
        indices.put(key, index.clone());
        Ok(index)
    }

    /// Drop every memoized DFA and token index. Guides handed out earlier
    /// keep working on their own copies.
    pub fn clear(&self) {
        let patterns = {
            let mut dfas = lock(&self.dfas);
            let len = dfas.len();
            dfas.clear();
            len
        };
        let indices = {
            let mut indices = lock(&self.indices);
            let len = indices.len();
            indices.clear();
            len
        };
        tracing::info!(patterns, indices, "cleared compilation cache");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            patterns: lock(&self.dfas).len(),
            indices: lock(&self.indices).len(),
        }
    }
}
