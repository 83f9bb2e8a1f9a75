//! Regular expression to byte-level DFA.
//!
//! Parsing and determinization are done by `regex-automata`. Its dense DFA is
//! then flattened into an arena of states indexed by [`StateId`], keeping
//! only the states from which an accepting state is still reachable. A
//! transition into any other state counts as rejection, so a walk that never
//! rejects always describes a prefix of some accepted string.

use std::collections::{HashMap, VecDeque};

use regex_automata::dfa::{dense, Automaton, StartKind};
use regex_automata::util::primitives::StateID;
use regex_automata::util::start;
use regex_automata::{Anchored, MatchKind};

use crate::config::CompileConfig;
use crate::error::{Error, Result};
use crate::StateId;

const DEAD: u32 = u32::MAX;

/// A deterministic automaton over bytes, matching whole inputs only.
#[derive(Debug, Clone)]
pub struct Dfa {
    pattern: String,
    /// byte -> equivalence class
    classes: [u8; 256],
    stride: usize,
    /// `state * stride + class` -> next state or `DEAD`
    table: Vec<u32>,
    accepting: Vec<bool>,
    start: StateId,
}

impl Dfa {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn num_states(&self) -> usize {
        self.accepting.len()
    }

    pub fn contains(&self, state: StateId) -> bool {
        (state as usize) < self.num_states()
    }

    #[inline]
    pub fn next(&self, state: StateId, byte: u8) -> Option<StateId> {
        let class = self.classes[byte as usize] as usize;
        match self.table.get(state as usize * self.stride + class)? {
            &DEAD => None,
            &next => Some(next),
        }
    }

    pub fn is_accepting(&self, state: StateId) -> bool {
        self.accepting.get(state as usize).copied().unwrap_or(false)
    }

    /// Feed `bytes` from `state`, `None` if any byte is rejected.
    pub fn walk(&self, state: StateId, bytes: &[u8]) -> Option<StateId> {
        bytes
            .iter()
            .try_fold(state, |state, &byte| self.next(state, byte))
    }

    /// Whether the whole of `input` is in the language.
    pub fn accepts(&self, input: &[u8]) -> bool {
        self.walk(self.start, input)
            .is_some_and(|state| self.is_accepting(state))
    }
}

/// Compile `pattern` into a [`Dfa`]. The pattern is matched against the
/// entire input, as if wrapped in `^(?:...)$`.
///
/// Unicode word boundaries (`\b`, `\B`) cannot be expressed in a byte-level
/// DFA and are rejected with [`Error::InvalidPattern`]; the ASCII form
/// `(?-u:\b)` is supported.
pub fn compile_regex(pattern: &str, config: &CompileConfig) -> Result<Dfa> {
    check_pattern_len(pattern, config)?;
    check_syntax(pattern)?;

    // `All` keeps the automaton running past the first match, so that
    // `a|ab` still accepts "ab".
    let dfa = dense::Builder::new()
        .configure(
            dense::Config::new()
                .match_kind(MatchKind::All)
                .start_kind(StartKind::Anchored)
                .dfa_size_limit(config.dfa_size_limit)
                .determinize_size_limit(config.dfa_size_limit),
        )
        .build(pattern)
        .map_err(|e| Error::InvalidPattern {
            offending: truncate(pattern, 32),
            message: e.to_string(),
        })?;

    let start = dfa
        .start_state(&start::Config::new().anchored(Anchored::Yes))
        .map_err(|e| Error::InvalidPattern {
            offending: truncate(pattern, 32),
            message: e.to_string(),
        })?;

    let compiled = flatten(pattern, &dfa, start);
    tracing::debug!(
        pattern_len = pattern.len(),
        states = compiled.num_states(),
        classes = compiled.stride,
        "compiled regex"
    );
    Ok(compiled)
}

pub(crate) fn check_pattern_len(pattern: &str, config: &CompileConfig) -> Result<()> {
    if pattern.len() > config.max_pattern_len {
        return Err(Error::InvalidPattern {
            offending: truncate(pattern, 32),
            message: format!(
                "pattern is {} bytes long, limit is {}",
                pattern.len(),
                config.max_pattern_len
            ),
        });
    }
    Ok(())
}

/// Parse with `regex-syntax` first, only to report the offending span.
fn check_syntax(pattern: &str) -> Result<()> {
    let err = match regex_syntax::Parser::new().parse(pattern) {
        Ok(_) => return Ok(()),
        Err(err) => err,
    };
    let (span, message) = match &err {
        regex_syntax::Error::Parse(e) => (Some(*e.span()), e.kind().to_string()),
        regex_syntax::Error::Translate(e) => (Some(*e.span()), e.kind().to_string()),
        _ => (None, err.to_string()),
    };
    let offending = span
        .map(|span| offending_text(pattern, span.start.offset, span.end.offset))
        .unwrap_or_else(|| truncate(pattern, 32));
    Err(Error::InvalidPattern { offending, message })
}

fn offending_text(pattern: &str, start: usize, end: usize) -> String {
    match pattern.get(start..end) {
        Some(text) if !text.is_empty() => text.to_string(),
        // zero-width spans point at a position; show what follows it
        _ => truncate(pattern.get(start..).unwrap_or(pattern), 16),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn flatten(pattern: &str, dfa: &dense::DFA<Vec<u32>>, start: StateID) -> Dfa {
    let byte_classes = dfa.byte_classes();
    let mut classes = [0u8; 256];
    let mut representatives: Vec<u8> = Vec::new();
    for byte in 0..=255u8 {
        let class = byte_classes.get(byte);
        classes[byte as usize] = class;
        if class as usize == representatives.len() {
            representatives.push(byte);
        }
    }
    let stride = representatives.len();

    // breadth-first numbering of the reachable, non-dead states
    let mut ids: HashMap<StateID, u32> = HashMap::from([(start, 0)]);
    let mut order = vec![start];
    let mut queue = VecDeque::from([start]);
    let mut table: Vec<u32> = Vec::new();
    let mut accepting: Vec<bool> = Vec::new();
    while let Some(sid) = queue.pop_front() {
        accepting.push(dfa.is_match_state(dfa.next_eoi_state(sid)));
        for &byte in &representatives {
            let next = dfa.next_state(sid, byte);
            if dfa.is_dead_state(next) || dfa.is_quit_state(next) {
                table.push(DEAD);
                continue;
            }
            let id = *ids.entry(next).or_insert_with(|| {
                order.push(next);
                queue.push_back(next);
                order.len() as u32 - 1
            });
            table.push(id);
        }
    }

    let live = live_states(&table, &accepting, stride);
    // renumber, keeping the start state even when nothing is accepted
    let mut remap = vec![DEAD; accepting.len()];
    let mut next_id = 0u32;
    for (old, &is_live) in live.iter().enumerate() {
        if is_live || old == 0 {
            remap[old] = next_id;
            next_id += 1;
        }
    }
    let mut pruned_table = Vec::with_capacity(next_id as usize * stride);
    let mut pruned_accepting = Vec::with_capacity(next_id as usize);
    for old in 0..accepting.len() {
        if remap[old] == DEAD {
            continue;
        }
        pruned_accepting.push(accepting[old]);
        for &target in &table[old * stride..(old + 1) * stride] {
            let target = match target {
                DEAD => DEAD,
                t if live[t as usize] => remap[t as usize],
                _ => DEAD,
            };
            pruned_table.push(target);
        }
    }

    Dfa {
        pattern: pattern.to_string(),
        classes,
        stride,
        table: pruned_table,
        accepting: pruned_accepting,
        start: 0,
    }
}

/// States from which some accepting state can be reached.
fn live_states(table: &[u32], accepting: &[bool], stride: usize) -> Vec<bool> {
    let mut reverse: Vec<Vec<u32>> = vec![Vec::new(); accepting.len()];
    for (index, &target) in table.iter().enumerate() {
        if target != DEAD {
            reverse[target as usize].push((index / stride) as u32);
        }
    }
    let mut live = accepting.to_vec();
    let mut stack: Vec<u32> = (0..accepting.len() as u32)
        .filter(|&s| accepting[s as usize])
        .collect();
    while let Some(state) = stack.pop() {
        for &prev in &reverse[state as usize] {
            if !live[prev as usize] {
                live[prev as usize] = true;
                stack.push(prev);
            }
        }
    }
    live
}
