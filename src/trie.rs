//! Byte prefix trie over the fragments of a vocabulary.
//!
//! The trie is independent of any grammar. Walking it jointly with a DFA
//! simulates every shared prefix exactly once, instead of feeding each token
//! through the automaton on its own.

use std::collections::HashMap;

use crate::error::{Error, Result};

const ROOT: u32 = 0;

#[derive(Debug, Default, Clone)]
struct Node {
    /// Outgoing edges sorted by byte.
    edges: Vec<(u8, u32)>,
    /// Ids of the tokens whose fragment ends exactly here.
    tokens: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct TokenTrie {
    nodes: Vec<Node>,
}

impl TokenTrie {
    /// Build the trie from `fragments[id]`. Empty fragments are left out, so
    /// those tokens never match anything.
    pub fn build(fragments: &[Box<[u8]>]) -> Result<Self> {
        let mut trie = Self {
            nodes: vec![Node::default()],
        };
        let mut ends: Vec<(u32, u32)> = Vec::with_capacity(fragments.len());
        for (id, fragment) in fragments.iter().enumerate() {
            if fragment.is_empty() {
                continue;
            }
            let node = trie.insert(fragment, id as u32);
            ends.push((id as u32, node));
        }
        trie.check_consistency(fragments, &ends)?;
        Ok(trie)
    }

    fn insert(&mut self, fragment: &[u8], id: u32) -> u32 {
        let mut node = ROOT;
        for &byte in fragment {
            let edges = &self.nodes[node as usize].edges;
            node = match edges.binary_search_by_key(&byte, |&(b, _)| b) {
                Ok(pos) => edges[pos].1,
                Err(pos) => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(Node::default());
                    self.nodes[node as usize].edges.insert(pos, (byte, child));
                    child
                }
            };
        }
        self.nodes[node as usize].tokens.push(id);
        node
    }

    fn check_consistency(&self, fragments: &[Box<[u8]>], ends: &[(u32, u32)]) -> Result<()> {
        let mut seen: HashMap<&[u8], (u32, u32)> = HashMap::with_capacity(ends.len());
        for &(id, node) in ends {
            let fragment: &[u8] = &fragments[id as usize];
            match seen.get(fragment) {
                Some(&(first, first_node)) if first_node != node => {
                    return Err(Error::InconsistentVocabulary { first, second: id });
                }
                Some(_) => {}
                None => {
                    seen.insert(fragment, (id, node));
                }
            }
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Ids of the tokens whose fragment is exactly `fragment`.
    pub fn lookup(&self, fragment: &[u8]) -> &[u32] {
        let mut node = ROOT;
        for &byte in fragment {
            let edges = &self.nodes[node as usize].edges;
            match edges.binary_search_by_key(&byte, |&(b, _)| b) {
                Ok(pos) => node = edges[pos].1,
                Err(_) => return &[],
            }
        }
        &self.nodes[node as usize].tokens
    }

    /// Depth-first walk of the trie in lockstep with an automaton.
    ///
    /// `step` returns the automaton state after a byte, or `None` on
    /// rejection, in which case the whole subtree below that edge is skipped.
    /// Returns every token reached together with the automaton state it ends
    /// in, in no particular order.
    pub fn walk<S, F>(&self, start: S, mut step: F) -> Vec<(u32, S)>
    where
        S: Copy,
        F: FnMut(S, u8) -> Option<S>,
    {
        let mut reached = Vec::new();
        let mut stack = vec![(ROOT, start)];
        while let Some((node, state)) = stack.pop() {
            let node = &self.nodes[node as usize];
            reached.extend(node.tokens.iter().map(|&id| (id, state)));
            for &(byte, child) in &node.edges {
                if let Some(next) = step(state, byte) {
                    stack.push((child, next));
                }
            }
        }
        reached
    }
}
