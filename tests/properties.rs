use std::sync::Arc;

use grammar_guide::{
    compile, compile_regex, CompilationCache, CompileConfig, Grammar, Guide, TokenId, Vocabulary,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use regex::Regex;

const PATTERNS: &[(&str, &[char])] = &[
    ("[0-9]+", &['0', '5', '9', 'a']),
    ("a|ab", &['a', 'b']),
    ("(ab|cd)*e?", &['a', 'b', 'c', 'd', 'e']),
    ("x{2,4}y", &['x', 'y']),
    ("[a-c]*c[a-c]", &['a', 'b', 'c', 'd']),
    ("(foo|bar)+baz", &['f', 'o', 'b', 'a', 'r', 'z']),
    (r"-?(0|[1-9][0-9]*)(\.[0-9]+)?", &['-', '0', '1', '.', '7']),
    ("^a$", &['a', 'b']),
    ("a?b?c?", &['a', 'b', 'c']),
    ("é*ü?", &['é', 'ü', 'e']),
    ("[^ab]{1,3}", &['a', 'b', 'c', '\n']),
];

fn random_string(rng: &mut ChaCha8Rng, alphabet: &[char]) -> String {
    let len = rng.gen_range(0..9);
    (0..len)
        .map(|_| *alphabet.choose(rng).unwrap_or(&'a'))
        .collect()
}

#[test]
fn dfa_agrees_with_regex_crate() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let config = CompileConfig::default();
    for &(pattern, alphabet) in PATTERNS {
        let dfa = compile_regex(pattern, &config).unwrap();
        let oracle = Regex::new(&format!("^(?:{pattern})$")).unwrap();
        for _ in 0..500 {
            let input = random_string(&mut rng, alphabet);
            assert_eq!(
                dfa.accepts(input.as_bytes()),
                oracle.is_match(&input),
                "{pattern} on {input:?}"
            );
        }
    }
}

#[test]
fn recompiling_after_clear_accepts_the_same_language() {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    let cache = CompilationCache::default();
    let config = CompileConfig::default();
    for &(pattern, alphabet) in PATTERNS {
        let first = cache.dfa(pattern, &config).unwrap();
        cache.clear();
        let second = cache.dfa(pattern, &config).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        for _ in 0..200 {
            let input = random_string(&mut rng, alphabet);
            assert_eq!(first.accepts(input.as_bytes()), second.accepts(input.as_bytes()));
        }
    }
}

fn vocabulary_for(alphabet: &[char]) -> Vocabulary {
    let mut pieces: Vec<String> = alphabet.iter().map(|c| c.to_string()).collect();
    for a in alphabet {
        for b in alphabet {
            pieces.push(format!("{a}{b}"));
        }
    }
    pieces.push(String::new());
    Vocabulary::new(pieces)
}

/// Follow random allowed tokens, checking each step against the DFA.
fn random_walk(guide: &Guide, rng: &mut ChaCha8Rng, steps: usize) -> Vec<TokenId> {
    let vocabulary = guide.index().vocabulary();
    let dfa = guide.index().dfa();
    let mut state = guide.initial_state();
    let mut tokens = Vec::new();
    for _ in 0..steps {
        let allowed = guide.get_next_instruction(state).unwrap();
        assert!(allowed.tokens().iter().all(|&t| (t as usize) < vocabulary.len()));
        let Some(&token) = allowed.tokens().choose(rng) else {
            break;
        };
        let next = guide.get_next_state(state, token).unwrap();
        assert_eq!(guide.get_next_state(state, token).unwrap(), next);
        tokens.push(token);
        assert_eq!(dfa.walk(dfa.start(), &vocabulary.decode(&tokens)), Some(next));
        state = next;
    }
    tokens
}

#[test]
fn allowed_tokens_keep_a_valid_prefix() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let config = CompileConfig::default();
    for &(pattern, alphabet) in PATTERNS {
        let vocabulary = Arc::new(vocabulary_for(alphabet));
        let cache = CompilationCache::default();
        let guide = compile(&Grammar::regex(pattern), &vocabulary, &cache, &config).unwrap();
        for _ in 0..20 {
            random_walk(&guide, &mut rng, 8);
        }
    }
}

#[test]
fn cache_never_changes_outcomes() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let config = CompileConfig::default();
    let warm = CompilationCache::default();
    for &(pattern, alphabet) in PATTERNS {
        let vocabulary = Arc::new(vocabulary_for(alphabet));
        let grammar = Grammar::regex(pattern);
        let warmed = compile(&grammar, &vocabulary, &warm, &config).unwrap();
        warmed.index().resolve_all().unwrap();
        let warmed = compile(&grammar, &vocabulary, &warm, &config).unwrap();
        let cold = compile(&grammar, &vocabulary, &CompilationCache::default(), &config).unwrap();

        let tokens = random_walk(&cold, &mut rng, 8);
        let mut warm_state = warmed.initial_state();
        let mut cold_state = cold.initial_state();
        for token in tokens {
            assert_eq!(
                warmed.get_next_instruction(warm_state).unwrap().tokens(),
                cold.get_next_instruction(cold_state).unwrap().tokens()
            );
            warm_state = warmed.get_next_state(warm_state, token).unwrap();
            cold_state = cold.get_next_state(cold_state, token).unwrap();
            assert_eq!(warmed.is_accepting(warm_state), cold.is_accepting(cold_state));
        }
    }
    assert!(warm.stats().hits > 0);
}

#[test]
fn accepting_walks_decode_to_matches() {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let config = CompileConfig::default();
    for &(pattern, alphabet) in PATTERNS {
        let oracle = Regex::new(&format!("^(?:{pattern})$")).unwrap();
        let vocabulary = Arc::new(vocabulary_for(alphabet));
        let guide = compile(
            &Grammar::regex(pattern),
            &vocabulary,
            &CompilationCache::default(),
            &config,
        )
        .unwrap();
        for _ in 0..20 {
            let steps = rng.gen_range(1..6);
            let tokens = random_walk(&guide, &mut rng, steps);
            let state = guide.walk(&tokens).unwrap();
            let text = String::from_utf8(vocabulary.decode(&tokens)).unwrap();
            assert_eq!(guide.is_accepting(state), oracle.is_match(&text), "{pattern} {text:?}");
        }
    }
}
