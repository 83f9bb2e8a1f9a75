//! Indexed vocabulary: the byte fragment of every token id.
//!
//! Tokenizers report their pieces in different ways. Byte-level BPE
//! vocabularies (GPT-2 and descendants) map every byte to a printable
//! character, SentencePiece vocabularies use `▁` for spaces and `<0xNN>`
//! pieces for byte fallback, and some tokenizers hand out raw bytes. They are
//! all normalized here to plain bytes, which is the alphabet of
//! [`crate::Dfa`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, OnceLock};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::trie::TokenTrie;
use crate::TokenId;

/// How a tokenizer spells its pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceEncoding {
    /// Text pieces are the literal UTF-8 of the token.
    #[default]
    Raw,
    /// GPT-2 style byte to unicode mapping.
    ByteLevel,
    /// `▁` stands for a space, `<0xNN>` for a single byte.
    SentencePiece,
}

/// What a tokenizer reports for a single id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPiece {
    Bytes(Vec<u8>),
    Text(String),
    /// Control tokens such as end-of-sequence. Never produced by a grammar.
    Special,
}

/// The tokenizer collaborator.
pub trait Tokenizer: Sync {
    fn vocab_size(&self) -> usize;

    /// The piece for `id`, or `None` if it cannot be decoded without
    /// surrounding context.
    fn piece(&self, id: TokenId) -> Option<TokenPiece>;

    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    fn piece_encoding(&self) -> PieceEncoding {
        PieceEncoding::Raw
    }
}

static NEXT_VOCABULARY_ID: AtomicU64 = AtomicU64::new(0);

/// Immutable `token id -> byte fragment` table. Ids are dense, `0..len()`.
#[derive(Debug)]
pub struct Vocabulary {
    id: u64,
    fragments: Vec<Box<[u8]>>,
    trie: OnceLock<Result<TokenTrie>>,
}

impl Vocabulary {
    /// Build from fragments listed in id order. Empty fragments never match.
    pub fn new<I, F>(fragments: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Vec<u8>>,
    {
        Self::from_fragments(
            fragments
                .into_iter()
                .map(|f| f.into().into_boxed_slice())
                .collect(),
        )
    }

    fn from_fragments(fragments: Vec<Box<[u8]>>) -> Self {
        Self {
            id: NEXT_VOCABULARY_ID.fetch_add(1, Ordering::Relaxed),
            fragments,
            trie: OnceLock::new(),
        }
    }

    /// Decode and normalize every piece of `tokenizer`.
    ///
    /// Fails with [`Error::TokenizerIncompatible`] if the vocabulary is empty
    /// or some ids cannot be decoded on their own; all such ids are reported.
    pub fn from_tokenizer<T: Tokenizer + ?Sized>(tokenizer: &T) -> Result<Self> {
        let size = tokenizer.vocab_size();
        if size == 0 {
            return Err(Error::TokenizerIncompatible {
                reason: "tokenizer does not enumerate any tokens".into(),
                ambiguous: Vec::new(),
            });
        }
        let encoding = tokenizer.piece_encoding();
        let decoded: Vec<Option<Box<[u8]>>> = (0..size as TokenId)
            .into_par_iter()
            .map(|id| normalize(tokenizer.piece(id)?, encoding).map(Vec::into_boxed_slice))
            .collect();

        let ambiguous: Vec<TokenId> = decoded
            .iter()
            .enumerate()
            .filter_map(|(id, fragment)| fragment.is_none().then_some(id as TokenId))
            .collect();
        if !ambiguous.is_empty() {
            tracing::warn!(
                count = ambiguous.len(),
                first = ambiguous[0],
                "tokenizer has ids that cannot be decoded in isolation"
            );
            return Err(Error::TokenizerIncompatible {
                reason: format!("{} ids decode ambiguously", ambiguous.len()),
                ambiguous,
            });
        }

        let vocabulary = Self::from_fragments(decoded.into_iter().flatten().collect());
        tracing::debug!(
            tokens = vocabulary.len(),
            ?encoding,
            "indexed tokenizer vocabulary"
        );
        Ok(vocabulary)
    }

    /// Process-unique identity, used as part of cache keys.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn get(&self, id: TokenId) -> Option<&[u8]> {
        self.fragments.get(id as usize).map(|f| &f[..])
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &[u8])> {
        self.fragments
            .iter()
            .enumerate()
            .map(|(id, f)| (id as TokenId, &f[..]))
    }

    /// Concatenated fragments of `tokens`; unknown ids contribute nothing.
    pub fn decode(&self, tokens: &[TokenId]) -> Vec<u8> {
        tokens
            .iter()
            .filter_map(|&id| self.get(id))
            .flatten()
            .copied()
            .collect()
    }

    /// The prefix trie over all fragments, built on first use.
    pub fn trie(&self) -> Result<&TokenTrie> {
        self.trie
            .get_or_init(|| {
                let trie = TokenTrie::build(&self.fragments);
                if let Ok(trie) = &trie {
                    tracing::debug!(
                        tokens = self.len(),
                        nodes = trie.num_nodes(),
                        "built vocabulary trie"
                    );
                }
                trie
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Build everything that only depends on the vocabulary, so the first
    /// compiled grammar does not pay for it. Idempotent.
    pub fn warm_up(&self) -> Result<()> {
        self.trie().map(|_| ())
    }
}

fn normalize(piece: TokenPiece, encoding: PieceEncoding) -> Option<Vec<u8>> {
    match piece {
        TokenPiece::Bytes(bytes) => Some(bytes),
        TokenPiece::Special => Some(Vec::new()),
        TokenPiece::Text(text) => match encoding {
            PieceEncoding::Raw => Some(text.into_bytes()),
            PieceEncoding::ByteLevel => restore_bytes(&text),
            PieceEncoding::SentencePiece => Some(sentencepiece_bytes(&text)),
        },
    }
}

/// The GPT-2 table mapping each byte to a printable character, reversed.
fn char_bytes() -> HashMap<char, u8> {
    let mut bytes: Vec<u8> = Vec::with_capacity(256);
    bytes.extend(b'!'..=b'~');
    bytes.extend(0xA1..=0xAC);
    bytes.extend(0xAE..=0xFF);
    let mut chars: Vec<u32> = bytes.iter().map(|&b| b as u32).collect();
    let mut shifted = 0;
    for b in 0..=255u8 {
        if !bytes.contains(&b) {
            bytes.push(b);
            chars.push(256 + shifted);
            shifted += 1;
        }
    }
    bytes
        .into_iter()
        .zip(chars)
        .filter_map(|(b, c)| Some((char::from_u32(c)?, b)))
        .collect()
}

static CHAR_BYTES: LazyLock<HashMap<char, u8>> = LazyLock::new(char_bytes);

/// `None` if `text` contains a character outside the byte-level alphabet.
pub fn restore_bytes(text: &str) -> Option<Vec<u8>> {
    text.chars().map(|c| CHAR_BYTES.get(&c).copied()).collect()
}

fn sentencepiece_bytes(text: &str) -> Vec<u8> {
    if let Some(byte) = byte_fallback(text) {
        return vec![byte];
    }
    text.replace('\u{2581}', " ").into_bytes()
}

/// Parses `<0xNN>` byte fallback pieces.
fn byte_fallback(text: &str) -> Option<u8> {
    let hex = text.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pieces(Vec<Option<TokenPiece>>, PieceEncoding);

    impl Tokenizer for Pieces {
        fn vocab_size(&self) -> usize {
            self.0.len()
        }

        fn piece(&self, id: TokenId) -> Option<TokenPiece> {
            self.0[id as usize].clone()
        }

        fn encode(&self, _text: &str) -> Result<Vec<TokenId>> {
            Ok(Vec::new())
        }

        fn piece_encoding(&self) -> PieceEncoding {
            self.1
        }
    }

    fn text(s: &str) -> Option<TokenPiece> {
        Some(TokenPiece::Text(s.to_string()))
    }

    #[test]
    fn byte_level_pieces() {
        let tokenizer = Pieces(
            vec![text("Ġhello"), text("Ċ"), Some(TokenPiece::Special)],
            PieceEncoding::ByteLevel,
        );
        let vocab = Vocabulary::from_tokenizer(&tokenizer).unwrap();
        assert_eq!(vocab.get(0), Some(&b" hello"[..]));
        assert_eq!(vocab.get(1), Some(&b"\n"[..]));
        assert_eq!(vocab.get(2), Some(&b""[..]));
    }

    #[test]
    fn byte_level_table_is_a_bijection() {
        assert_eq!(CHAR_BYTES.len(), 256);
        assert_eq!(restore_bytes("!~"), Some(b"!~".to_vec()));
        assert_eq!(restore_bytes("日"), None);
    }

    #[test]
    fn sentencepiece_pieces() {
        let tokenizer = Pieces(
            vec![text("▁the"), text("<0x0A>"), text("<0xE2>"), text("<s>")],
            PieceEncoding::SentencePiece,
        );
        let vocab = Vocabulary::from_tokenizer(&tokenizer).unwrap();
        assert_eq!(vocab.get(0), Some(&b" the"[..]));
        assert_eq!(vocab.get(1), Some(&b"\n"[..]));
        assert_eq!(vocab.get(2), Some(&[0xE2][..]));
        assert_eq!(vocab.get(3), Some(&b"<s>"[..]));
    }

    #[test]
    fn reports_every_ambiguous_id() {
        let tokenizer = Pieces(vec![text("a"), None, text("b"), None], PieceEncoding::Raw);
        let err = Vocabulary::from_tokenizer(&tokenizer).unwrap_err();
        match err {
            Error::TokenizerIncompatible { ambiguous, .. } => assert_eq!(ambiguous, vec![1, 3]),
            other => panic!("unexpected error {other:?}"),
        }

        let tokenizer = Pieces(vec![text("Ġ"), text("日")], PieceEncoding::ByteLevel);
        assert!(matches!(
            Vocabulary::from_tokenizer(&tokenizer),
            Err(Error::TokenizerIncompatible { ambiguous, .. }) if ambiguous == vec![1]
        ));
    }

    #[test]
    fn empty_tokenizer_is_rejected() {
        let tokenizer = Pieces(Vec::new(), PieceEncoding::Raw);
        assert!(matches!(
            Vocabulary::from_tokenizer(&tokenizer),
            Err(Error::TokenizerIncompatible { .. })
        ));
    }

    #[test]
    fn warm_up_builds_the_trie_once() {
        let vocab = Vocabulary::new(["ab", "a", ""]);
        vocab.warm_up().unwrap();
        let first = vocab.trie().unwrap() as *const TokenTrie;
        let second = vocab.trie().unwrap() as *const TokenTrie;
        assert_eq!(first, second);
        assert_eq!(vocab.decode(&[1, 0, 2, 9]), b"aab");
    }

    #[test]
    fn ids_are_unique() {
        let a = Vocabulary::new(["x"]);
        let b = Vocabulary::new(["x"]);
        assert_ne!(a.id(), b.id());
    }
}
