//! [`Tokenizer`] implementation for Hugging Face `tokenizers`.

use std::collections::HashMap;
use std::path::Path;

use tokenizers::decoders::DecoderWrapper;

use crate::error::{Error, Result};
use crate::vocab::{PieceEncoding, TokenPiece, Tokenizer};
use crate::TokenId;

pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    /// Added tokens hold their text verbatim, whatever the model encoding.
    added: HashMap<TokenId, TokenPiece>,
    encoding: PieceEncoding,
}

fn incompatible(reason: impl ToString) -> Error {
    Error::TokenizerIncompatible {
        reason: reason.to_string(),
        ambiguous: Vec::new(),
    }
}

fn decoder_encoding(decoder: &DecoderWrapper) -> PieceEncoding {
    match decoder {
        DecoderWrapper::ByteLevel(_) => PieceEncoding::ByteLevel,
        DecoderWrapper::Metaspace(_) | DecoderWrapper::ByteFallback(_) => {
            PieceEncoding::SentencePiece
        }
        DecoderWrapper::Sequence(sequence) => sequence
            .get_decoders()
            .iter()
            .map(decoder_encoding)
            .find(|encoding| *encoding != PieceEncoding::Raw)
            .unwrap_or(PieceEncoding::Raw),
        _ => PieceEncoding::Raw,
    }
}

impl HfTokenizer {
    pub fn new(inner: tokenizers::Tokenizer) -> Self {
        let added = inner
            .get_added_tokens_decoder()
            .into_iter()
            .map(|(id, token)| {
                let piece = if token.special {
                    TokenPiece::Special
                } else {
                    TokenPiece::Bytes(token.content.into_bytes())
                };
                (id, piece)
            })
            .collect();
        let encoding = inner
            .get_decoder()
            .map(decoder_encoding)
            .unwrap_or(PieceEncoding::Raw);
        Self {
            inner,
            added,
            encoding,
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        tokenizers::Tokenizer::from_file(path)
            .map(Self::new)
            .map_err(incompatible)
    }
}

impl Tokenizer for HfTokenizer {
    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    fn piece(&self, id: TokenId) -> Option<TokenPiece> {
        if let Some(piece) = self.added.get(&id) {
            return Some(piece.clone());
        }
        self.inner.id_to_token(id).map(TokenPiece::Text)
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self.inner.encode(text, false).map_err(incompatible)?;
        Ok(encoding.get_ids().to_vec())
    }

    fn piece_encoding(&self) -> PieceEncoding {
        self.encoding
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::vocab::Vocabulary;

    fn tokenizer(decoder: &str) -> HfTokenizer {
        let json = format!(
            r#"{{
                "version": "1.0",
                "truncation": null,
                "padding": null,
                "added_tokens": [
                    {{"id": 3, "content": "  ", "single_word": false, "lstrip": false,
                      "rstrip": false, "normalized": false, "special": false}},
                    {{"id": 4, "content": "<|endoftext|>", "single_word": false, "lstrip": false,
                      "rstrip": false, "normalized": false, "special": true}}
                ],
                "normalizer": null,
                "pre_tokenizer": null,
                "post_processor": null,
                "decoder": {decoder},
                "model": {{
                    "type": "BPE", "dropout": null, "unk_token": null,
                    "continuing_subword_prefix": null, "end_of_word_suffix": null,
                    "fuse_unk": false, "byte_fallback": false,
                    "vocab": {{"a": 0, "b": 1, "Ġ": 2}},
                    "merges": []
                }}
            }}"#
        );
        HfTokenizer::new(tokenizers::Tokenizer::from_str(&json).unwrap())
    }

    const BYTE_LEVEL: &str =
        r#"{"type": "ByteLevel", "add_prefix_space": false, "trim_offsets": true, "use_regex": true}"#;

    #[test]
    fn byte_level_with_added_tokens() {
        let tokenizer = tokenizer(BYTE_LEVEL);
        assert_eq!(tokenizer.piece_encoding(), PieceEncoding::ByteLevel);
        let vocabulary = Vocabulary::from_tokenizer(&tokenizer).unwrap();
        assert_eq!(vocabulary.len(), 5);
        assert_eq!(vocabulary.get(0), Some(&b"a"[..]));
        assert_eq!(vocabulary.get(2), Some(&b" "[..]));
        assert_eq!(vocabulary.get(3), Some(&b"  "[..]));
        assert_eq!(vocabulary.get(4), Some(&b""[..]));
    }

    #[test]
    fn encoding_from_decoder_sequence() {
        let sequence = format!(
            r#"{{"type": "Sequence", "decoders": [{{"type": "Fuse"}}, {BYTE_LEVEL}]}}"#
        );
        assert_eq!(tokenizer(&sequence).piece_encoding(), PieceEncoding::ByteLevel);

        let sentencepiece = r#"{"type": "Sequence", "decoders": [
            {"type": "Replace", "pattern": {"String": "▁"}, "content": " "},
            {"type": "ByteFallback"},
            {"type": "Fuse"}
        ]}"#;
        assert_eq!(tokenizer(sentencepiece).piece_encoding(), PieceEncoding::SentencePiece);

        assert_eq!(tokenizer("null").piece_encoding(), PieceEncoding::Raw);
    }
}
