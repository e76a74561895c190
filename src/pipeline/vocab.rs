use std::collections::HashMap;
use std::path::Path;

use crate::config::{SpecialTokens, AUDIO_TIME_PER_FRAME};
use crate::error::AlignmentError;
use crate::pipeline::traits::TokenDecoder;
use crate::types::TokenId;

/// Decoder for GPT-2 style byte-level BPE vocabularies (`vocab.json`, piece → id).
///
/// Ordinary pieces are mapped back to raw bytes through the byte/unicode
/// table and decoded lossily, so split multi-byte characters show up as
/// U+FFFD. Timestamps render as `<|t.tt|>`; other control markers use their
/// vocabulary piece, or `<|id|>` when the vocabulary does not name them.
#[derive(Debug, Clone)]
pub struct ByteLevelDecoder {
    pieces: HashMap<TokenId, Vec<u8>>,
    special_names: HashMap<TokenId, String>,
    specials: SpecialTokens,
}

impl ByteLevelDecoder {
    pub fn from_vocab(vocab: HashMap<String, TokenId>, specials: SpecialTokens) -> Self {
        let byte_decoder = unicode_to_bytes();
        let mut pieces = HashMap::with_capacity(vocab.len());
        let mut special_names = HashMap::new();
        for (piece, id) in vocab {
            if specials.is_special(id) {
                special_names.insert(id, piece);
                continue;
            }
            let mut bytes = Vec::with_capacity(piece.len());
            for c in piece.chars() {
                match byte_decoder.get(&c) {
                    Some(&b) => bytes.push(b),
                    None => {
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
            pieces.insert(id, bytes);
        }
        Self {
            pieces,
            special_names,
            specials,
        }
    }

    pub fn load(path: &Path, specials: SpecialTokens) -> Result<Self, AlignmentError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| AlignmentError::io("read vocab.json", e))?;
        let vocab: HashMap<String, TokenId> =
            serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse vocab.json", e))?;
        Ok(Self::from_vocab(vocab, specials))
    }
}

impl TokenDecoder for ByteLevelDecoder {
    fn decode_with_timestamps(&self, tokens: &[TokenId]) -> String {
        let mut out = String::new();
        let mut pending: Vec<u8> = Vec::new();
        let flush = |out: &mut String, pending: &mut Vec<u8>| {
            if !pending.is_empty() {
                out.push_str(&String::from_utf8_lossy(pending));
                pending.clear();
            }
        };

        for &token in tokens {
            if let Some(frame) = self.specials.timestamp_frame(token) {
                flush(&mut out, &mut pending);
                out.push_str(&format!("<|{:.2}|>", frame as f64 * AUDIO_TIME_PER_FRAME));
            } else if self.specials.is_special(token) {
                flush(&mut out, &mut pending);
                match self.special_names.get(&token) {
                    Some(name) => out.push_str(name),
                    None => out.push_str(&format!("<|{token}|>")),
                }
            } else if let Some(bytes) = self.pieces.get(&token) {
                pending.extend_from_slice(bytes);
            }
        }
        flush(&mut out, &mut pending);
        out
    }
}

/// Inverse of the GPT-2 `bytes_to_unicode` table.
fn unicode_to_bytes() -> HashMap<char, u8> {
    let printable = |b: u8| matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF);
    let mut table = HashMap::with_capacity(256);
    let mut shifted = 0u32;
    for b in 0..=255u8 {
        let c = if printable(b) {
            char::from(b)
        } else {
            let c = char::from_u32(256 + shifted).unwrap_or(char::REPLACEMENT_CHARACTER);
            shifted += 1;
            c
        };
        table.insert(c, b);
    }
    table
}
