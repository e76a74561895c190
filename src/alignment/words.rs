use crate::config::SpecialTokens;
use crate::pipeline::traits::TokenDecoder;
use crate::types::{TokenId, WordTokens};

/// ASCII punctuation that sticks to the previous word. Hyphens and
/// apostrophes are left out because they live inside words.
const PUNCTUATION: &str = "!\"#$%&()*+,./:;<=>?@[\\]^_`{|}~";

/// Substring test against [`PUNCTUATION`]; an empty string matches, so units
/// made of whitespace only attach to the previous word.
pub(crate) fn is_punctuation(text: &str) -> bool {
    PUNCTUATION.contains(text)
}

/// Split tokens into units that decode to complete characters.
///
/// A punctuation unit is merged into the previous word (an empty word is
/// opened if there is none yet). With `remove_punctuation` its text is
/// dropped while its tokens stay with the previous word.
pub fn split_tokens_on_unicode(
    tokens: &[TokenId],
    decoder: &dyn TokenDecoder,
    remove_punctuation: bool,
) -> Vec<WordTokens> {
    let mut words: Vec<WordTokens> = Vec::new();
    let mut current: Vec<TokenId> = Vec::new();

    for &token in tokens {
        current.push(token);
        let decoded = decoder.decode_with_timestamps(&current);
        if decoded.contains('\u{fffd}') {
            continue;
        }
        if is_punctuation(decoded.trim()) {
            if words.is_empty() {
                words.push(WordTokens::default());
            }
            if let Some(last) = words.last_mut() {
                if !remove_punctuation {
                    last.text.push_str(&decoded);
                }
                last.tokens.append(&mut current);
            }
        } else {
            words.push(WordTokens {
                text: decoded,
                tokens: std::mem::take(&mut current),
            });
        }
    }

    // Bytes that never completed a character still belong to the segment.
    if !current.is_empty() {
        words.push(WordTokens {
            text: decoder.decode_with_timestamps(&current),
            tokens: current,
        });
    }
    words
}

/// Split tokens into space-delimited words on top of unicode units.
///
/// A unit opens a new word when it starts with a space and is not
/// punctuation, or when it or the previous unit is a control marker.
pub fn split_tokens_on_spaces(
    tokens: &[TokenId],
    decoder: &dyn TokenDecoder,
    specials: &SpecialTokens,
    remove_punctuation: bool,
) -> Vec<WordTokens> {
    let units = split_tokens_on_unicode(tokens, decoder, remove_punctuation);
    let is_special = |unit: &WordTokens| {
        unit.tokens
            .first()
            .is_some_and(|&token| specials.is_special(token))
    };

    let mut words: Vec<WordTokens> = Vec::with_capacity(units.len());
    let mut previous_special = false;
    for unit in units {
        let special = is_special(&unit);
        let with_space = unit.text.starts_with(' ');
        let punctuation = is_punctuation(unit.text.trim());
        let opens_word = special || previous_special || (with_space && !punctuation);
        previous_special = special;

        match words.last_mut() {
            Some(last) if !opens_word => {
                last.text.push_str(unit.text.trim());
                last.tokens.extend(unit.tokens);
            }
            _ => words.push(WordTokens {
                text: unit.text.trim().to_string(),
                tokens: unit.tokens,
            }),
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::pipeline::vocab::ByteLevelDecoder;

    const SPECIALS: SpecialTokens = SpecialTokens::MULTILINGUAL;

    fn ts(frame: u32) -> TokenId {
        SPECIALS.timestamp_begin + frame
    }

    fn decoder() -> ByteLevelDecoder {
        // GPT-2 byte-level strings: "Ġ" is a leading space.
        let vocab: HashMap<String, TokenId> = [
            ("ĠHello", 1),
            ("Ġworld", 2),
            (",", 3),
            ("Ġwor", 4),
            ("ld", 5),
            ("!", 6),
            ("Ġ-", 7),
            ("Ġit", 8),
            ("'s", 9),
            // "日" is E6 97 A5 and "本" is E6 9C AC.
            ("æ", 10),
            ("Ĺ", 11),
            ("¥", 12),
            ("æľ¬", 13),
            ("ãĢĤ", 14),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        ByteLevelDecoder::from_vocab(vocab, SPECIALS)
    }

    fn texts(words: &[WordTokens]) -> Vec<&str> {
        words.iter().map(|w| w.text.as_str()).collect()
    }

    fn flatten(words: &[WordTokens]) -> Vec<TokenId> {
        words.iter().flat_map(|w| w.tokens.iter().copied()).collect()
    }

    #[test]
    fn punctuation_table_excludes_hyphen_and_apostrophe() {
        assert!(is_punctuation(","));
        assert!(is_punctuation("?"));
        assert!(is_punctuation(""));
        assert!(!is_punctuation("-"));
        assert!(!is_punctuation("'"));
        assert!(!is_punctuation("a"));
    }

    #[test]
    fn spaces_mode_groups_subwords_and_isolates_timestamps() {
        let tokens = [ts(0), 1, 3, 4, 5, 6, ts(50)];
        let words = split_tokens_on_spaces(&tokens, &decoder(), &SPECIALS, false);
        assert_eq!(texts(&words), ["<|0.00|>", "Hello,", "world!", "<|1.00|>"]);
        assert_eq!(words[1].tokens, vec![1, 3]);
        assert_eq!(words[2].tokens, vec![4, 5, 6]);
        assert_eq!(flatten(&words), tokens);
    }

    #[test]
    fn spaces_mode_can_drop_punctuation_text() {
        let tokens = [ts(0), 1, 3, 2, 6, ts(50)];
        let words = split_tokens_on_spaces(&tokens, &decoder(), &SPECIALS, true);
        assert_eq!(texts(&words), ["<|0.00|>", "Hello", "world", "<|1.00|>"]);
        assert_eq!(words[1].tokens, vec![1, 3]);
        assert_eq!(flatten(&words), tokens);
    }

    #[test]
    fn spaces_mode_keeps_hyphen_and_apostrophe_as_word_parts() {
        let tokens = [ts(0), 8, 9, 7, ts(10)];
        let words = split_tokens_on_spaces(&tokens, &decoder(), &SPECIALS, false);
        assert_eq!(texts(&words), ["<|0.00|>", "it's", "-", "<|0.20|>"]);
    }

    #[test]
    fn unicode_mode_waits_for_complete_characters() {
        let tokens = [ts(0), 10, 11, 12, 13, 6, 14, ts(25)];
        let words = split_tokens_on_unicode(&tokens, &decoder(), false);
        // Only ASCII punctuation is merged; the ideographic full stop is a unit.
        assert_eq!(texts(&words), ["<|0.00|>", "日", "本!", "。", "<|0.50|>"]);
        assert_eq!(words[1].tokens, vec![10, 11, 12]);
        assert_eq!(words[2].tokens, vec![13, 6]);
        assert_eq!(flatten(&words), tokens);
    }

    #[test]
    fn unicode_mode_opens_placeholder_for_leading_punctuation() {
        let words = split_tokens_on_unicode(&[6, 1], &decoder(), false);
        assert_eq!(texts(&words), ["!", " Hello"]);
        assert_eq!(words[0].tokens, vec![6]);
    }

    #[test]
    fn unicode_mode_keeps_incomplete_trailing_bytes() {
        let words = split_tokens_on_unicode(&[1, 10], &decoder(), false);
        assert_eq!(words.len(), 2);
        assert_eq!(words[1].tokens, vec![10]);
        assert!(words[1].text.contains('\u{fffd}'));
    }

    #[test]
    fn both_modes_never_lose_or_duplicate_tokens() {
        let decoder = decoder();
        let pool: Vec<TokenId> = (1..=14).collect();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let len = rng.gen_range(0..12);
            let mut tokens = vec![ts(rng.gen_range(0..100))];
            tokens.extend((0..len).map(|_| pool[rng.gen_range(0..pool.len())]));
            tokens.push(ts(rng.gen_range(100..200)));
            for remove in [false, true] {
                let spaced = split_tokens_on_spaces(&tokens, &decoder, &SPECIALS, remove);
                assert_eq!(flatten(&spaced), tokens);
                let unicode = split_tokens_on_unicode(&tokens, &decoder, remove);
                assert_eq!(flatten(&unicode), tokens);
            }
        }
    }
}
