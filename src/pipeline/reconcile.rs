use crate::alignment::consistency::ensure_increasing_positions;
use crate::config::{AlignmentConfig, SpecialTokens, HOP_LENGTH, SAMPLE_RATE_HZ};
use crate::error::AlignmentError;
use crate::pipeline::traits::TokenDecoder;
use crate::types::{AlignedSegment, DecodedSegment, TimestampedSegment, TokenId};

/// Merge aligned words into the segments reported by the decoding loop.
///
/// Words are shifted by their segment's seek offset, made monotonic over the
/// whole transcript, and each segment's `start`/`end` is moved to its first
/// and last word. An empty `decoded` list yields an empty result.
pub fn attach_words(
    decoded: Vec<DecodedSegment>,
    aligned: Vec<AlignedSegment>,
    config: &AlignmentConfig,
    specials: &SpecialTokens,
    decoder: &dyn TokenDecoder,
) -> Result<Vec<TimestampedSegment>, AlignmentError> {
    if decoded.len() != aligned.len() && !decoded.is_empty() {
        tracing::warn!(
            decoded = decoded.len(),
            aligned = aligned.len(),
            "inconsistent number of segments"
        );
        return Err(AlignmentError::SegmentCountMismatch {
            expected: decoded.len(),
            actual: aligned.len(),
        });
    }

    let refine = config.refine_precision_s;
    let mut words = Vec::new();
    let mut owners = Vec::new();
    for (index, (segment, aligned)) in decoded.iter().zip(aligned).enumerate() {
        check_same_tokens(index, &aligned.tokens, &segment.tokens, specials, decoder)?;

        let offset = segment.seek as f64 * HOP_LENGTH as f64 / f64::from(SAMPLE_RATE_HZ);
        let mut segment_words = aligned.words;
        for word in &mut segment_words {
            word.start += offset;
            word.end += offset;
        }

        if let (Some(first), Some(last)) = (segment_words.first(), segment_words.last()) {
            if first.start < segment.start - refine {
                tracing::warn!(
                    index,
                    text = segment.text.as_str(),
                    word_start = first.start,
                    segment_start = segment.start,
                    "first word starts well before its segment"
                );
            }
            if last.end > segment.end + refine {
                tracing::warn!(
                    index,
                    text = segment.text.as_str(),
                    word_end = last.end,
                    segment_end = segment.end,
                    "last word ends well after its segment"
                );
            }
        }

        owners.extend(std::iter::repeat(index).take(segment_words.len()));
        words.extend(segment_words);
    }

    ensure_increasing_positions(&mut words, config.min_word_duration_s)?;

    let mut merged: Vec<TimestampedSegment> = decoded
        .into_iter()
        .map(|segment| TimestampedSegment {
            seek: segment.seek,
            start: segment.start,
            end: segment.end,
            text: segment.text,
            tokens: segment.tokens,
            words: Vec::new(),
        })
        .collect();
    for (word, index) in words.into_iter().zip(owners) {
        let segment = &mut merged[index];
        if segment.words.is_empty() {
            segment.start = word.start;
        }
        segment.end = word.end;
        segment.words.push(word);
    }
    Ok(merged)
}

/// Both token lists without leading/trailing control markers must agree, or
/// ours must be a strict prefix of the decoder's.
fn check_same_tokens(
    index: usize,
    aligned: &[TokenId],
    decoded: &[TokenId],
    specials: &SpecialTokens,
    decoder: &dyn TokenDecoder,
) -> Result<(), AlignmentError> {
    let ours = trim_control_markers(aligned, specials);
    let theirs = trim_control_markers(decoded, specials);
    if ours == theirs {
        return Ok(());
    }

    let aligned_text = decoder.decode_with_timestamps(ours);
    let decoded_text = decoder.decode_with_timestamps(theirs);
    tracing::warn!(
        index,
        aligned = aligned_text.as_str(),
        decoded = decoded_text.as_str(),
        "got inconsistent segments"
    );
    if ours.len() < theirs.len() && theirs.starts_with(ours) {
        return Ok(());
    }
    Err(AlignmentError::SegmentMismatch {
        index,
        aligned: aligned_text,
        decoded: decoded_text,
    })
}

fn trim_control_markers<'a>(tokens: &'a [TokenId], specials: &SpecialTokens) -> &'a [TokenId] {
    let floor = specials.special_floor();
    let start = tokens
        .iter()
        .position(|&t| t < floor)
        .unwrap_or(tokens.len());
    let end = tokens
        .iter()
        .rposition(|&t| t < floor)
        .map_or(start, |i| i + 1);
    &tokens[start..end]
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::pipeline::vocab::ByteLevelDecoder;
    use crate::types::WordTiming;

    const SPECIALS: SpecialTokens = SpecialTokens::MULTILINGUAL;

    fn ts(frame: u32) -> TokenId {
        SPECIALS.timestamp_begin + frame
    }

    fn decoder() -> ByteLevelDecoder {
        let vocab: HashMap<String, TokenId> = [("ĠHello", 1), ("Ġworld", 2), ("Ġagain", 3)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ByteLevelDecoder::from_vocab(vocab, SPECIALS)
    }

    fn decoded(seek: usize, start: f64, end: f64, tokens: Vec<TokenId>) -> DecodedSegment {
        DecodedSegment {
            seek,
            start,
            end,
            text: decoder().decode_with_timestamps(&tokens),
            tokens,
        }
    }

    fn aligned(tokens: Vec<TokenId>, words: &[(&str, f64, f64)]) -> AlignedSegment {
        AlignedSegment {
            tokens,
            words: words
                .iter()
                .map(|&(text, start, end)| WordTiming::new(text, start, end))
                .collect(),
        }
    }

    #[test]
    fn trims_only_outer_control_markers() {
        let tokens = [ts(0), 1, SPECIALS.eot, 2, ts(50), SPECIALS.eot];
        assert_eq!(trim_control_markers(&tokens, &SPECIALS), &[1, SPECIALS.eot, 2]);
        assert!(trim_control_markers(&[ts(0), ts(1)], &SPECIALS).is_empty());
    }

    #[test]
    fn words_are_shifted_by_seek_and_bound_segments() {
        let result = attach_words(
            vec![
                decoded(0, 0.0, 1.0, vec![ts(0), 1, ts(50)]),
                decoded(3000, 30.0, 31.0, vec![ts(0), 2, ts(50)]),
            ],
            vec![
                aligned(vec![ts(0), 1, ts(50)], &[("Hello", 0.1, 0.9)]),
                aligned(vec![ts(0), 2, ts(50)], &[("world", 0.2, 0.8)]),
            ],
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].words, vec![WordTiming::new("Hello", 0.1, 0.9)]);
        assert_eq!((result[0].start, result[0].end), (0.1, 0.9));
        assert_eq!(result[1].words, vec![WordTiming::new("world", 30.2, 30.8)]);
        assert_eq!((result[1].start, result[1].end), (30.2, 30.8));
    }

    #[test]
    fn overlapping_segments_are_made_monotonic() {
        let result = attach_words(
            vec![
                decoded(0, 0.0, 2.0, vec![ts(0), 1, ts(100)]),
                decoded(0, 1.5, 3.0, vec![ts(75), 2, ts(150)]),
            ],
            vec![
                aligned(vec![ts(0), 1, ts(100)], &[("Hello", 0.0, 2.0)]),
                aligned(vec![ts(75), 2, ts(150)], &[("world", 1.5, 3.0)]),
            ],
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap();
        assert_eq!(result[0].end, 1.75);
        assert_eq!(result[1].start, 1.75);
        assert!(result[1].start >= result[0].end);
    }

    #[test]
    fn segment_without_words_keeps_its_bounds() {
        let result = attach_words(
            vec![decoded(0, 0.0, 1.0, vec![ts(0), 1, ts(50)])],
            vec![aligned(vec![ts(0), 1, ts(50)], &[])],
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap();
        assert!(result[0].words.is_empty());
        assert_eq!((result[0].start, result[0].end), (0.0, 1.0));
    }

    #[test]
    fn strict_prefix_is_accepted() {
        let result = attach_words(
            vec![decoded(0, 0.0, 1.0, vec![ts(0), 1, 2, ts(50)])],
            vec![aligned(vec![ts(0), 1], &[("Hello", 0.0, 0.5)])],
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn diverging_tokens_are_rejected() {
        let err = attach_words(
            vec![decoded(0, 0.0, 1.0, vec![ts(0), 1, 3, ts(50)])],
            vec![aligned(vec![ts(0), 1, 2, ts(50)], &[("Hello", 0.0, 0.5)])],
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap_err();
        match err {
            AlignmentError::SegmentMismatch {
                index,
                aligned,
                decoded,
            } => {
                assert_eq!(index, 0);
                assert_eq!(aligned, " Hello world");
                assert_eq!(decoded, " Hello again");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn segment_count_mismatch_is_fatal_unless_decoder_reported_none() {
        let ours = vec![aligned(vec![ts(0), 1, ts(50)], &[("Hello", 0.0, 0.5)])];
        let err = attach_words(
            vec![
                decoded(0, 0.0, 1.0, vec![ts(0), 1, ts(50)]),
                decoded(0, 1.0, 2.0, vec![ts(50), 2, ts(100)]),
            ],
            ours.clone(),
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AlignmentError::SegmentCountMismatch {
                expected: 2,
                actual: 1
            }
        ));

        let empty = attach_words(
            Vec::new(),
            ours,
            &AlignmentConfig::default(),
            &SPECIALS,
            &decoder(),
        )
        .unwrap();
        assert!(empty.is_empty());
    }
}
