use candle_core::Tensor;

use crate::alignment::attention::{attention_cost_matrix, CostMatrixParams};
use crate::alignment::dtw::token_start_frames;
use crate::config::{SpecialTokens, AUDIO_TIME_PER_FRAME};
use crate::error::AlignmentError;
use crate::pipeline::traits::{SequenceAligner, TokenDecoder, WordSegmenter};
use crate::types::{TokenId, WordTiming, WordTokens};


/// A too-long segment is truncated once to fit its window; the extra
/// attempts only absorb a window that changes with the truncated tokens.
const MAX_ALIGNMENT_ATTEMPTS: usize = 3;

/// Forced alignment of one segment's tokens against its cross-attention.
pub struct SegmentAligner {
    specials: SpecialTokens,
    refine_frames: usize,
    cost_params: CostMatrixParams,
    remove_punctuation: bool,
    decoder: Box<dyn TokenDecoder>,
    sequence_aligner: Box<dyn SequenceAligner>,
    word_segmenter: Box<dyn WordSegmenter>,
}

pub(crate) struct SegmentAlignerParts {
    pub specials: SpecialTokens,
    pub refine_frames: usize,
    pub cost_params: CostMatrixParams,
    pub remove_punctuation: bool,
    pub decoder: Box<dyn TokenDecoder>,
    pub sequence_aligner: Box<dyn SequenceAligner>,
    pub word_segmenter: Box<dyn WordSegmenter>,
}

enum FrameWindow {
    /// No usable end marker: one empty word at the start marker.
    Placeholder(WordTiming),
    /// Zero-length segment without refinement headroom.
    Empty,
    Frames { start: usize, end: usize },
}

impl SegmentAligner {
    pub(crate) fn from_parts(parts: SegmentAlignerParts) -> Self {
        Self {
            specials: parts.specials,
            refine_frames: parts.refine_frames,
            cost_params: parts.cost_params,
            remove_punctuation: parts.remove_punctuation,
            decoder: parts.decoder,
            sequence_aligner: parts.sequence_aligner,
            word_segmenter: parts.word_segmenter,
        }
    }

    pub fn decoder(&self) -> &dyn TokenDecoder {
        self.decoder.as_ref()
    }

    pub fn specials(&self) -> &SpecialTokens {
        &self.specials
    }

    pub fn refine_frames(&self) -> usize {
        self.refine_frames
    }

    /// Align one segment.
    ///
    /// `tokens` starts with a timestamp marker and normally ends with one;
    /// `weights` is `(layers, heads, tokens, frames)`. Returned times are in
    /// seconds relative to the decoding window, rounded to centiseconds.
    pub fn align(
        &self,
        tokens: &[TokenId],
        weights: &Tensor,
    ) -> Result<Vec<WordTiming>, AlignmentError> {
        if tokens.is_empty() {
            return Err(AlignmentError::EmptySegment);
        }

        let mut tokens = tokens.to_vec();
        let mut weights = weights.clone();
        for _ in 0..MAX_ALIGNMENT_ATTEMPTS {
            let (_layers, _heads, rows, frames) = weights
                .dims4()
                .map_err(|e| AlignmentError::runtime("attention shape", e))?;
            if rows != tokens.len() {
                return Err(AlignmentError::AttentionMismatch {
                    segment: self.describe(&tokens),
                    message: format!("{rows} attention rows for {} tokens", tokens.len()),
                });
            }

            let (start, end) = match self.frame_window(&tokens, frames)? {
                FrameWindow::Placeholder(word) => return Ok(vec![word]),
                FrameWindow::Empty => return Ok(Vec::new()),
                FrameWindow::Frames { start, end } => (start, end),
            };

            let num_frames = end - start;
            if tokens.len() > num_frames {
                tracing::warn!(
                    num_tokens = tokens.len(),
                    num_frames,
                    segment = self.describe(&tokens).as_str(),
                    "alignment: too many tokens for the number of frames, truncating"
                );
                (tokens, weights) = truncate_to_frames(&tokens, &weights, num_frames)?;
                continue;
            }

            return self.align_window(&tokens, &weights, start, end);
        }

        Err(AlignmentError::AttentionMismatch {
            segment: self.describe(&tokens),
            message: "token run still exceeds the frame window after truncation".to_string(),
        })
    }

    fn frame_window(
        &self,
        tokens: &[TokenId],
        available_frames: usize,
    ) -> Result<FrameWindow, AlignmentError> {
        let start = self.specials.timestamp_frame(tokens[0]).ok_or_else(|| {
            AlignmentError::MissingStartTimestamp {
                segment: self.describe(tokens),
            }
        })?;

        let end = match tokens {
            [_, .., last] => self.specials.timestamp_frame(*last),
            _ => None,
        };
        let Some(end) = end else {
            tracing::debug!(
                segment = self.describe(tokens).as_str(),
                "alignment: missing end timestamp, emitting placeholder word"
            );
            let at = start as f64 * AUDIO_TIME_PER_FRAME;
            return Ok(FrameWindow::Placeholder(WordTiming::new("", at, at)));
        };

        if end == start && self.refine_frames == 0 {
            tracing::debug!(
                segment = self.describe(tokens).as_str(),
                "alignment: empty segment"
            );
            return Ok(FrameWindow::Empty);
        }

        if end > available_frames {
            return Err(AlignmentError::AttentionMismatch {
                segment: self.describe(tokens),
                message: format!("end frame {end} beyond {available_frames} attention frames"),
            });
        }

        let refined_start = start.saturating_sub(self.refine_frames);
        let refined_end = (end + self.refine_frames).min(available_frames);
        if refined_end <= refined_start {
            return Err(AlignmentError::DegenerateWindow {
                segment: self.describe(tokens),
                start_frame: refined_start,
                end_frame: refined_end,
            });
        }
        Ok(FrameWindow::Frames {
            start: refined_start,
            end: refined_end,
        })
    }

    fn align_window(
        &self,
        tokens: &[TokenId],
        weights: &Tensor,
        start: usize,
        end: usize,
    ) -> Result<Vec<WordTiming>, AlignmentError> {
        let words =
            self.word_segmenter
                .split_words(tokens, self.decoder.as_ref(), self.remove_punctuation);
        let spanned: usize = words.iter().map(|w| w.tokens.len()).sum();
        if spanned != tokens.len() {
            return Err(AlignmentError::runtime(
                "word segmentation",
                format!("words span {spanned} tokens, segment has {}", tokens.len()),
            ));
        }

        let cost = attention_cost_matrix(weights, start, end, self.cost_params)?;
        let path = self.sequence_aligner.align_path(&cost)?;

        let mut jump_times: Vec<f64> = token_start_frames(&path)
            .into_iter()
            .map(|frame| frame as f64 * AUDIO_TIME_PER_FRAME)
            .collect();
        if jump_times.len() != tokens.len() {
            return Err(AlignmentError::runtime(
                "alignment path",
                format!(
                    "path enters {} tokens, segment has {}",
                    jump_times.len(),
                    tokens.len()
                ),
            ));
        }
        jump_times.push((end - start) as f64 * AUDIO_TIME_PER_FRAME);

        let (mut begin_times, mut end_times) = word_boundaries(&words, &jump_times);
        let n = words.len();
        if self.refine_frames == 0 && n >= 2 {
            // Without refinement headroom the segment markers are the edges.
            begin_times[1] = begin_times[0];
            end_times[n - 2] = end_times[n - 1];
        }

        let offset = start as f64 * AUDIO_TIME_PER_FRAME;
        Ok(words
            .into_iter()
            .zip(begin_times.into_iter().zip(end_times))
            .skip(1)
            .take(n.saturating_sub(2))
            .filter(|(word, _)| !self.is_control_word(word))
            .map(|(word, (begin, end))| WordTiming::new(word.text, begin + offset, end + offset))
            .collect())
    }

    fn is_control_word(&self, word: &WordTokens) -> bool {
        word.tokens
            .first()
            .is_some_and(|&token| self.specials.is_special(token))
    }

    pub(crate) fn describe(&self, tokens: &[TokenId]) -> String {
        self.decoder.decode_with_timestamps(tokens)
    }
}

/// Start/end time of every word from the per-token jump times.
fn word_boundaries(words: &[WordTokens], jump_times: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut begin_times = Vec::with_capacity(words.len());
    let mut end_times = Vec::with_capacity(words.len());
    let mut offset = 0;
    for word in words {
        begin_times.push(jump_times[offset]);
        offset += word.tokens.len();
        end_times.push(jump_times[offset]);
    }
    (begin_times, end_times)
}

/// Keep the first `frames - 1` tokens and the terminal one, with their rows.
fn truncate_to_frames(
    tokens: &[TokenId],
    weights: &Tensor,
    frames: usize,
) -> Result<(Vec<TokenId>, Tensor), AlignmentError> {
    let keep = frames.saturating_sub(1);
    let last = tokens.len() - 1;
    let mut truncated = tokens[..keep].to_vec();
    truncated.push(tokens[last]);

    let tail = weights
        .narrow(2, last, 1)
        .map_err(|e| AlignmentError::runtime("truncate attention", e))?;
    let weights = if keep == 0 {
        tail
    } else {
        let head = weights
            .narrow(2, 0, keep)
            .map_err(|e| AlignmentError::runtime("truncate attention", e))?;
        Tensor::cat(&[&head, &tail], 2)
            .map_err(|e| AlignmentError::runtime("truncate attention", e))?
    };
    Ok((truncated, weights))
}
