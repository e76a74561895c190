use candle_core::Tensor;

use crate::alignment::engine::SegmentAligner;
use crate::config::AlignmentConfig;
use crate::error::AlignmentError;
use crate::pipeline::reconcile::attach_words;
use crate::pipeline::silence::{SilenceFilter, WindowStats};
use crate::types::{AlignedSegment, DecodedSegment, TimestampedSegment, TokenId, WordTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No prompt has been seen yet.
    AwaitingPrompt,
    /// Buffering a segment whose last token is not a timestamp.
    Accumulating,
    /// The last buffered token is a timestamp; another one closes the segment.
    FlushPending,
    /// `finalize` has run.
    WindowClosed,
}

/// Collects decoder events and turns them into word-aligned segments.
///
/// The decoding loop reports every step in order: `on_token` with the
/// step's input tokens (the whole prompt at the start of a 30-second window,
/// then one sampled token per step), `on_attention` once per decoder layer
/// with that step's cross-attention, and, when a no-speech threshold is
/// configured, `on_output_logits` with the step's output logits. On a prompt
/// step the logits at the start-of-transcript position are reported with
/// `is_sot_position = true` in addition to the logits of the last position.
pub struct SegmentAccumulator {
    aligner: SegmentAligner,
    silence: SilenceFilter,
    config: AlignmentConfig,
    /// Open segment: an anchor token followed by the segment's tokens.
    tokens: Vec<TokenId>,
    /// Per layer, one `(heads, 1, frames)` slice per buffered token, in the
    /// decoder's dtype and on its device.
    attention: Vec<Vec<Tensor>>,
    segments: Vec<AlignedSegment>,
    /// Index of the first segment produced in the current window.
    window_start: usize,
    saw_consecutive_timestamps: bool,
    has_started: bool,
    prompt_step: bool,
    stats: WindowStats,
    finalized: bool,
}

impl SegmentAccumulator {
    pub(crate) fn new(aligner: SegmentAligner, config: AlignmentConfig) -> Self {
        Self {
            aligner,
            silence: SilenceFilter::from_config(&config),
            config,
            tokens: Vec::new(),
            attention: Vec::new(),
            segments: Vec::new(),
            window_start: 0,
            saw_consecutive_timestamps: true,
            has_started: false,
            prompt_step: false,
            stats: WindowStats::default(),
            finalized: false,
        }
    }

    pub fn state(&self) -> AccumulatorState {
        if self.finalized {
            AccumulatorState::WindowClosed
        } else if !self.has_started {
            AccumulatorState::AwaitingPrompt
        } else if self
            .tokens
            .last()
            .is_some_and(|&t| self.aligner.specials().is_timestamp(t))
        {
            AccumulatorState::FlushPending
        } else {
            AccumulatorState::Accumulating
        }
    }

    /// Segments finalized so far; the last window may still drop some.
    pub fn segments(&self) -> &[AlignedSegment] {
        &self.segments
    }

    pub fn open_tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn on_token(&mut self, tokens: &[TokenId]) -> Result<(), AlignmentError> {
        self.ensure_open()?;
        let Some(&last) = tokens.last() else {
            return Err(AlignmentError::invalid_input("decoding step without tokens"));
        };
        let is_prompt = tokens.len() > 1;

        self.maybe_flush(Some(tokens))?;
        self.tokens.push(last);

        if is_prompt {
            self.has_started = true;
        } else if self.has_started && self.silence.is_enabled() {
            self.stats.record_token(last)?;
        }
        self.prompt_step = is_prompt;
        Ok(())
    }

    /// Cross-attention of one decoder layer for the current step, shaped
    /// `(heads, queries, frames)` or `(1, heads, queries, frames)`.
    pub fn on_attention(&mut self, layer: usize, weights: &Tensor) -> Result<(), AlignmentError> {
        self.ensure_open()?;
        let weights = match weights.rank() {
            3 => weights.clone(),
            4 if weights.dim(0).ok() == Some(1) => weights
                .squeeze(0)
                .map_err(|e| AlignmentError::runtime("attention squeeze", e))?,
            _ => {
                return Err(AlignmentError::invalid_input(format!(
                    "attention weights must be (heads, queries, frames) or (1, heads, queries, frames), got {:?}",
                    weights.dims()
                )))
            }
        };
        let (_heads, queries, _frames) = weights
            .dims3()
            .map_err(|e| AlignmentError::runtime("attention shape", e))?;
        if queries == 0 {
            return Err(AlignmentError::invalid_input("attention weights without queries"));
        }
        // Own copy of the last query so the prompt step's storage is released.
        let step = weights
            .narrow(1, queries - 1, 1)
            .and_then(|w| w.contiguous())
            .map_err(|e| AlignmentError::runtime("attention last query", e))?;

        if self.attention.len() <= layer {
            self.attention.resize_with(layer + 1, Vec::new);
        }
        let steps = &mut self.attention[layer];
        if steps.len() >= self.tokens.len() {
            return Err(AlignmentError::AttentionMismatch {
                segment: self.aligner.describe(&self.tokens),
                message: format!(
                    "layer {layer} got {} attention steps for {} tokens",
                    steps.len() + 1,
                    self.tokens.len()
                ),
            });
        }
        steps.push(step);
        Ok(())
    }

    pub fn on_output_logits(
        &mut self,
        logits: &[f32],
        is_sot_position: bool,
    ) -> Result<(), AlignmentError> {
        self.ensure_open()?;
        if !self.silence.is_enabled() {
            return Ok(());
        }
        if is_sot_position {
            if !self.prompt_step {
                return Err(AlignmentError::invalid_input(
                    "start-of-transcript logits reported outside a prompt step",
                ));
            }
            self.stats
                .record_no_speech(logits, self.aligner.specials().no_speech)?;
        } else if self.has_started {
            self.stats.record_distribution(logits)?;
        }
        Ok(())
    }

    /// Flush the open segment, close the last window and return all segments.
    pub fn finalize(&mut self) -> Result<Vec<AlignedSegment>, AlignmentError> {
        self.ensure_open()?;
        self.maybe_flush(None)?;
        self.finalized = true;
        self.tokens.clear();
        self.attention.clear();
        Ok(std::mem::take(&mut self.segments))
    }

    /// Finalize and merge the words into the decoding loop's own segments,
    /// shifting them by each segment's seek offset.
    pub fn finalize_into(
        &mut self,
        decoded: Vec<DecodedSegment>,
    ) -> Result<Vec<TimestampedSegment>, AlignmentError> {
        let aligned = self.finalize()?;
        attach_words(
            decoded,
            aligned,
            &self.config,
            self.aligner.specials(),
            self.aligner.decoder(),
        )
    }

    fn ensure_open(&self) -> Result<(), AlignmentError> {
        if self.finalized {
            Err(AlignmentError::Finalized)
        } else {
            Ok(())
        }
    }

    /// `incoming` is the step's tokens, or `None` when decoding is over.
    fn maybe_flush(&mut self, incoming: Option<&[TokenId]>) -> Result<(), AlignmentError> {
        let single = matches!(incoming, Some([_]));
        if self.must_flush(incoming) {
            let words = self.align_open_segment()?;
            if words.is_empty() {
                tracing::debug!("segment not added");
                self.restart_buffer(false);
            } else {
                let segment = AlignedSegment {
                    tokens: self.tokens[1..].to_vec(),
                    words,
                };
                tracing::debug!(
                    index = self.segments.len(),
                    segment = self.aligner.describe(&segment.tokens).as_str(),
                    words = segment.words.len(),
                    "added segment"
                );
                self.segments.push(segment);
                self.restart_buffer(single);
            }
        }

        if !single {
            self.close_window()?;
        }
        Ok(())
    }

    fn must_flush(&mut self, incoming: Option<&[TokenId]>) -> bool {
        let specials = *self.aligner.specials();
        if let Some(&[token]) = incoming {
            let consecutive = specials.is_timestamp(token)
                && self
                    .tokens
                    .last()
                    .is_some_and(|&last| specials.is_timestamp(last));
            if consecutive {
                self.saw_consecutive_timestamps = true;
            }
            return consecutive;
        }

        let flush = !self.saw_consecutive_timestamps;
        tracing::debug!(flush, "new prompt");
        if !flush {
            // What followed the last timestamp pair is decoded again.
            self.restart_buffer(false);
        }
        self.saw_consecutive_timestamps = false;
        flush
    }

    fn restart_buffer(&mut self, keep_last: bool) {
        if keep_last {
            if let Some(&last) = self.tokens.last() {
                self.tokens = vec![last];
            }
            for steps in &mut self.attention {
                let keep_from = steps.len().saturating_sub(1);
                steps.drain(..keep_from);
            }
        } else {
            self.tokens.clear();
            self.attention.iter_mut().for_each(Vec::clear);
        }
    }

    fn align_open_segment(&self) -> Result<Vec<WordTiming>, AlignmentError> {
        let steps = self.tokens.len();
        if steps <= 1 {
            tracing::debug!("no tokens after the anchor, nothing to align");
            return Ok(Vec::new());
        }
        if self.attention.is_empty() {
            return Err(AlignmentError::AttentionMismatch {
                segment: self.aligner.describe(&self.tokens[1..]),
                message: "no cross-attention was reported".to_string(),
            });
        }

        let mut layers = Vec::with_capacity(self.attention.len());
        for (layer, per_step) in self.attention.iter().enumerate() {
            if per_step.len() != steps {
                return Err(AlignmentError::AttentionMismatch {
                    segment: self.aligner.describe(&self.tokens[1..]),
                    message: format!(
                        "layer {layer} has {} attention steps for {steps} tokens",
                        per_step.len()
                    ),
                });
            }
            // Each token is aligned with the step that produced it.
            let layer_weights = Tensor::cat(&per_step[..steps - 1], 1)
                .map_err(|e| AlignmentError::runtime("stack attention steps", e))?;
            layers.push(layer_weights);
        }
        let weights = Tensor::stack(&layers, 0)
            .map_err(|e| AlignmentError::runtime("stack attention layers", e))?;

        self.aligner.align(&self.tokens[1..], &weights)
    }

    /// Close the current 30-second window and apply the silence filter.
    fn close_window(&mut self) -> Result<(), AlignmentError> {
        if !self.has_started {
            self.window_start = self.segments.len();
            return Ok(());
        }

        let window_start = self.window_start;
        let stats = std::mem::take(&mut self.stats);
        let eot = self.aligner.specials().eot;
        if self.silence.should_skip(&stats, eot)? {
            tracing::debug!(
                dropped = self.segments.len().saturating_sub(window_start),
                no_speech_prob = stats.no_speech_prob(),
                "skipping segments of a silent window"
            );
            self.segments.truncate(window_start);
        }
        self.window_start = self.segments.len();
        Ok(())
    }
}
