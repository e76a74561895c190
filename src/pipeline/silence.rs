use crate::config::AlignmentConfig;
use crate::error::AlignmentError;
use crate::types::TokenId;

/// Per-window statistics feeding the silence filter.
///
/// One output distribution is recorded per decoding step once decoding has
/// started. Its log-softmax normalizer is held until the next sampled token
/// tells which entry was chosen; the distribution still pending when the
/// window closes scores the implicit end-of-transcript token.
#[derive(Debug, Default)]
pub struct WindowStats {
    no_speech_prob: Option<f64>,
    token_logprobs: Vec<f64>,
    pending: Option<PendingDistribution>,
    distributions: usize,
    sampled_tokens: usize,
}

#[derive(Debug)]
struct PendingDistribution {
    logits: Vec<f32>,
    log_norm: f64,
}

impl PendingDistribution {
    fn logprob(&self, token: TokenId) -> Result<f64, AlignmentError> {
        let logit = self.logits.get(token as usize).ok_or_else(|| {
            AlignmentError::window_stats(format!(
                "token {token} outside a distribution of {} logits",
                self.logits.len()
            ))
        })?;
        Ok(f64::from(*logit) - self.log_norm)
    }
}

impl WindowStats {
    pub fn no_speech_prob(&self) -> Option<f64> {
        self.no_speech_prob
    }

    /// Softmax probability of `no_speech` from the logits at the SOT position.
    pub fn record_no_speech(
        &mut self,
        logits: &[f32],
        no_speech: TokenId,
    ) -> Result<(), AlignmentError> {
        let logit = logits.get(no_speech as usize).ok_or_else(|| {
            AlignmentError::window_stats(format!(
                "no-speech token {no_speech} outside a distribution of {} logits",
                logits.len()
            ))
        })?;
        let prob = (f64::from(*logit) - log_sum_exp(logits)).exp();
        if !prob.is_finite() {
            return Err(AlignmentError::window_stats("non-finite no-speech probability"));
        }
        self.no_speech_prob = Some(prob);
        Ok(())
    }

    /// Distribution over the token about to be sampled.
    pub fn record_distribution(&mut self, logits: &[f32]) -> Result<(), AlignmentError> {
        if self.pending.is_some() {
            return Err(AlignmentError::window_stats(
                "two output distributions without a sampled token in between",
            ));
        }
        self.pending = Some(PendingDistribution {
            log_norm: log_sum_exp(logits),
            logits: logits.to_vec(),
        });
        self.distributions += 1;
        Ok(())
    }

    pub fn record_token(&mut self, token: TokenId) -> Result<(), AlignmentError> {
        self.sampled_tokens += 1;
        if let Some(pending) = self.pending.take() {
            self.token_logprobs.push(pending.logprob(token)?);
        }
        Ok(())
    }

    /// Mean log-probability of the sampled tokens plus the closing `eot`.
    pub fn average_logprob(&self, eot: TokenId) -> Result<f64, AlignmentError> {
        if self.distributions != self.sampled_tokens + 1 {
            return Err(AlignmentError::window_stats(format!(
                "{} output distributions for {} sampled tokens plus end of transcript",
                self.distributions, self.sampled_tokens
            )));
        }
        let Some(pending) = &self.pending else {
            return Err(AlignmentError::window_stats(
                "no output distribution left for the end of transcript",
            ));
        };
        let closing = pending.logprob(eot)?;
        let logprobs = self.token_logprobs.iter().copied().chain(std::iter::once(closing));
        let mut sum = 0.0;
        let mut count = 0usize;
        for logprob in logprobs {
            if !logprob.is_finite() {
                return Err(AlignmentError::window_stats("got non-finite log-probability"));
            }
            sum += logprob;
            count += 1;
        }
        Ok(sum / count as f64)
    }
}

/// Numerically stable `ln(sum(exp(x)))` in `f64`.
fn log_sum_exp(logits: &[f32]) -> f64 {
    let max = logits
        .iter()
        .map(|&x| f64::from(x))
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = logits.iter().map(|&x| (f64::from(x) - max).exp()).sum();
    max + sum.ln()
}

/// Decides whether a closed window was silence that the decoder transcribed
/// anyway.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceFilter {
    pub no_speech_threshold: Option<f64>,
    pub logprob_threshold: Option<f64>,
}

impl SilenceFilter {
    pub fn from_config(config: &AlignmentConfig) -> Self {
        Self {
            no_speech_threshold: config.no_speech_threshold,
            logprob_threshold: config.logprob_threshold,
        }
    }

    /// Statistics are only gathered when a no-speech threshold is set.
    pub fn is_enabled(&self) -> bool {
        self.no_speech_threshold.is_some()
    }

    /// Whether the window's segments must be dropped.
    ///
    /// A window is skipped when its no-speech probability exceeds the
    /// threshold, unless a log-probability threshold is set and the average
    /// log-probability of its tokens is above it.
    pub fn should_skip(&self, stats: &WindowStats, eot: TokenId) -> Result<bool, AlignmentError> {
        let Some(no_speech_threshold) = self.no_speech_threshold else {
            return Ok(false);
        };
        let no_speech_prob = stats
            .no_speech_prob
            .ok_or(AlignmentError::MissingNoSpeechProbability)?;
        if no_speech_prob <= no_speech_threshold {
            return Ok(false);
        }

        let Some(logprob_threshold) = self.logprob_threshold else {
            return Ok(true);
        };
        let avg_logprob = stats.average_logprob(eot)?;
        tracing::debug!(
            no_speech_prob,
            no_speech_threshold,
            avg_logprob,
            logprob_threshold,
            "silence filter: window above no-speech threshold"
        );
        Ok(avg_logprob <= logprob_threshold)
    }
}
