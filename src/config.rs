use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AlignmentError;
use crate::types::TokenId;

/// Seconds covered by one cross-attention frame (two mel hops of 10 ms).
pub const AUDIO_TIME_PER_FRAME: f64 = 0.02;
pub const SAMPLE_RATE_HZ: u32 = 16_000;
/// Mel hop length in samples; decoder seek positions are counted in hops.
pub const HOP_LENGTH: usize = 160;

const UNICODE_SEGMENTED_LANGUAGES: [(&str, &str); 5] = [
    ("zh", "chinese"),
    ("ja", "japanese"),
    ("th", "thai"),
    ("lo", "lao"),
    ("my", "burmese"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Words are delimited by a leading space on the decoded unit.
    #[default]
    Spaces,
    /// Every cleanly decodable unit is a word (scripts without spaces).
    Unicode,
}

impl SegmentationMode {
    /// Pick the segmentation used for a language code or English language name.
    pub fn for_language(language: Option<&str>) -> Self {
        let Some(language) = language else {
            return Self::Spaces;
        };
        let language = language.to_lowercase();
        if UNICODE_SEGMENTED_LANGUAGES
            .iter()
            .any(|(code, name)| language == *code || language == *name)
        {
            Self::Unicode
        } else {
            Self::Spaces
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// How far segment boundaries may be refined, in seconds. Multiple of 0.02.
    pub refine_precision_s: f64,
    pub min_word_duration_s: f64,
    pub medfilt_width: usize,
    pub qk_scale: f64,
    /// Average only the last `n` decoder layers.
    pub top_layers: Option<usize>,
    pub segmentation: SegmentationMode,
    pub remove_punctuation_from_words: bool,
    pub no_speech_threshold: Option<f64>,
    pub logprob_threshold: Option<f64>,
}

impl AlignmentConfig {
    pub const DEFAULT_REFINE_PRECISION_S: f64 = 0.5;
    pub const DEFAULT_MIN_WORD_DURATION_S: f64 = 0.1;
    pub const DEFAULT_MEDFILT_WIDTH: usize = 9;

    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read alignment config", e))?;
        serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse alignment config", e))
    }

    /// Refinement margin in attention frames.
    pub fn refine_frames(&self) -> Result<usize, AlignmentError> {
        let frames = self.refine_precision_s / AUDIO_TIME_PER_FRAME;
        if !(self.refine_precision_s >= 0.0) || (frames - frames.round()).abs() > 1e-6 {
            return Err(AlignmentError::invalid_config(format!(
                "refine_precision_s must be a non-negative multiple of {AUDIO_TIME_PER_FRAME}, got {}",
                self.refine_precision_s
            )));
        }
        Ok(frames.round() as usize)
    }

    pub fn validate(&self) -> Result<(), AlignmentError> {
        self.refine_frames()?;
        if !(self.min_word_duration_s >= 0.01) {
            return Err(AlignmentError::invalid_config(format!(
                "min_word_duration_s must be at least 0.01, got {}",
                self.min_word_duration_s
            )));
        }
        if self.medfilt_width == 0 || self.medfilt_width % 2 == 0 {
            return Err(AlignmentError::invalid_config(format!(
                "medfilt_width must be odd, got {}",
                self.medfilt_width
            )));
        }
        if !self.qk_scale.is_finite() || self.qk_scale <= 0.0 {
            return Err(AlignmentError::invalid_config(format!(
                "qk_scale must be positive, got {}",
                self.qk_scale
            )));
        }
        if self.top_layers == Some(0) {
            return Err(AlignmentError::invalid_config("top_layers must be at least 1"));
        }
        if self.no_speech_threshold.is_some_and(|t| !t.is_finite())
            || self.logprob_threshold.is_some_and(|t| !t.is_finite())
        {
            return Err(AlignmentError::invalid_config("thresholds must be finite"));
        }
        Ok(())
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            refine_precision_s: Self::DEFAULT_REFINE_PRECISION_S,
            min_word_duration_s: Self::DEFAULT_MIN_WORD_DURATION_S,
            medfilt_width: Self::DEFAULT_MEDFILT_WIDTH,
            qk_scale: 1.0,
            top_layers: None,
            segmentation: SegmentationMode::Spaces,
            remove_punctuation_from_words: false,
            no_speech_threshold: Some(0.6),
            logprob_threshold: Some(-1.0),
        }
    }
}

/// Reserved token ids of the decoder vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub eot: TokenId,
    pub sot: TokenId,
    pub no_speech: TokenId,
    pub timestamp_begin: TokenId,
}

impl SpecialTokens {
    pub const MULTILINGUAL: Self = Self {
        eot: 50257,
        sot: 50258,
        no_speech: 50362,
        timestamp_begin: 50364,
    };

    pub const ENGLISH_ONLY: Self = Self {
        eot: 50256,
        sot: 50257,
        no_speech: 50361,
        timestamp_begin: 50363,
    };

    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read special tokens", e))?;
        serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse special tokens", e))
    }

    pub fn is_timestamp(&self, token: TokenId) -> bool {
        token >= self.timestamp_begin
    }

    /// Control markers, timestamps included.
    pub fn is_special(&self, token: TokenId) -> bool {
        token >= self.eot
    }

    pub fn timestamp_frame(&self, token: TokenId) -> Option<usize> {
        self.is_timestamp(token)
            .then(|| (token - self.timestamp_begin) as usize)
    }

    /// Lowest id of the control range, used to trim segment edges.
    pub(crate) fn special_floor(&self) -> TokenId {
        self.sot.min(self.eot)
    }
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self::MULTILINGUAL
    }
}
