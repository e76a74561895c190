use serde::{Deserialize, Serialize};

pub type TokenId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    /// Seconds, rounded to two decimals.
    pub start: f64,
    /// Seconds, rounded to two decimals.
    pub end: f64,
}

impl WordTiming {
    pub fn new(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start: round_centis(start),
            end: round_centis(end),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A word as produced by the segmenter: decoded text plus the tokens it spans.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WordTokens {
    pub text: String,
    pub tokens: Vec<TokenId>,
}

/// A finalized segment: its tokens (without the leading anchor) and its words.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSegment {
    pub tokens: Vec<TokenId>,
    pub words: Vec<WordTiming>,
}

/// A segment as reported by the decoding loop itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedSegment {
    /// Window start in mel hops.
    pub seek: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub tokens: Vec<TokenId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedSegment {
    pub seek: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub tokens: Vec<TokenId>,
    pub words: Vec<WordTiming>,
}

pub(crate) fn round_centis(seconds: f64) -> f64 {
    (seconds * 100.0).round() / 100.0
}
