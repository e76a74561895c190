use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },
    #[error("got unexpected empty sequence of tokens")]
    EmptySegment,
    #[error("missing start timestamp in {segment}")]
    MissingStartTimestamp { segment: String },
    #[error("got segment with null or negative duration {segment}: frames {start_frame}..{end_frame}")]
    DegenerateWindow {
        segment: String,
        start_frame: usize,
        end_frame: usize,
    },
    #[error("attention weights do not match {segment}: {message}")]
    AttentionMismatch { segment: String, message: String },
    #[error("no-speech probability was never reported for the decoding window")]
    MissingNoSpeechProbability,
    #[error("inconsistent decoding window statistics: {message}")]
    WindowStats { message: String },
    #[error("inconsistent number of segments: {expected} decoded != {actual} aligned")]
    SegmentCountMismatch { expected: usize, actual: usize },
    #[error("got inconsistent segments at index {index}:\n{aligned}\n!=\n{decoded}")]
    SegmentMismatch {
        index: usize,
        aligned: String,
        decoded: String,
    },
    #[error("word {text:?} [{start}, {end}] breaks timestamp ordering (previous end {previous_end})")]
    NonMonotonicTimestamps {
        text: String,
        start: f64,
        end: f64,
        previous_end: f64,
    },
    #[error("events received after the accumulator was finalized")]
    Finalized,
}

impl AlignmentError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn window_stats(message: impl Into<String>) -> Self {
        Self::WindowStats {
            message: message.into(),
        }
    }
}
