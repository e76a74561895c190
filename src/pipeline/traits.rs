use crate::error::AlignmentError;
use crate::types::{TokenId, WordTokens};

/// Turns token ids back into text.
///
/// Timestamp tokens must render as `<|t.tt|>` and other control markers as
/// `<|name|>`; byte sequences that are not yet valid UTF-8 must render with
/// U+FFFD so that word segmentation can wait for the rest of the character.
pub trait TokenDecoder: Send + Sync {
    fn decode_with_timestamps(&self, tokens: &[TokenId]) -> String;
}

pub trait SequenceAligner: Send + Sync {
    /// Monotonic `(token, frame)` path through a `tokens × frames` cost matrix.
    fn align_path(&self, cost: &[Vec<f64>]) -> Result<Vec<(usize, usize)>, AlignmentError>;
}

pub trait WordSegmenter: Send + Sync {
    fn split_words(
        &self,
        tokens: &[TokenId],
        decoder: &dyn TokenDecoder,
        remove_punctuation: bool,
    ) -> Vec<WordTokens>;
}
