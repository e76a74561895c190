use crate::alignment::dtw::dtw_path;
use crate::alignment::words::{split_tokens_on_spaces, split_tokens_on_unicode};
use crate::config::SpecialTokens;
use crate::error::AlignmentError;
use crate::pipeline::traits::{SequenceAligner, TokenDecoder, WordSegmenter};
use crate::types::{TokenId, WordTokens};

pub struct DtwSequenceAligner;

impl SequenceAligner for DtwSequenceAligner {
    fn align_path(&self, cost: &[Vec<f64>]) -> Result<Vec<(usize, usize)>, AlignmentError> {
        let tokens = cost.len();
        let frames = cost.first().map_or(0, Vec::len);
        if cost.iter().any(|row| row.len() != frames) {
            return Err(AlignmentError::invalid_input("cost matrix rows differ in length"));
        }
        if tokens == 0 || tokens > frames {
            return Err(AlignmentError::invalid_input(format!(
                "cannot align {tokens} tokens over {frames} frames"
            )));
        }
        Ok(dtw_path(cost))
    }
}

pub struct SpaceWordSegmenter {
    pub specials: SpecialTokens,
}

impl WordSegmenter for SpaceWordSegmenter {
    fn split_words(
        &self,
        tokens: &[TokenId],
        decoder: &dyn TokenDecoder,
        remove_punctuation: bool,
    ) -> Vec<WordTokens> {
        split_tokens_on_spaces(tokens, decoder, &self.specials, remove_punctuation)
    }
}

pub struct UnicodeWordSegmenter;

impl WordSegmenter for UnicodeWordSegmenter {
    fn split_words(
        &self,
        tokens: &[TokenId],
        decoder: &dyn TokenDecoder,
        remove_punctuation: bool,
    ) -> Vec<WordTokens> {
        split_tokens_on_unicode(tokens, decoder, remove_punctuation)
    }
}
