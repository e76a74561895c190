use crate::alignment::attention::CostMatrixParams;
use crate::alignment::engine::{SegmentAligner, SegmentAlignerParts};
use crate::config::{AlignmentConfig, SegmentationMode, SpecialTokens};
use crate::error::AlignmentError;
use crate::pipeline::accumulator::SegmentAccumulator;
use crate::pipeline::defaults::{DtwSequenceAligner, SpaceWordSegmenter, UnicodeWordSegmenter};
use crate::pipeline::traits::{SequenceAligner, TokenDecoder, WordSegmenter};

pub struct SegmentAccumulatorBuilder {
    config: AlignmentConfig,
    specials: SpecialTokens,
    decoder: Box<dyn TokenDecoder>,
    sequence_aligner: Option<Box<dyn SequenceAligner>>,
    word_segmenter: Option<Box<dyn WordSegmenter>>,
}

impl SegmentAccumulatorBuilder {
    pub fn new(
        config: AlignmentConfig,
        specials: SpecialTokens,
        decoder: Box<dyn TokenDecoder>,
    ) -> Self {
        Self {
            config,
            specials,
            decoder,
            sequence_aligner: None,
            word_segmenter: None,
        }
    }

    pub fn with_sequence_aligner(mut self, sequence_aligner: Box<dyn SequenceAligner>) -> Self {
        self.sequence_aligner = Some(sequence_aligner);
        self
    }

    /// Replaces the segmenter picked from `config.segmentation`.
    pub fn with_word_segmenter(mut self, word_segmenter: Box<dyn WordSegmenter>) -> Self {
        self.word_segmenter = Some(word_segmenter);
        self
    }

    pub fn build(self) -> Result<SegmentAccumulator, AlignmentError> {
        self.config.validate()?;
        let refine_frames = self.config.refine_frames()?;
        let specials = self.specials;

        let word_segmenter: Box<dyn WordSegmenter> = match self.word_segmenter {
            Some(word_segmenter) => word_segmenter,
            None => match self.config.segmentation {
                SegmentationMode::Spaces => Box::new(SpaceWordSegmenter { specials }),
                SegmentationMode::Unicode => Box::new(UnicodeWordSegmenter),
            },
        };

        let aligner = SegmentAligner::from_parts(SegmentAlignerParts {
            specials,
            refine_frames,
            cost_params: CostMatrixParams {
                medfilt_width: self.config.medfilt_width,
                qk_scale: self.config.qk_scale,
                top_layers: self.config.top_layers,
            },
            remove_punctuation: self.config.remove_punctuation_from_words,
            decoder: self.decoder,
            sequence_aligner: self
                .sequence_aligner
                .unwrap_or_else(|| Box::new(DtwSequenceAligner)),
            word_segmenter,
        });

        tracing::debug!(
            refine_frames,
            segmentation = ?self.config.segmentation,
            no_speech_threshold = ?self.config.no_speech_threshold,
            "built segment accumulator"
        );
        Ok(SegmentAccumulator::new(aligner, self.config))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::pipeline::accumulator::AccumulatorState;
    use crate::pipeline::vocab::ByteLevelDecoder;
    use crate::types::TokenId;

    fn decoder() -> Box<dyn TokenDecoder> {
        let vocab: HashMap<String, TokenId> = HashMap::new();
        Box::new(ByteLevelDecoder::from_vocab(vocab, SpecialTokens::MULTILINGUAL))
    }

    #[test]
    fn builds_with_default_config() {
        let accumulator = SegmentAccumulatorBuilder::new(
            AlignmentConfig::default(),
            SpecialTokens::MULTILINGUAL,
            decoder(),
        )
        .build()
        .unwrap();
        assert_eq!(accumulator.state(), AccumulatorState::AwaitingPrompt);
        assert!(accumulator.segments().is_empty());
    }

    #[test]
    fn rejects_invalid_config() {
        let config = AlignmentConfig {
            refine_precision_s: 0.03,
            ..AlignmentConfig::default()
        };
        let result =
            SegmentAccumulatorBuilder::new(config, SpecialTokens::MULTILINGUAL, decoder()).build();
        assert!(matches!(result, Err(AlignmentError::InvalidConfig { .. })));
    }

    #[test]
    fn accepts_custom_stages() {
        let config = AlignmentConfig {
            segmentation: SegmentationMode::Unicode,
            ..AlignmentConfig::default()
        };
        let result = SegmentAccumulatorBuilder::new(config, SpecialTokens::ENGLISH_ONLY, decoder())
            .with_sequence_aligner(Box::new(DtwSequenceAligner))
            .with_word_segmenter(Box::new(UnicodeWordSegmenter))
            .build();
        assert!(result.is_ok());
    }
}
