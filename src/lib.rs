pub mod alignment;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use alignment::consistency::ensure_increasing_positions;
pub use alignment::engine::SegmentAligner;
pub use config::{AlignmentConfig, SegmentationMode, SpecialTokens};
pub use error::AlignmentError;
pub use pipeline::accumulator::{AccumulatorState, SegmentAccumulator};
pub use pipeline::builder::SegmentAccumulatorBuilder;
pub use pipeline::reconcile::attach_words;
pub use pipeline::traits::{SequenceAligner, TokenDecoder, WordSegmenter};
pub use pipeline::vocab::ByteLevelDecoder;
pub use types::{
    AlignedSegment, DecodedSegment, TimestampedSegment, TokenId, WordTiming, WordTokens,
};
