pub mod accumulator;
pub mod builder;
pub mod defaults;
pub mod reconcile;
pub mod silence;
pub mod traits;
pub mod vocab;
