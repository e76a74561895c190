pub mod attention;
pub mod consistency;
pub mod dtw;
pub mod engine;
pub mod words;
