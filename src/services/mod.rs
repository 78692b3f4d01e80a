pub mod analyzer;
pub mod tracker;
