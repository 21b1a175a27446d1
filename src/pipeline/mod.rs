//! Worker phases run for each task.

pub mod builder;
pub mod extractor;
