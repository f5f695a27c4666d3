//! Helpers shared by the backup pipeline.

pub mod retention;
