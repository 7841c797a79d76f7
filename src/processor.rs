//! Processor orchestration covering the gulper registry, the per-key chunked
//! fetch loop, and retry backoff.

pub mod backoff;
pub mod gulper;
pub mod registry;
