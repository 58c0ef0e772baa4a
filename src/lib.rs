pub mod config;
pub mod data;
pub mod ingest;
pub mod monitoring;
pub mod persistence;
pub mod pipeline;
pub mod reconcile;

pub use pipeline::OddsPipeline;
