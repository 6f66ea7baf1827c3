//! Chunked CSV ingestion into the partition cache.

pub mod pipeline;
pub mod reader;
pub mod worker;

pub use pipeline::{IngestEvent, IngestPipeline, IngestReport, SourceSummary};
pub use reader::{CsvBatchReader, unique_luminaires};
pub use worker::spawn_ingest;
