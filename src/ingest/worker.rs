//! Background ingest so a foreground caller stays responsive.

use std::path::PathBuf;

use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::IngestConfig;
use crate::ingest::pipeline::{IngestEvent, IngestPipeline, IngestReport};

/// Runs the pipeline on the blocking pool.
///
/// Progress events arrive on the returned receiver; the channel closes once
/// the run is over. The handle resolves to the final report.
pub fn spawn_ingest(
    pipeline: IngestPipeline,
    sources: Vec<PathBuf>,
    config: IngestConfig,
) -> (JoinHandle<Result<IngestReport>>, UnboundedReceiver<IngestEvent>) {
    let (tx, rx) = unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        let report = pipeline.ingest_with(&sources, &config, |event| {
            if tx.send(event.clone()).is_err() {
                debug!("Ingest event receiver dropped");
            }
        });
        Ok(report)
    });
    (handle, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CsvOptions;
    use crate::store::CacheStore;

    #[tokio::test]
    async fn test_worker_reports_events_and_result() {
        let src = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let source = src.path().join("a.csv");
        std::fs::write(&source, "Ldc name;Lamp info;Lav [cd/m2]\nA;L;1.0\n").unwrap();

        let pipeline = IngestPipeline::new(
            CacheStore::open(cache.path()).unwrap(),
            CsvOptions::default(),
        );
        let (handle, mut rx) = spawn_ingest(pipeline, vec![source], IngestConfig::default());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.converted.len(), 1);
        assert!(matches!(events[0], IngestEvent::Started { .. }));
        assert!(matches!(events[1], IngestEvent::Completed { rows: 1, .. }));
        assert!(matches!(events[2], IngestEvent::Finished { .. }));
    }
}
