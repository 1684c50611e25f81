// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background workers for long-running operations.
//!
//! Each worker runs as a single tokio task and reports coarse progress
//! over an unbounded channel. There is no pooling and no cancellation;
//! dropping the receiver only silences the events.

pub mod cci_add;
pub mod ckl_export;
pub mod ckl_import;
pub mod cmrs_export;
pub mod emass_import;
pub mod emass_report;
pub mod findings_report;
pub mod maintenance;
pub mod stig_add;

pub use cci_add::WorkerCciAdd;
pub use ckl_export::WorkerCklExport;
pub use ckl_import::WorkerCklImport;
pub use cmrs_export::WorkerCmrsExport;
pub use emass_import::WorkerEmassImport;
pub use emass_report::{ReportRow, WorkerEmassReport};
pub use findings_report::{FindingRow, FindingsReport, WorkerFindingsReport};
pub use maintenance::{WorkerAssetAdd, WorkerCciDelete, WorkerMapUnmapped, WorkerStigDelete};
pub use stig_add::{WorkerStigAdd, WorkerStigDownload};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::Database;
use crate::Result;

/// Progress notifications emitted by a running worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkerEvent {
    /// Reset the progress range
    Initialize { max: u64, value: u64 },
    /// One unit of work completed
    Advance,
    Status(String),
    Warning { title: String, message: String },
    Finished,
}

/// Sending side of a worker's event stream
#[derive(Clone)]
pub struct Progress {
    tx: UnboundedSender<WorkerEvent>,
}

impl Progress {
    pub fn channel() -> (Self, UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: WorkerEvent) {
        // A closed receiver just means nobody is watching
        let _ = self.tx.send(event);
    }

    pub fn initialize(&self, max: u64, value: u64) {
        self.send(WorkerEvent::Initialize { max, value });
    }

    pub fn advance(&self) {
        self.send(WorkerEvent::Advance);
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.send(WorkerEvent::Status(message));
    }

    /// Non-fatal problem; logged and forwarded
    pub fn warning(&self, title: impl Into<String>, message: impl Into<String>) {
        let (title, message) = (title.into(), message.into());
        warn!("{}: {}", title, message);
        self.send(WorkerEvent::Warning { title, message });
    }

    fn finished(&self) {
        self.send(WorkerEvent::Finished);
    }
}

/// A long-running operation against the database
#[async_trait]
pub trait Worker: Send {
    /// Name of this worker
    fn name(&self) -> &'static str;

    /// Do the work, reporting through `progress`
    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()>;
}

/// Run `worker` on its own task.
///
/// The handle yields the worker back so callers can read any results it
/// collected. `Finished` is sent whether or not the worker succeeded.
pub fn spawn_worker<W>(mut worker: W, db: Database) -> (JoinHandle<Result<W>>, UnboundedReceiver<WorkerEvent>)
where
    W: Worker + 'static,
{
    let (progress, rx) = Progress::channel();
    let handle = tokio::spawn(async move {
        debug!("Starting worker {}", worker.name());
        let result = worker.process(&db, &progress).await;
        if let Err(e) = &result {
            warn!("Worker {} failed: {}", worker.name(), e);
        }
        progress.status("Done!");
        progress.finished();
        result.map(|_| worker)
    });
    (handle, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StigqterError;

    struct Counter {
        steps: u64,
        fail: bool,
    }

    #[async_trait]
    impl Worker for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn process(&mut self, _db: &Database, progress: &Progress) -> Result<()> {
            progress.initialize(self.steps, 0);
            for _ in 0..self.steps {
                progress.advance();
            }
            if self.fail {
                progress.warning("Counter", "giving up");
                return Err(StigqterError::Worker("counter failed".to_string()));
            }
            Ok(())
        }
    }

    async fn drain(mut rx: UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_spawned_worker_reports_progress() {
        let db = Database::in_memory().unwrap();
        let (handle, rx) = spawn_worker(Counter { steps: 3, fail: false }, db);
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.steps, 3);

        let events = drain(rx).await;
        assert_eq!(events[0], WorkerEvent::Initialize { max: 3, value: 0 });
        assert_eq!(events.iter().filter(|e| **e == WorkerEvent::Advance).count(), 3);
        assert_eq!(events.last(), Some(&WorkerEvent::Finished));
    }

    #[tokio::test]
    async fn test_failed_worker_still_finishes() {
        let db = Database::in_memory().unwrap();
        let (handle, rx) = spawn_worker(Counter { steps: 1, fail: true }, db);
        assert!(matches!(handle.await.unwrap(), Err(StigqterError::Worker(_))));

        let events = drain(rx).await;
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::Warning { .. })));
        assert_eq!(events.last(), Some(&WorkerEvent::Finished));
    }
}
