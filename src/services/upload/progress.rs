//! Progress reporting.
//!
//! The reporter owns the `pending → uploading → {completed | error}` state
//! machine and forwards snapshots through an unbounded channel to a blocking
//! task that runs the observer, so a slow observer only delays delivery,
//! never the part transfers.

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;

use crate::models::upload::{UploadProgress, UploadStatus};

/// Receives progress snapshots.
pub trait ProgressObserver: Send + 'static {
    fn on_progress(&self, progress: &UploadProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&UploadProgress) + Send + 'static,
{
    fn on_progress(&self, progress: &UploadProgress) {
        self(progress)
    }
}

/// Forwards snapshots to a channel, for callers that prefer a stream.
impl ProgressObserver for mpsc::UnboundedSender<UploadProgress> {
    fn on_progress(&self, progress: &UploadProgress) {
        let _ = self.send(progress.clone());
    }
}

/// Discards every snapshot.
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _progress: &UploadProgress) {}
}

/// When snapshots are emitted while parts are in flight.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressGranularity {
    /// Once per settled wave of concurrent transfers.
    #[default]
    Wave,
    /// After every individual part.
    PerPart,
}

pub struct ProgressReporter {
    file_name: String,
    completed: u32,
    total: u32,
    status: UploadStatus,
    tx: Option<mpsc::UnboundedSender<UploadProgress>>,
    forwarder: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Start the forwarding task and emit the initial `pending` snapshot.
    pub fn spawn(file_name: impl Into<String>, observer: impl ProgressObserver) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UploadProgress>();
        let forwarder = tokio::task::spawn_blocking(move || {
            while let Some(progress) = rx.blocking_recv() {
                observer.on_progress(&progress);
            }
        });

        let reporter = Self {
            file_name: file_name.into(),
            completed: 0,
            total: 0,
            status: UploadStatus::Pending,
            tx: Some(tx),
            forwarder: Some(forwarder),
        };
        reporter.emit();
        reporter
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn snapshot(&self) -> UploadProgress {
        let percentage = if self.total == 0 {
            0.0
        } else {
            f64::from(self.completed) * 100.0 / f64::from(self.total)
        };
        UploadProgress {
            file_name: self.file_name.clone(),
            completed_parts: self.completed,
            total_parts: self.total,
            percentage,
            status: self.status,
        }
    }

    fn emit(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(self.snapshot());
        }
    }

    /// Enter `uploading` with `total_parts` outstanding.
    pub fn start(&mut self, total_parts: u32) {
        if self.status.is_terminal() {
            return;
        }
        self.total = total_parts;
        self.completed = 0;
        self.status = UploadStatus::Uploading;
        self.emit();
    }

    pub fn advance(&mut self, completed_parts: u32) {
        if self.status.is_terminal() {
            return;
        }
        self.completed = completed_parts.min(self.total);
        self.emit();
    }

    pub fn complete(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.completed = self.total;
        self.status = UploadStatus::Completed;
        self.emit();
    }

    pub fn fail(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadStatus::Error;
        self.emit();
    }

    /// Close the channel and wait until the observer has seen every snapshot.
    pub async fn finish(mut self) {
        self.tx.take();
        if let Some(forwarder) = self.forwarder.take() {
            if let Err(err) = forwarder.await {
                warn!(file = %self.file_name, "progress observer panicked: {}", err);
            }
        }
    }
}
