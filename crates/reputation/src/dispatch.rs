//! Background scans with results delivered on the caller's context.
//!
//! [`Client::scan_file_async`] runs the scan on the tokio runtime and hands
//! the finished result to a [`CompletionScheduler`], which decides where the
//! callback actually runs. A UI would post it to its event loop; the bundled
//! [`ChannelScheduler`] queues it for whichever task drains the paired
//! [`Completions`].

use crate::client::Client;
use crate::error::ErrorKind;
use crate::models::ScanResult;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub type Completion = Box<dyn FnOnce() + Send>;

/// Runs completion callbacks somewhere other than the scan worker.
pub trait CompletionScheduler: Send + Sync {
    fn schedule(&self, task: Completion);
}

impl<F> CompletionScheduler for F
where
    F: Fn(Completion) + Send + Sync,
{
    fn schedule(&self, task: Completion) {
        self(task)
    }
}

/// Sending half of [`channel`].
#[derive(Clone, Debug)]
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<Completion>,
}

impl CompletionScheduler for ChannelScheduler {
    fn schedule(&self, task: Completion) {
        if self.tx.send(task).is_err() {
            tracing::warn!("Completion queue is closed; dropping scan result");
        }
    }
}

/// Receiving half of [`channel`]; callbacks run on whoever drains it.
#[derive(Debug)]
pub struct Completions {
    rx: mpsc::UnboundedReceiver<Completion>,
}

impl Completions {
    /// Wait for the next completion and run it. Returns `false` once every
    /// scheduler has been dropped and the queue is empty.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(task) => {
                task();
                true
            },
            None => false,
        }
    }

    /// Run whatever is already queued without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

pub fn channel() -> (ChannelScheduler, Completions) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelScheduler { tx }, Completions { rx })
}

impl Client {
    /// Start a scan in the background and deliver its result through
    /// `scheduler`.
    ///
    /// Returns immediately. A missing API key is reported without starting
    /// any work (and without a join handle); so is the lack of a runtime to
    /// run on. The callback is invoked exactly once in every case.
    pub fn scan_file_async(
        self: &Arc<Self>,
        path: impl Into<PathBuf>,
        scheduler: Arc<dyn CompletionScheduler>,
        callback: impl FnOnce(ScanResult) + Send + 'static,
    ) -> Option<JoinHandle<()>> {
        let path = path.into();
        if !self.has_api_key() {
            let result = ScanResult::failed(path, &ErrorKind::MissingApiKey);
            scheduler.schedule(Box::new(move || callback(result)));
            return None;
        }
        let Some(runtime) = self.runtime() else {
            tracing::error!("No tokio runtime to run the scan on");
            let result = ScanResult::failed(path, &ErrorKind::Runtime);
            scheduler.schedule(Box::new(move || callback(result)));
            return None;
        };
        let client = Arc::clone(self);
        Some(runtime.spawn(async move {
            let result = client.scan_file(&path).await;
            scheduler.schedule(Box::new(move || callback(result)));
        }))
    }
}
