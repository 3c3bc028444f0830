//! Scripted transfer for testing.

use crate::Transfer;
use crate::classify::{Outcome, classify};
use crate::downloader::TransferReport;
use crate::error::{ErrorKind, Result};
use crate::request::TransferRequest;
use async_trait::async_trait;
use exn::ResultExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One scripted run.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Finish with this output; the outcome is classified from it as a
    /// real run would be.
    Exit { code: i32, output: Vec<String> },
    /// Block until cancelled.
    Hang,
}

impl MockStep {
    pub fn success() -> Self {
        Self::Exit {
            code: 0,
            output: Vec::new(),
        }
    }

    /// Non-zero exit printing `line`.
    pub fn fail(line: impl Into<String>) -> Self {
        Self::Exit {
            code: 1,
            output: vec![line.into()],
        }
    }
}

/// Transfer whose runs are scripted per URL.
///
/// Like the scripted source, each URL has a queue of steps and the last one
/// repeats; unscripted URLs succeed. A successful run writes `payload` bytes
/// into the request's output directory so there is something to measure.
pub struct MockTransfer {
    steps: Mutex<HashMap<String, VecDeque<MockStep>>>,
    requests: Mutex<Vec<TransferRequest>>,
    payload: usize,
}

impl Default for MockTransfer {
    fn default() -> Self {
        Self {
            steps: Mutex::default(),
            requests: Mutex::default(),
            payload: 1024,
        }
    }
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(self, url: impl Into<String>, step: MockStep) -> Self {
        self.push_step(url, step);
        self
    }

    /// Bytes written on success; `0` leaves an empty directory behind.
    pub fn with_payload(mut self, payload: usize) -> Self {
        self.payload = payload;
        self
    }

    pub fn push_step(&self, url: impl Into<String>, step: MockStep) {
        let mut guard = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        guard.entry(url.into()).or_default().push_back(step);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many runs were started for `url`.
    pub fn runs(&self, url: &str) -> usize {
        self.requests().iter().filter(|request| request.url == url).count()
    }

    fn next_step(&self, url: &str) -> MockStep {
        let mut guard = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        let Some(queue) = guard.get_mut(url) else {
            return MockStep::success();
        };
        match queue.len() {
            0 => MockStep::success(),
            1 => queue.front().cloned().unwrap_or_else(MockStep::success),
            _ => queue.pop_front().unwrap_or_else(MockStep::success),
        }
    }
}

#[async_trait]
impl Transfer for MockTransfer {
    async fn run(&self, request: &TransferRequest, cancel: &CancellationToken) -> Result<TransferReport> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        let (code, output) = match self.next_step(&request.url) {
            MockStep::Hang => {
                cancel.cancelled().await;
                exn::bail!(ErrorKind::Cancelled);
            },
            MockStep::Exit { code, output } => (code, output),
        };
        let classification = classify(Some(code), &output);
        if classification.outcome == Outcome::Success {
            std::fs::create_dir_all(&request.output_dir).or_raise(|| ErrorKind::Io)?;
            if self.payload > 0 {
                std::fs::write(request.output_dir.join("video.mp4"), vec![0u8; self.payload])
                    .or_raise(|| ErrorKind::Io)?;
            }
        }
        Ok(TransferReport {
            outcome: classification.outcome,
            indicator: classification.indicator,
            exit_code: Some(code),
            output,
        })
    }
}
