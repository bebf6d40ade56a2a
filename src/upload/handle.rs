//! Result plumbing shared by the asynchronous upload handles.
//!
//! A background worker owns a [`Settle`] and the progress sender; the
//! caller owns the matching [`Outcome`] and progress receiver. `Settle`
//! is consumed by its first write, so a worker can report success or
//! failure at most once and never both.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::from_url::FromUrlUpload;
use super::multipart::MultipartUpload;
use super::types::FileInfo;
use crate::error::{Result, UploadError};

/// Progress updates kept before new ones are dropped
pub(crate) const PROGRESS_BUFFER: usize = 10;

/// Write side of an upload outcome
#[derive(Debug)]
pub(crate) struct Settle {
    tx: oneshot::Sender<Result<FileInfo>>,
}

impl Settle {
    pub fn done(self, info: FileInfo) {
        self.send(Ok(info));
    }

    pub fn fail(self, err: UploadError) {
        self.send(Err(err));
    }

    fn send(self, outcome: Result<FileInfo>) {
        if self.tx.send(outcome).is_err() {
            debug!("upload outcome dropped: handle no longer observed");
        }
    }
}

/// Read side of an upload outcome.
///
/// Await it to block until the upload finishes, poll it with
/// [`Outcome::try_take`], or hand it a callback with
/// [`Outcome::on_settled`].
#[derive(Debug)]
pub struct Outcome {
    rx: oneshot::Receiver<Result<FileInfo>>,
    taken: bool,
}

pub(crate) fn outcome_channel() -> (Settle, Outcome) {
    let (tx, rx) = oneshot::channel();
    (Settle { tx }, Outcome { rx, taken: false })
}

impl Outcome {
    /// Already settled outcome, for uploads resolved by the initial call
    pub(crate) fn ready(info: FileInfo) -> Self {
        let (settle, outcome) = outcome_channel();
        settle.done(info);
        outcome
    }

    /// Non-blocking check. Returns the result the first time it is
    /// available and `None` while pending or once taken.
    pub fn try_take(&mut self) -> Option<Result<FileInfo>> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(UploadError::WorkerGone),
        };
        self.taken = true;
        Some(result)
    }

    /// Run `callback` with the result once the upload settles
    pub fn on_settled<F>(self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<FileInfo>) + Send + 'static,
    {
        tokio::spawn(async move { callback(self.await) })
    }
}

impl Future for Outcome {
    type Output = Result<FileInfo>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.taken {
            return Poll::Ready(Err(UploadError::WorkerGone));
        }
        let polled = Pin::new(&mut self.rx).poll(cx);
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.taken = true;
                Poll::Ready(result.unwrap_or(Err(UploadError::WorkerGone)))
            }
        }
    }
}

/// Worker side progress sender; drops updates when the caller lags
#[derive(Debug, Clone)]
pub(crate) struct ProgressTx(mpsc::Sender<u64>);

impl ProgressTx {
    pub fn report(&self, bytes: u64) {
        if self.0.try_send(bytes).is_err() {
            debug!(bytes, "progress update dropped");
        }
    }
}

pub(crate) fn progress_channel() -> (ProgressTx, mpsc::Receiver<u64>) {
    let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
    (ProgressTx(tx), rx)
}

/// Either kind of asynchronous upload
#[derive(Debug)]
pub enum UploadHandle {
    FromUrl(FromUrlUpload),
    Multipart(MultipartUpload),
}

impl UploadHandle {
    /// File info if the upload is already known to be finished
    pub fn info(&self) -> Option<FileInfo> {
        match self {
            Self::FromUrl(h) => h.info(),
            Self::Multipart(_) => None,
        }
    }

    /// Declared total size in bytes, 0 if unknown
    pub fn total_size(&self) -> u64 {
        match self {
            Self::FromUrl(h) => h.total_size(),
            Self::Multipart(h) => h.total_size(),
        }
    }

    pub async fn next_progress(&mut self) -> Option<u64> {
        match self {
            Self::FromUrl(h) => h.next_progress().await,
            Self::Multipart(h) => h.next_progress().await,
        }
    }

    pub fn try_outcome(&mut self) -> Option<Result<FileInfo>> {
        match self {
            Self::FromUrl(h) => h.try_outcome(),
            Self::Multipart(h) => h.try_outcome(),
        }
    }

    pub async fn wait(self) -> Result<FileInfo> {
        match self {
            Self::FromUrl(h) => h.wait().await,
            Self::Multipart(h) => h.wait().await,
        }
    }

    pub fn on_settled<F>(self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<FileInfo>) + Send + 'static,
    {
        self.into_parts().0.on_settled(callback)
    }

    pub fn into_parts(self) -> (Outcome, mpsc::Receiver<u64>) {
        match self {
            Self::FromUrl(h) => h.into_parts(),
            Self::Multipart(h) => h.into_parts(),
        }
    }
}

impl From<FromUrlUpload> for UploadHandle {
    fn from(handle: FromUrlUpload) -> Self {
        Self::FromUrl(handle)
    }
}

impl From<MultipartUpload> for UploadHandle {
    fn from(handle: MultipartUpload) -> Self {
        Self::Multipart(handle)
    }
}
