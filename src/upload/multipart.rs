//! Multipart upload of large files.
//!
//! The provider hands out one pre-signed URL per fixed-size part. A single
//! dispatcher task owns the queue of parts and hands each one to a worker
//! whenever a concurrency slot is free. Workers share the data source
//! through a mutex so every seek + read pair is atomic. The session is
//! completed only after every part has been uploaded.

use serde::Deserialize;
use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::handle::{Outcome, ProgressTx, Settle, outcome_channel, progress_channel};
use super::types::{DataSource, FileInfo, MultipartParams};
use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::transport::{ApiRequest, Transport};

const MULTIPART_START_PATH: &str = "/multipart/start/";
const MULTIPART_COMPLETE_PATH: &str = "/multipart/complete/";

/// One part of a session: where its bytes start and where they go
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub index: usize,
    pub url: String,
}

/// Server-side session plus the parts still waiting for a worker
#[derive(Debug)]
pub(crate) struct MultipartSession {
    pub id: String,
    pub parts: VecDeque<Part>,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    uuid: String,
    #[serde(default)]
    parts: Vec<String>,
}

impl MultipartSession {
    /// Indices follow list order; the part number in each URL is only
    /// checked for consistency
    fn new(id: String, urls: Vec<String>) -> Self {
        let parts = urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| {
                let hinted = part_index_from_url(&url);
                if hinted != index {
                    warn!(
                        index,
                        hinted, "part URL number disagrees with its position: {}", url
                    );
                }
                Part { index, url }
            })
            .collect();
        Self { id, parts }
    }
}

/// 0-based part index encoded in a provider part URL.
///
/// The provider numbers parts from 1 in the `partNumber` query parameter.
/// Numbers below 1, a missing parameter or an unparsable URL map to 0.
pub(crate) fn part_index_from_url(url: &str) -> usize {
    match part_number_from_url(url) {
        Some(n) if n >= 1 => (n - 1) as usize,
        _ => 0,
    }
}

fn part_number_from_url(url: &str) -> Option<i64> {
    let url = reqwest::Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "partNumber")
        .and_then(|(_, value)| value.parse().ok())
}

/// Validate the parameters, open the session and spawn the dispatcher
pub(crate) async fn start(
    transport: Arc<dyn Transport>,
    config: &Config,
    params: MultipartParams,
    cancel: CancellationToken,
) -> Result<MultipartUpload> {
    let MultipartParams {
        file_name,
        size,
        content_type,
        data,
        store,
    } = params;

    let mut data = data.ok_or_else(|| {
        UploadError::InvalidParams("multipart upload requires a data source".to_string())
    })?;

    if size < config.multipart_min_size {
        return Err(UploadError::InvalidParams(format!(
            "{} bytes is below the multipart minimum of {} bytes, use direct upload",
            size, config.multipart_min_size
        )));
    }

    let actual = data.seek(SeekFrom::End(0)).await?;
    if actual != size {
        return Err(UploadError::SizeMismatch {
            declared: size,
            actual,
        });
    }
    data.seek(SeekFrom::Start(0)).await?;

    let expected_parts = size.div_ceil(config.part_size) as usize;
    info!(
        "Starting multipart upload for {} ({} bytes, {} parts)",
        file_name, size, expected_parts
    );

    let fields = vec![
        ("filename".to_string(), file_name.clone()),
        ("size".to_string(), size.to_string()),
        ("content_type".to_string(), content_type.clone()),
        ("UPLOADCARE_STORE".to_string(), store.as_str().to_string()),
        ("UPLOADCARE_PUB_KEY".to_string(), config.public_key.clone()),
    ];
    let response = transport
        .send(ApiRequest::post_form(MULTIPART_START_PATH, fields))
        .await?;
    let started: StartResponse = serde_json::from_value(response)?;

    if started.parts.len() != expected_parts {
        return Err(anyhow::anyhow!(
            "provider returned {} part URLs for {} bytes, expected {}",
            started.parts.len(),
            size,
            expected_parts
        )
        .into());
    }

    let session = MultipartSession::new(started.uuid, started.parts);
    debug!(
        "Multipart upload initiated with ID: {} ({} parts)",
        session.id,
        session.parts.len()
    );

    let (settle, outcome) = outcome_channel();
    let (progress_tx, progress_rx) = progress_channel();
    let handle = MultipartUpload {
        id: session.id.clone(),
        part_count: session.parts.len(),
        total_size: size,
        outcome,
        progress: progress_rx,
    };

    let uploader = Arc::new(PartUploader {
        transport,
        source: Mutex::new(data),
        content_type,
        size,
        part_size: config.part_size,
        max_attempts: config.max_part_attempts.max(1),
        retry_delay: config.part_retry_delay,
        cancel,
    });
    let dispatcher = Dispatcher {
        uploader,
        session,
        public_key: config.public_key.clone(),
        concurrency: config.max_concurrent_parts.max(1),
        settle,
        progress: progress_tx,
    };
    tokio::spawn(dispatcher.run());

    Ok(handle)
}

/// Handle for a running multipart upload
#[derive(Debug)]
pub struct MultipartUpload {
    id: String,
    part_count: usize,
    total_size: u64,
    outcome: Outcome,
    progress: mpsc::Receiver<u64>,
}

impl MultipartUpload {
    /// Session id, which is also the id of the resulting file
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn part_count(&self) -> usize {
        self.part_count
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Cumulative bytes uploaded, `None` once the upload has settled
    pub async fn next_progress(&mut self) -> Option<u64> {
        self.progress.recv().await
    }

    pub fn try_outcome(&mut self) -> Option<Result<FileInfo>> {
        self.outcome.try_take()
    }

    pub async fn wait(self) -> Result<FileInfo> {
        self.outcome.await
    }

    pub fn on_settled<F>(self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<FileInfo>) + Send + 'static,
    {
        self.outcome.on_settled(callback)
    }

    pub fn into_parts(self) -> (Outcome, mpsc::Receiver<u64>) {
        (self.outcome, self.progress)
    }
}

/// State shared by all part workers of one session
struct PartUploader {
    transport: Arc<dyn Transport>,
    source: Mutex<Box<dyn DataSource>>,
    content_type: String,
    size: u64,
    part_size: u64,
    max_attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl PartUploader {
    async fn read_part(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut source = self.source.lock().await;
        source.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; len];
        source.read_exact(&mut buffer).await?;
        Ok(buffer)
    }

    /// Upload one part, returning the number of bytes sent
    async fn upload(&self, part: Part) -> Result<u64> {
        let offset = part.index as u64 * self.part_size;
        let len = self.part_size.min(self.size.saturating_sub(offset)) as usize;
        let data = self.read_part(offset, len).await?;

        let mut attempt = 1;
        loop {
            debug!(index = part.index, attempt, "Uploading part ({} bytes)", len);
            let request = ApiRequest::put_part(&part.url, &self.content_type, data.clone());

            match self.transport.send(request).await {
                Ok(_) => return Ok(len as u64),
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        index = part.index,
                        attempt, "Part upload failed, retrying: {}", err
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    return Err(UploadError::PartUpload {
                        index: part.index,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
            }
        }
    }
}

struct Dispatcher {
    uploader: Arc<PartUploader>,
    session: MultipartSession,
    public_key: String,
    concurrency: usize,
    settle: Settle,
    progress: ProgressTx,
}

impl Dispatcher {
    async fn run(self) {
        let Self {
            uploader,
            session,
            public_key,
            concurrency,
            settle,
            progress,
        } = self;
        let MultipartSession { id, parts } = session;

        let result = match upload_parts(&uploader, parts, concurrency, &progress).await {
            Ok(()) => complete(&uploader, &id, &public_key).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(file) => {
                info!(
                    "Successfully completed multipart upload: {} ({} bytes)",
                    file.id, file.size
                );
                settle.done(file);
            }
            Err(err) => {
                error!("multipart upload {} failed: {}", id, err);
                settle.fail(err);
            }
        }
    }
}

/// Run every part through a bounded pool; stops at the first failure
async fn upload_parts(
    uploader: &Arc<PartUploader>,
    mut parts: VecDeque<Part>,
    concurrency: usize,
    progress: &ProgressTx,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    let mut uploaded = 0u64;

    let result = loop {
        if parts.is_empty() && tasks.is_empty() {
            break Ok(());
        }

        tokio::select! {
            biased;
            _ = uploader.cancel.cancelled() => break Err(UploadError::Cancelled),
            Some(joined) = tasks.join_next() => match flatten(joined) {
                Ok(bytes) => {
                    uploaded += bytes;
                    progress.report(uploaded);
                }
                Err(err) => break Err(err),
            },
            permit = semaphore.clone().acquire_owned(), if !parts.is_empty() => {
                let Ok(permit) = permit else {
                    break Err(UploadError::WorkerGone);
                };
                if let Some(part) = parts.pop_front() {
                    let uploader = uploader.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        uploader.upload(part).await
                    });
                }
            }
        }
    };

    if result.is_err() {
        // in-flight parts keep running but nobody reads their results
        tasks.detach_all();
    }
    result
}

fn flatten(joined: std::result::Result<Result<u64>, JoinError>) -> Result<u64> {
    joined.map_err(|err| anyhow::anyhow!("part task failed: {}", err))?
}

async fn complete(uploader: &PartUploader, id: &str, public_key: &str) -> Result<FileInfo> {
    if uploader.cancel.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    debug!("All parts uploaded, completing multipart upload {}", id);
    let fields = vec![
        ("uuid".to_string(), id.to_string()),
        ("UPLOADCARE_PUB_KEY".to_string(), public_key.to_string()),
    ];
    let send = uploader
        .transport
        .send(ApiRequest::post_form(MULTIPART_COMPLETE_PATH, fields));
    let response = tokio::select! {
        biased;
        _ = uploader.cancel.cancelled() => Err(UploadError::Cancelled),
        response = send => response,
    }?;
    Ok(serde_json::from_value(response)?)
}
