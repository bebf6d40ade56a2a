use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::handle::{Outcome, ProgressTx, Settle, outcome_channel, progress_channel};
use super::types::{FileInfo, FromUrlParams, flag};
use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::transport::{ApiRequest, Transport};

const FROM_URL_PATH: &str = "/from_url/";
const FROM_URL_STATUS_PATH: &str = "/from_url/status/";

/// State of a from-URL job as reported by the status endpoint
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JobStatus {
    /// Queued, not fetched yet
    Waiting,
    /// Fetching; `total` is 0 when the source did not announce a size
    Progress { done: u64, total: u64 },
    Success(FileInfo),
    Error(String),
    /// The provider does not know the token (expired or never issued)
    Unknown,
}

impl JobStatus {
    fn from_response(value: Value) -> Result<Self> {
        let status = value
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let job = match status.as_str() {
            "waiting" => Self::Waiting,
            "progress" => Self::Progress {
                done: value.get("done").and_then(Value::as_u64).unwrap_or(0),
                total: value.get("total").and_then(Value::as_u64).unwrap_or(0),
            },
            "error" => Self::Error(
                value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("upload failed")
                    .to_string(),
            ),
            "unknown" => Self::Unknown,
            // success carries the file info next to the status
            _ => Self::Success(serde_json::from_value(value)?),
        };
        Ok(job)
    }
}

enum Started {
    Ready(FileInfo),
    Queued { token: String },
}

fn parse_started(value: Value) -> Result<Started> {
    if let Some(token) = value.get("token").and_then(Value::as_str) {
        return Ok(Started::Queued {
            token: token.to_string(),
        });
    }
    if value.get("uuid").is_some() {
        return Ok(Started::Ready(serde_json::from_value(value)?));
    }
    Err(anyhow::anyhow!("unexpected from_url response: {}", value).into())
}

/// Start a from-URL upload and wrap the result in a handle
pub(crate) async fn start(
    transport: Arc<dyn Transport>,
    config: &Config,
    params: FromUrlParams,
    cancel: CancellationToken,
) -> Result<FromUrlUpload> {
    let mut fields = vec![
        ("pub_key".to_string(), config.public_key.clone()),
        ("source_url".to_string(), params.url.clone()),
        ("store".to_string(), params.store.as_str().to_string()),
    ];
    if let Some(name) = &params.file_name {
        fields.push(("filename".to_string(), name.clone()));
    }
    if let Some(check) = params.check_url_duplicates {
        fields.push(("check_URL_duplicates".to_string(), flag(check).to_string()));
    }
    if let Some(save) = params.save_url_duplicates {
        fields.push(("save_URL_duplicates".to_string(), flag(save).to_string()));
    }

    info!("Starting upload from URL: {}", params.url);
    let response = transport
        .send(ApiRequest::post_form(FROM_URL_PATH, fields))
        .await?;

    match parse_started(response)? {
        Started::Ready(file) => {
            info!("File already available: {} ({})", file.id, params.url);
            Ok(FromUrlUpload::ready(file))
        }
        Started::Queued { token } => {
            debug!(%token, "from-url upload queued");
            let (settle, outcome) = outcome_channel();
            let (progress_tx, progress_rx) = progress_channel();
            let total = Arc::new(AtomicU64::new(0));
            let poller = StatusPoller {
                transport,
                token: token.clone(),
                total: total.clone(),
                interval: config.poll_interval,
                cancel,
                settle,
                progress: progress_tx,
            };
            Ok(FromUrlUpload {
                file: None,
                token: Some(token),
                total,
                started: AtomicBool::new(false),
                poller: Mutex::new(Some((poller, Handle::current()))),
                outcome,
                progress: progress_rx,
            })
        }
    }
}

/// Handle for an upload from a public URL.
///
/// The provider either answers with the file right away (URL already
/// uploaded) or with a token. Token jobs are tracked by a background
/// poller that starts the first time the handle is observed.
pub struct FromUrlUpload {
    file: Option<FileInfo>,
    token: Option<String>,
    total: Arc<AtomicU64>,
    started: AtomicBool,
    poller: Mutex<Option<(StatusPoller, Handle)>>,
    outcome: Outcome,
    progress: mpsc::Receiver<u64>,
}

impl FromUrlUpload {
    fn ready(file: FileInfo) -> Self {
        // sender dropped: progress reads end immediately
        let (_, progress) = progress_channel();
        Self {
            outcome: Outcome::ready(file.clone()),
            total: Arc::new(AtomicU64::new(file.total)),
            file: Some(file),
            token: None,
            started: AtomicBool::new(true),
            poller: Mutex::new(None),
            progress,
        }
    }

    /// File info when the upload finished with the initial request.
    ///
    /// Returns `None` for queued jobs and starts the status poller if it
    /// is not running yet; use [`Self::wait`] or the progress channel to
    /// follow the job.
    pub fn info(&self) -> Option<FileInfo> {
        if let Some(file) = &self.file {
            return Some(file.clone());
        }
        self.ensure_polling();
        None
    }

    /// Job token, `None` when the file was available immediately
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Total file size in bytes as last reported by the provider, 0 if
    /// not known yet
    pub fn total_size(&self) -> u64 {
        self.ensure_polling();
        self.total.load(Ordering::Acquire)
    }

    /// Whether the background poller has been started
    pub fn is_polling(&self) -> bool {
        self.file.is_none() && self.started.load(Ordering::Acquire)
    }

    /// Next downloaded byte count, `None` once the job has settled
    pub async fn next_progress(&mut self) -> Option<u64> {
        self.ensure_polling();
        self.progress.recv().await
    }

    /// Non-blocking check of the final result
    pub fn try_outcome(&mut self) -> Option<Result<FileInfo>> {
        self.ensure_polling();
        self.outcome.try_take()
    }

    /// Wait until the job succeeds or fails
    pub async fn wait(self) -> Result<FileInfo> {
        let (outcome, _) = self.into_parts();
        outcome.await
    }

    /// Run `callback` with the final result from a spawned task
    pub fn on_settled<F>(self, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: FnOnce(Result<FileInfo>) + Send + 'static,
    {
        let (outcome, _) = self.into_parts();
        outcome.on_settled(callback)
    }

    /// Split into the final outcome and the progress receiver, so both
    /// can be watched at the same time
    pub fn into_parts(self) -> (Outcome, mpsc::Receiver<u64>) {
        self.ensure_polling();
        (self.outcome, self.progress)
    }

    fn ensure_polling(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((poller, runtime)) = poller {
            runtime.spawn(poller.run());
        }
    }
}

impl fmt::Debug for FromUrlUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromUrlUpload")
            .field("file", &self.file)
            .field("token", &self.token)
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

struct StatusPoller {
    transport: Arc<dyn Transport>,
    token: String,
    total: Arc<AtomicU64>,
    interval: Duration,
    cancel: CancellationToken,
    settle: Settle,
    progress: ProgressTx,
}

impl StatusPoller {
    async fn run(self) {
        let Self {
            transport,
            token,
            total,
            interval,
            cancel,
            settle,
            progress,
        } = self;

        loop {
            let step = async {
                tokio::time::sleep(interval).await;
                check_status(transport.as_ref(), &token).await
            };
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(UploadError::Cancelled),
                status = step => status,
            };

            match status {
                Ok(JobStatus::Waiting) => {
                    debug!(%token, "from-url upload waiting");
                }
                Ok(JobStatus::Progress { done, total: job_total }) => {
                    debug!(%token, done, size = job_total, "from-url upload in progress");
                    if job_total > 0 {
                        total.store(job_total, Ordering::Release);
                    }
                    progress.report(done);
                }
                Ok(JobStatus::Success(file)) => {
                    info!("Uploaded from URL: {} ({} bytes)", file.id, file.size);
                    total.store(file.total.max(file.size), Ordering::Release);
                    settle.done(file);
                    return;
                }
                Ok(JobStatus::Error(message)) => {
                    error!("from-url upload failed: {}: {}", token, message);
                    settle.fail(UploadError::RemoteJob(message));
                    return;
                }
                Ok(JobStatus::Unknown) => {
                    error!("from-url upload token unknown: {}", token);
                    settle.fail(UploadError::UnknownToken { token });
                    return;
                }
                Err(err) => {
                    error!("stopped waiting for the file: {}: {}", token, err);
                    settle.fail(err);
                    return;
                }
            }
        }
    }
}

async fn check_status(transport: &dyn Transport, token: &str) -> Result<JobStatus> {
    let request = ApiRequest::get(
        FROM_URL_STATUS_PATH,
        vec![("token".to_string(), token.to_string())],
    );
    let response = transport.send(request).await?;
    JobStatus::from_response(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use serde_json::json;
    use std::collections::VecDeque;

    fn config() -> Config {
        Config::new("demopublickey")
    }

    /// Token start response followed by the scripted status replies
    fn scripted(statuses: Vec<Value>) -> Arc<MockTransport> {
        let statuses = Mutex::new(VecDeque::from(statuses));
        Arc::new(MockTransport::new(move |req| {
            if req.route() == FROM_URL_PATH {
                return Ok(json!({"type": "token", "token": "tok-1"}));
            }
            assert_eq!(req.param("token"), Some("tok-1"));
            Ok(statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| json!({"status": "waiting"})))
        }))
    }

    fn success(id: &str) -> Value {
        json!({
            "status": "success",
            "uuid": id,
            "original_filename": "photo.jpg",
            "filename": "photo.jpg",
            "size": 5000,
            "total": 5000,
            "done": 5000,
            "is_image": true
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_success() {
        let mock = scripted(vec![
            json!({"status": "progress", "done": 1000, "total": 5000}),
            json!({"status": "progress", "done": 5000, "total": 5000}),
            success("file-1"),
        ]);

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(upload.token(), Some("tok-1"));

        let (outcome, mut progress) = upload.into_parts();
        let file = outcome.await.unwrap();
        assert_eq!(file.id, "file-1");

        let mut seen = Vec::new();
        while let Some(done) = progress.recv().await {
            seen.push(done);
        }
        assert_eq!(seen, vec![1000, 5000]);
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_error() {
        let mock = scripted(vec![json!({"status": "error", "error": "bad format"})]);

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/file.bin"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = upload.wait().await.unwrap_err();
        assert!(matches!(err, UploadError::RemoteJob(_)));
        assert!(err.to_string().contains("bad format"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_token() {
        let mock = scripted(vec![json!({"status": "waiting"}), json!({"status": "unknown"})]);

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/file.bin"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let err = upload.wait().await.unwrap_err();
        assert!(matches!(err, UploadError::UnknownToken { token } if token == "tok-1"));
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_info_starts_poller_once() {
        let mock = scripted(vec![
            json!({"status": "progress", "done": 10}),
            success("file-2"),
        ]);

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(!upload.is_polling());

        assert!(upload.info().is_none());
        assert!(upload.info().is_none());
        assert!(upload.is_polling());

        let file = upload.wait().await.unwrap();
        assert_eq!(file.id, "file-2");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_size_follows_reported_total() {
        let mock = scripted(vec![
            json!({"status": "waiting"}),
            json!({"status": "progress", "done": 1000, "total": 5000}),
            success("file-5"),
        ]);

        let mut upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(upload.total_size(), 0);

        assert_eq!(upload.next_progress().await, Some(1000));
        assert_eq!(upload.total_size(), 5000);

        assert_eq!(upload.next_progress().await, None);
        assert_eq!(upload.total_size(), 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_outcome_polling() {
        let mock = scripted(vec![success("file-4")]);

        let mut upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(upload.try_outcome().is_none());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(upload.try_outcome().unwrap().unwrap().id, "file-4");
        assert!(upload.try_outcome().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polling_until_observed() {
        let mock = scripted(vec![success("file-3")]);

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 0);
        drop(upload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_file_skips_polling() {
        let mock = Arc::new(MockTransport::new(|_| {
            Ok(json!({
                "type": "file_info",
                "uuid": "cached-1",
                "original_filename": "photo.jpg",
                "size": 642,
                "total": 642,
                "done": 642
            }))
        }));

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(upload.info().unwrap().id, "cached-1");
        assert_eq!(upload.total_size(), 642);
        assert!(upload.token().is_none());

        let (outcome, mut progress) = upload.into_parts();
        assert_eq!(outcome.await.unwrap().id, "cached-1");
        assert!(progress.recv().await.is_none());
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() {
        let mock = scripted(vec![success("never")]);
        let cancel = CancellationToken::new();

        let upload = start(
            mock.clone(),
            &config(),
            FromUrlParams::new("https://example.com/photo.jpg"),
            cancel.clone(),
        )
        .await
        .unwrap();
        let (outcome, _progress) = upload.into_parts();

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        assert!(matches!(outcome.await, Err(UploadError::Cancelled)));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(mock.count(FROM_URL_STATUS_PATH), 0);
    }

    #[tokio::test]
    async fn test_start_request_fields() {
        let mock = scripted(vec![]);
        let params = FromUrlParams {
            url: "https://example.com/a.png".to_string(),
            file_name: Some("renamed.png".to_string()),
            check_url_duplicates: Some(true),
            save_url_duplicates: Some(false),
            ..Default::default()
        };

        let _upload = start(mock.clone(), &config(), params, CancellationToken::new())
            .await
            .unwrap();

        let requests = mock.requests();
        let req = &requests[0];
        assert_eq!(req.route(), FROM_URL_PATH);
        assert_eq!(req.param("pub_key"), Some("demopublickey"));
        assert_eq!(req.param("source_url"), Some("https://example.com/a.png"));
        assert_eq!(req.param("store"), Some("auto"));
        assert_eq!(req.param("filename"), Some("renamed.png"));
        assert_eq!(req.param("check_URL_duplicates"), Some("1"));
        assert_eq!(req.param("save_URL_duplicates"), Some("0"));
    }

    #[test]
    fn test_job_status_parsing() {
        assert_eq!(
            JobStatus::from_response(json!({"status": "waiting"})).unwrap(),
            JobStatus::Waiting
        );
        assert_eq!(
            JobStatus::from_response(json!({"status": "progress", "done": 7, "total": 9})).unwrap(),
            JobStatus::Progress { done: 7, total: 9 }
        );
        assert_eq!(
            JobStatus::from_response(json!({"status": "error", "error": "bad format"})).unwrap(),
            JobStatus::Error("bad format".to_string())
        );
        assert_eq!(
            JobStatus::from_response(json!({"status": "unknown"})).unwrap(),
            JobStatus::Unknown
        );
        match JobStatus::from_response(success("ok")).unwrap() {
            JobStatus::Success(file) => assert_eq!(file.id, "ok"),
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_start_response() {
        assert!(parse_started(json!({"type": "token"})).is_err());
        assert!(matches!(
            parse_started(json!({"type": "token", "token": "t"})),
            Ok(Started::Queued { token }) if token == "t"
        ));
    }
}
