//! Upload API operations.
//!
//! [`UploadService`] is the entry point. Small files go through
//! [`UploadService::upload_file`] in a single request; files on the web are
//! fetched by the provider with [`UploadService::from_url`]; large local
//! data is split into parts with [`UploadService::multipart`]. The last two
//! return handles that resolve in the background.

mod direct;
mod from_url;
mod handle;
mod helpers;
mod lookup;
mod multipart;
mod types;

pub use from_url::FromUrlUpload;
pub use handle::{Outcome, UploadHandle};
pub use helpers::detect_content_type;
pub use multipart::MultipartUpload;
pub use types::{
    AudioStream, DataSource, FileInfo, FileParams, FromUrlParams, GeoLocation, GroupInfo,
    ImageInfo, MultipartParams, StoreMode, VideoInfo, VideoStream,
};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::transport::{HttpTransport, Transport};

/// Client for the upload API
#[derive(Clone)]
pub struct UploadService {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
}

impl UploadService {
    /// Create a service talking to the upload API over HTTP
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let transport = HttpTransport::new(config.clone())?;
        Ok(Self {
            transport: Arc::new(transport),
            config,
        })
    }

    /// Create a service from `UPLOADCARE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(Config::from_env()?)
    }

    /// Use a custom transport, e.g. a recording or offline one
    pub fn with_transport(config: Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Upload a file smaller than 100MB in one request and return its id
    pub async fn upload_file(&self, params: FileParams) -> Result<String> {
        direct::upload_file(self.transport.as_ref(), &self.config, params).await
    }

    /// Ask the provider to fetch a file from a public URL.
    ///
    /// `cancel` stops the status polling; the job itself keeps running on
    /// the provider side.
    pub async fn from_url(
        &self,
        params: FromUrlParams,
        cancel: CancellationToken,
    ) -> Result<FromUrlUpload> {
        validate_source_url(&params.url)?;
        from_url::start(self.transport.clone(), &self.config, params, cancel).await
    }

    /// Upload a large file in parts.
    ///
    /// The data source must hold exactly `params.size` bytes. Parts are
    /// uploaded in the background; `cancel` stops the upload before the
    /// session is completed.
    pub async fn multipart(
        &self,
        params: MultipartParams,
        cancel: CancellationToken,
    ) -> Result<MultipartUpload> {
        if params.file_name.trim().is_empty() {
            return Err(UploadError::InvalidParams(
                "file name cannot be empty".to_string(),
            ));
        }
        if params.content_type.trim().is_empty() {
            return Err(UploadError::InvalidParams(
                "content type cannot be empty".to_string(),
            ));
        }
        multipart::start(self.transport.clone(), &self.config, params, cancel).await
    }

    pub async fn file_info(&self, file_id: &str) -> Result<FileInfo> {
        lookup::file_info(self.transport.as_ref(), &self.config, file_id).await
    }

    /// Create a file group; files must be uploaded beforehand
    pub async fn create_group(&self, file_ids: &[String]) -> Result<GroupInfo> {
        lookup::create_group(self.transport.as_ref(), &self.config, file_ids).await
    }

    pub async fn group_info(&self, group_id: &str) -> Result<GroupInfo> {
        lookup::group_info(self.transport.as_ref(), &self.config, group_id).await
    }
}

fn validate_source_url(url: &str) -> Result<()> {
    if url.trim().is_empty() {
        return Err(UploadError::InvalidParams(
            "source URL cannot be empty".to_string(),
        ));
    }

    let parsed = reqwest::Url::parse(url)
        .map_err(|e| UploadError::InvalidParams(format!("'{}' is not a valid URL: {}", url, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(UploadError::InvalidParams(format!(
            "'{}' must use http or https (got {})",
            url,
            parsed.scheme()
        )));
    }
    Ok(())
}
