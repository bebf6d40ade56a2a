//! Client for the Uploadcare upload API.
//!
//! Three ways to get a file into a project:
//!
//! - direct upload of an in-memory payload ([`UploadService::upload_file`])
//! - fetching from a public URL, tracked by a background poller
//!   ([`UploadService::from_url`])
//! - concurrent multipart upload of a seekable source
//!   ([`UploadService::multipart`])
//!
//! ```no_run
//! use ucare_upload::{Config, FromUrlParams, UploadService};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> ucare_upload::Result<()> {
//! let service = UploadService::new(Config::new("demopublickey"))?;
//! let upload = service
//!     .from_url(
//!         FromUrlParams::new("https://example.com/photo.jpg"),
//!         CancellationToken::new(),
//!     )
//!     .await?;
//! let file = upload.wait().await?;
//! println!("uploaded {}", file.id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod transport;
pub mod upload;

pub use config::Config;
pub use error::{Result, UploadError};
pub use transport::{ApiRequest, HttpTransport, Transport};
pub use upload::{
    DataSource, FileInfo, FileParams, FromUrlParams, FromUrlUpload, GroupInfo, MultipartParams,
    MultipartUpload, Outcome, StoreMode, UploadHandle, UploadService,
};
