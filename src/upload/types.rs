use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncSeek};

use super::helpers::{detect_content_type, file_name_of};
use crate::error::{Result, UploadError};

/// File storing behaviour requested for an upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreMode {
    /// Store the file permanently
    Store,
    /// Leave the file temporary (removed within 24 hours)
    Temporary,
    /// Follow the project setting
    #[default]
    Auto,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "1",
            Self::Temporary => "0",
            Self::Auto => "auto",
        }
    }
}

pub(crate) fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

/// File info in the context of uploading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    #[serde(rename = "uuid")]
    pub id: String,
    /// File name taken from the uploaded file
    pub original_filename: String,
    /// Sanitized `original_filename`
    pub filename: String,
    pub size: u64,
    pub mime_type: String,
    pub is_image: bool,
    /// File is ready to be used after upload
    pub is_ready: bool,
    pub is_stored: bool,
    /// Currently uploaded size in bytes
    pub done: u64,
    /// Same as size once known
    pub total: u64,
    pub image_info: Option<ImageInfo>,
    pub video_info: Option<VideoInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageInfo {
    pub color_mode: String,
    pub format: String,
    pub height: u64,
    pub width: u64,
    /// EXIF orientation
    pub orientation: Option<u32>,
    pub dpi: Option<Vec<u32>>,
    pub geo_location: Option<GeoLocation>,
    pub datetime_original: Option<String>,
    /// Animated image (GIF for example)
    pub sequence: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoInfo {
    /// Duration in milliseconds
    pub duration: Option<u64>,
    pub format: String,
    pub bitrate: Option<u64>,
    pub audio: Option<AudioStream>,
    pub video: Option<VideoStream>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioStream {
    pub bitrate: Option<u64>,
    pub codec: Option<String>,
    pub sample_rate: Option<u64>,
    pub channels: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoStream {
    pub height: u64,
    pub width: u64,
    pub frame_rate: f64,
    pub bitrate: Option<u64>,
    pub codec: Option<String>,
}

/// Group of files as returned by the upload API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupInfo {
    /// Looks like `UUID~N`
    pub id: String,
    pub datetime_created: Option<String>,
    pub datetime_stored: Option<String>,
    pub files_count: u64,
    pub cdn_url: String,
    /// API URL of this group
    #[serde(alias = "uri")]
    pub url: String,
    /// Member files; missing files come back as `None`
    pub files: Vec<Option<FileInfo>>,
}

/// Parameters for a direct (single request) upload
#[derive(Clone)]
pub struct FileParams {
    /// File name (required)
    pub name: String,
    /// Data to upload, smaller than 100MB
    pub data: Vec<u8>,
    /// Detected from the name when unset
    pub content_type: Option<String>,
    pub store: StoreMode,
}

impl FileParams {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            content_type: None,
            store: StoreMode::Auto,
        }
    }

    /// Read a local file into upload parameters
    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = file_name_of(path).ok_or_else(|| {
            UploadError::InvalidParams(format!("{} has no file name", path.display()))
        })?;
        let data = tokio::fs::read(path).await?;
        Ok(Self::new(name, data))
    }

    pub fn with_store(mut self, store: StoreMode) -> Self {
        self.store = store;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub(crate) fn resolved_content_type(&self) -> String {
        match &self.content_type {
            Some(ct) if !ct.is_empty() => ct.clone(),
            _ => detect_content_type(&self.name).to_string(),
        }
    }
}

impl fmt::Debug for FileParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileParams")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("content_type", &self.content_type)
            .field("store", &self.store)
            .finish()
    }
}

/// Parameters for uploading a file from a public URL
#[derive(Debug, Clone, Default)]
pub struct FromUrlParams {
    /// Public HTTP or HTTPS link to the file
    pub url: String,
    pub store: StoreMode,
    /// Overrides the name taken from response headers or the URL
    pub file_name: Option<String>,
    /// Run the duplicate check and reuse an earlier upload of the same URL
    pub check_url_duplicates: Option<bool>,
    /// Remember this URL for later duplicate checks; defaults to the
    /// value of `check_url_duplicates` on the provider side
    pub save_url_duplicates: Option<bool>,
}

impl FromUrlParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_store(mut self, store: StoreMode) -> Self {
        self.store = store;
        self
    }
}

/// Seekable byte source for multipart uploads
pub trait DataSource: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> DataSource for T {}

/// Parameters for a multipart upload
pub struct MultipartParams {
    /// Original file name (required)
    pub file_name: String,
    /// Exact size of the data in bytes
    pub size: u64,
    /// MIME type of the data (required)
    pub content_type: String,
    /// Data to upload (required)
    pub data: Option<Box<dyn DataSource>>,
    pub store: StoreMode,
}

impl MultipartParams {
    pub fn new(
        file_name: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
        data: impl DataSource + 'static,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            size,
            content_type: content_type.into(),
            data: Some(Box::new(data)),
            store: StoreMode::Auto,
        }
    }

    /// Open a local file for multipart upload
    pub async fn from_path(path: &Path) -> Result<Self> {
        let file_name = file_name_of(path).ok_or_else(|| {
            UploadError::InvalidParams(format!("{} has no file name", path.display()))
        })?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let content_type = detect_content_type(&file_name);
        Ok(Self::new(file_name, size, content_type, file))
    }

    pub fn with_store(mut self, store: StoreMode) -> Self {
        self.store = store;
        self
    }
}

impl fmt::Debug for MultipartParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartParams")
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("has_data", &self.data.is_some())
            .field("store", &self.store)
            .finish()
    }
}
