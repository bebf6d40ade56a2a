use serde::Deserialize;
use tracing::{debug, info};

use super::types::FileParams;
use crate::config::{Config, DIRECT_UPLOAD_MAX};
use crate::error::{Result, UploadError};
use crate::transport::{ApiRequest, FilePart, Transport};

const DIRECT_UPLOAD_PATH: &str = "/base/";

#[derive(Debug, Deserialize)]
struct DirectResponse {
    file: String,
}

/// Upload a small file with a single multipart/form-data request
///
/// Returns the id of the uploaded file.
pub(crate) async fn upload_file(
    transport: &dyn Transport,
    config: &Config,
    params: FileParams,
) -> Result<String> {
    if params.name.trim().is_empty() {
        return Err(UploadError::InvalidParams(
            "file name cannot be empty".to_string(),
        ));
    }

    let size = params.data.len() as u64;
    if size > DIRECT_UPLOAD_MAX {
        return Err(UploadError::FileTooLarge {
            message: format!(
                "{} bytes (max: {} bytes for direct upload)",
                size, DIRECT_UPLOAD_MAX
            ),
        });
    }

    let content_type = params.resolved_content_type();
    info!("Uploading {} ({} bytes, {})", params.name, size, content_type);

    let fields = vec![
        ("UPLOADCARE_PUB_KEY".to_string(), config.public_key.clone()),
        ("UPLOADCARE_STORE".to_string(), params.store.as_str().to_string()),
    ];
    let file = FilePart {
        field: "file".to_string(),
        file_name: params.name,
        content_type,
        data: params.data,
    };

    let response = transport
        .send(ApiRequest::post_file(DIRECT_UPLOAD_PATH, fields, file))
        .await?;
    let uploaded: DirectResponse = serde_json::from_value(response)?;

    debug!("uploaded file: {}", uploaded.file);
    Ok(uploaded.file)
}
