//! Read-side calls of the upload API: file info and file groups.

use tracing::debug;

use super::types::{FileInfo, GroupInfo};
use crate::config::Config;
use crate::error::{Result, UploadError};
use crate::transport::{ApiRequest, Transport};

const FILE_INFO_PATH: &str = "/info/";
const GROUP_CREATE_PATH: &str = "/group/";
const GROUP_INFO_PATH: &str = "/group/info/";

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(UploadError::InvalidParams(format!("{} cannot be empty", name)));
    }
    Ok(())
}

/// Info about an uploaded file, including files that are not stored yet
pub(crate) async fn file_info(
    transport: &dyn Transport,
    config: &Config,
    file_id: &str,
) -> Result<FileInfo> {
    require("file id", file_id)?;

    let query = vec![
        ("file_id".to_string(), file_id.to_string()),
        ("pub_key".to_string(), config.public_key.clone()),
    ];
    let response = transport.send(ApiRequest::get(FILE_INFO_PATH, query)).await?;
    Ok(serde_json::from_value(response)?)
}

/// Create a group from already uploaded files
pub(crate) async fn create_group(
    transport: &dyn Transport,
    config: &Config,
    file_ids: &[String],
) -> Result<GroupInfo> {
    if file_ids.is_empty() {
        return Err(UploadError::InvalidParams(
            "a group needs at least one file".to_string(),
        ));
    }

    let mut fields = vec![("pub_key".to_string(), config.public_key.clone())];
    for (i, id) in file_ids.iter().enumerate() {
        require("file id", id)?;
        fields.push((format!("files[{}]", i), id.clone()));
    }

    let response = transport
        .send(ApiRequest::post_form(GROUP_CREATE_PATH, fields))
        .await?;
    let group: GroupInfo = serde_json::from_value(response)?;

    debug!("created group: {} ({} files)", group.id, group.files_count);
    Ok(group)
}

pub(crate) async fn group_info(
    transport: &dyn Transport,
    config: &Config,
    group_id: &str,
) -> Result<GroupInfo> {
    require("group id", group_id)?;

    let query = vec![
        ("pub_key".to_string(), config.public_key.clone()),
        ("group_id".to_string(), group_id.to_string()),
    ];
    let response = transport.send(ApiRequest::get(GROUP_INFO_PATH, query)).await?;
    Ok(serde_json::from_value(response)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use reqwest::Method;
    use serde_json::json;

    fn config() -> Config {
        Config::new("demopublickey")
    }

    #[tokio::test]
    async fn test_file_info_query() {
        let mock = MockTransport::new(|req| {
            Ok(json!({"uuid": req.param("file_id"), "size": 42, "is_stored": true}))
        });

        let info = file_info(&mock, &config(), "abc").await.unwrap();
        assert_eq!(info.id, "abc");
        assert_eq!(info.size, 42);

        let req = &mock.requests()[0];
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.route(), FILE_INFO_PATH);
        assert_eq!(req.param("pub_key"), Some("demopublickey"));
    }

    #[tokio::test]
    async fn test_create_group_fields() {
        let mock = MockTransport::new(|_| {
            Ok(json!({"id": "g~2", "files_count": 2, "files": [{"uuid": "a"}, {"uuid": "b"}]}))
        });
        let ids = vec!["a".to_string(), "b".to_string()];

        let group = create_group(&mock, &config(), &ids).await.unwrap();
        assert_eq!(group.id, "g~2");
        assert_eq!(group.files.len(), 2);

        let req = &mock.requests()[0];
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.param("files[0]"), Some("a"));
        assert_eq!(req.param("files[1]"), Some("b"));
        assert_eq!(req.param("pub_key"), Some("demopublickey"));
    }

    #[tokio::test]
    async fn test_create_group_requires_files() {
        let mock = MockTransport::new(|_| Ok(json!({})));

        assert!(create_group(&mock, &config(), &[]).await.is_err());
        assert!(
            create_group(&mock, &config(), &["a".to_string(), String::new()])
                .await
                .is_err()
        );
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_group_info() {
        let mock = MockTransport::new(|req| {
            Ok(json!({"id": req.param("group_id"), "files_count": 1, "files": [null]}))
        });

        let group = group_info(&mock, &config(), "g~1").await.unwrap();
        assert_eq!(group.id, "g~1");
        assert!(group.files[0].is_none());
        assert!(group_info(&mock, &config(), "").await.is_err());
    }
}
