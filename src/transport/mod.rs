//! Transport seam between the upload service and the network.
//!
//! The upload service and its background workers only talk to a
//! [`Transport`]. [`HttpTransport`] is the production implementation; tests
//! and callers with special networking needs can plug in their own.

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::Value;
use std::fmt;

use crate::error::Result;

pub use http::HttpTransport;

/// Performs one API call and returns the decoded JSON body.
///
/// Implementations own request construction, authentication headers,
/// status classification and throttle retries. Empty success bodies decode
/// to [`Value::Null`].
pub trait Transport: Send + Sync {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>>;
}

/// Where a request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Path relative to the upload API base, e.g. `/from_url/`
    Api(String),
    /// Absolute URL handed out by the provider (multipart part URLs)
    Url(String),
}

/// File attached to a multipart/form-data request
#[derive(Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Encoded request payload
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    /// Query string parameters
    Query(Vec<(String, String)>),
    /// multipart/form-data text fields, optionally with one file
    Form {
        fields: Vec<(String, String)>,
        file: Option<FilePart>,
    },
    /// Raw body sent with explicit Content-Type and Content-Length
    Raw { content_type: String, data: Vec<u8> },
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Query(params) => f.debug_tuple("Query").field(params).finish(),
            Self::Form { fields, file } => f
                .debug_struct("Form")
                .field("fields", fields)
                .field(
                    "file",
                    &file
                        .as_ref()
                        .map(|p| format!("{} ({} bytes)", p.file_name, p.data.len())),
                )
                .finish(),
            Self::Raw { content_type, data } => f
                .debug_struct("Raw")
                .field("content_type", content_type)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// A single API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub target: Target,
    pub payload: Payload,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, query: Vec<(String, String)>) -> Self {
        Self {
            method: Method::GET,
            target: Target::Api(path.into()),
            payload: Payload::Query(query),
        }
    }

    pub fn post_form(path: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::POST,
            target: Target::Api(path.into()),
            payload: Payload::Form { fields, file: None },
        }
    }

    pub fn post_file(path: impl Into<String>, fields: Vec<(String, String)>, file: FilePart) -> Self {
        Self {
            method: Method::POST,
            target: Target::Api(path.into()),
            payload: Payload::Form {
                fields,
                file: Some(file),
            },
        }
    }

    /// Raw PUT of part bytes to a provider-issued URL
    pub fn put_part(url: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            method: Method::PUT,
            target: Target::Url(url.into()),
            payload: Payload::Raw {
                content_type: content_type.into(),
                data,
            },
        }
    }

    /// Path for API targets, full URL otherwise
    pub fn route(&self) -> &str {
        match &self.target {
            Target::Api(path) => path,
            Target::Url(url) => url,
        }
    }

    /// Look up a form field or query parameter by name
    pub fn param(&self, name: &str) -> Option<&str> {
        let params = match &self.payload {
            Payload::Query(params) => params,
            Payload::Form { fields, .. } => fields,
            _ => return None,
        };
        params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_lookup() {
        let req = ApiRequest::post_form(
            "/multipart/complete/",
            vec![
                ("UPLOADCARE_PUB_KEY".to_string(), "demo".to_string()),
                ("uuid".to_string(), "abc".to_string()),
            ],
        );
        assert_eq!(req.param("uuid"), Some("abc"));
        assert_eq!(req.param("missing"), None);
        assert_eq!(req.route(), "/multipart/complete/");

        let put = ApiRequest::put_part("https://s3.example/part?partNumber=1", "text/plain", vec![1]);
        assert_eq!(put.param("uuid"), None);
        assert_eq!(put.method, Method::PUT);
    }

    #[test]
    fn test_payload_debug_hides_bytes() {
        let put = ApiRequest::put_part("https://s3.example/p", "text/plain", vec![0u8; 4096]);
        let rendered = format!("{:?}", put.payload);
        assert!(rendered.contains("4096"));
        assert!(rendered.len() < 100);
    }
}
