use futures::future::BoxFuture;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, RETRY_AFTER, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode, multipart};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ApiRequest, Payload, Target, Transport};
use crate::config::Config;
use crate::error::{Result, UploadError};

/// reqwest-backed [`Transport`] for the upload API
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<Config>,
}

impl HttpTransport {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder().use_rustls_tls().build()?;
        Ok(Self { client, config })
    }

    /// Use a preconfigured client (proxies, timeouts, custom TLS)
    pub fn with_client(client: reqwest::Client, config: Arc<Config>) -> Self {
        Self { client, config }
    }

    async fn execute(&self, request: ApiRequest) -> Result<Value> {
        let url = match &request.target {
            Target::Api(path) => self.config.endpoint(path),
            Target::Url(url) => url.clone(),
        };

        let mut tries = 0u32;
        loop {
            tries += 1;
            debug!("making request #{}: {} {}", tries, request.method, url);

            let response = self.build(&request, &url)?.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(response.headers());
                if tries > self.config.max_throttle_retries {
                    return Err(UploadError::Throttled { retry_after });
                }

                let delay = retry_after
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(self.config.throttle_delay);
                warn!(
                    "request throttled: {} {}, retrying in {:?}",
                    request.method, url, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            let body = response.text().await?;
            debug!("received response: {} ({} bytes)", status, body.len());

            if !status.is_success() {
                return Err(error_for_status(status, body));
            }

            return decode_body(&body);
        }
    }

    fn build(&self, request: &ApiRequest, url: &str) -> Result<RequestBuilder> {
        let builder = self
            .client
            .request(request.method.clone(), url)
            .header(USER_AGENT, &self.config.user_agent);

        let builder = match &request.payload {
            Payload::Empty => builder,
            Payload::Query(params) => builder.query(params),
            Payload::Form { fields, file } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                if let Some(file) = file {
                    let part = multipart::Part::bytes(file.data.clone())
                        .file_name(file.file_name.clone())
                        .mime_str(&file.content_type)
                        .map_err(|_| {
                            UploadError::InvalidParams(format!(
                                "invalid content type '{}'",
                                file.content_type
                            ))
                        })?;
                    form = form.part(file.field.clone(), part);
                }
                builder.multipart(form)
            }
            Payload::Raw { content_type, data } => builder
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, data.len())
                .body(data.clone()),
        };

        Ok(builder)
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value>> {
        Box::pin(self.execute(request))
    }
}

/// Map a non-success response to the matching error variant
fn error_for_status(status: StatusCode, body: String) -> UploadError {
    let message = detail(&body);
    match status {
        StatusCode::BAD_REQUEST => UploadError::Validation { message },
        StatusCode::UNAUTHORIZED => UploadError::Auth { message },
        StatusCode::FORBIDDEN => UploadError::Forbidden { message },
        StatusCode::PAYLOAD_TOO_LARGE => UploadError::FileTooLarge { message },
        _ => UploadError::Http {
            status: status.as_u16(),
            body,
        },
    }
}

/// Error responses are either plain text or `{"detail": "..."}`
fn detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn decode_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}
