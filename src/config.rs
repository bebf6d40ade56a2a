use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Default upload API endpoint
pub const DEFAULT_UPLOAD_BASE: &str = "https://upload.uploadcare.com";

/// Size of every multipart part except the last one (5MB)
pub const PART_SIZE: u64 = 5 * 1024 * 1024;

/// Smallest file the provider accepts for multipart upload (10MB)
pub const MULTIPART_MIN_SIZE: u64 = 10 * 1024 * 1024;

/// Largest payload accepted by direct upload (100MB)
pub const DIRECT_UPLOAD_MAX: u64 = 100 * 1024 * 1024;

const CONCURRENT_PART_UPLOADS: usize = 5;
const MAX_PART_ATTEMPTS: u32 = 2;
const MAX_THROTTLE_RETRIES: u32 = 3;

/// Configuration for upload API operations
#[derive(Debug, Clone)]
pub struct Config {
    /// Project public key, sent with every upload API request
    pub public_key: String,
    /// Base URL of the upload API, without trailing slash
    pub upload_base: String,
    /// Delay between two from-URL status checks
    pub poll_interval: Duration,
    /// Maximum number of parts uploaded at the same time
    pub max_concurrent_parts: usize,
    /// Attempts per part before the multipart upload fails
    pub max_part_attempts: u32,
    /// Pause between two attempts of the same part
    pub part_retry_delay: Duration,
    /// Part size used to slice the data source; must match the provider's
    pub part_size: u64,
    /// Smallest size accepted by [`crate::UploadService::multipart`]
    pub multipart_min_size: u64,
    /// Throttled requests are retried this many times by the transport
    pub max_throttle_retries: u32,
    /// Wait used when a throttled response carries no Retry-After
    pub throttle_delay: Duration,
    pub user_agent: String,
}

impl Config {
    /// Create a configuration with default tunables for the given project
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            poll_interval: Duration::from_secs(3),
            max_concurrent_parts: CONCURRENT_PART_UPLOADS,
            max_part_attempts: MAX_PART_ATTEMPTS,
            part_retry_delay: Duration::from_secs(1),
            part_size: PART_SIZE,
            multipart_min_size: MULTIPART_MIN_SIZE,
            max_throttle_retries: MAX_THROTTLE_RETRIES,
            throttle_delay: Duration::from_secs(5),
            user_agent: format!("UcareUploadRust/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Load configuration from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists

        let public_key = env::var("UPLOADCARE_PUBLIC_KEY").context(
            "UPLOADCARE_PUBLIC_KEY not found in environment. Please set it in .env file",
        )?;
        Self::validate_public_key(&public_key)?;

        let mut config = Self::new(public_key);

        if let Ok(base) = env::var("UPLOADCARE_UPLOAD_BASE") {
            Self::validate_upload_base(&base)?;
            config.upload_base = base.trim_end_matches('/').to_string();
        }

        if let Ok(value) = env::var("UPLOADCARE_MAX_CONCURRENT") {
            config.max_concurrent_parts = Self::parse_concurrency(&value)?;
        }

        if let Ok(value) = env::var("UPLOADCARE_POLL_INTERVAL_SECS") {
            let secs: u64 = value.parse().with_context(|| {
                format!("UPLOADCARE_POLL_INTERVAL_SECS '{}' is not a number", value)
            })?;
            if secs == 0 {
                anyhow::bail!("UPLOADCARE_POLL_INTERVAL_SECS must be greater than 0");
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validate the project public key
    fn validate_public_key(key: &str) -> Result<()> {
        if key.is_empty() {
            anyhow::bail!("UPLOADCARE_PUBLIC_KEY cannot be empty");
        }

        if let Some(c) = key.chars().find(|c| !c.is_ascii_alphanumeric()) {
            anyhow::bail!(
                "UPLOADCARE_PUBLIC_KEY contains invalid character '{}'. Only letters and digits are allowed",
                c
            );
        }

        Ok(())
    }

    /// Validate the upload API base URL
    fn validate_upload_base(base: &str) -> Result<()> {
        if base.is_empty() {
            anyhow::bail!("UPLOADCARE_UPLOAD_BASE cannot be empty");
        }

        let url = reqwest::Url::parse(base)
            .with_context(|| format!("UPLOADCARE_UPLOAD_BASE '{}' is not a valid URL", base))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!(
                "UPLOADCARE_UPLOAD_BASE '{}' must use http or https (got {})",
                base,
                url.scheme()
            );
        }

        if url.query().is_some() {
            anyhow::bail!("UPLOADCARE_UPLOAD_BASE '{}' must not contain a query", base);
        }

        Ok(())
    }

    fn parse_concurrency(value: &str) -> Result<usize> {
        let n: usize = value
            .parse()
            .with_context(|| format!("UPLOADCARE_MAX_CONCURRENT '{}' is not a number", value))?;
        if n == 0 || n > 32 {
            anyhow::bail!("UPLOADCARE_MAX_CONCURRENT must be between 1 and 32 (got {})", n);
        }
        Ok(n)
    }

    /// Construct the full upload API URL for a path such as `/from_url/`
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.upload_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
