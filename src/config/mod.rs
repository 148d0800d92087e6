use std::path::PathBuf;
use std::time::Duration;

// API endpoints
pub const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/youtube/v3";
pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

// OAuth scopes
pub const SCOPE_UPLOAD: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const SCOPE_FORCE_SSL: &str = "https://www.googleapis.com/auth/youtube.force-ssl";
pub const SCOPE_READONLY: &str = "https://www.googleapis.com/auth/youtube.readonly";

/// Scopes requested by the upload tool (upload plus the privacy-update path).
pub const UPLOAD_SCOPES: [&str; 3] = [SCOPE_UPLOAD, SCOPE_FORCE_SSL, SCOPE_READONLY];
/// Scopes requested by the metadata update tool.
pub const UPDATE_SCOPES: [&str; 1] = [SCOPE_FORCE_SSL];

// Authentication
pub const CLIENT_SECRETS_FILE: &str = "client_secrets.json";
pub const OAUTH_CALLBACK_PORT: u16 = 8080;
pub const TOKEN_EXPIRY_SKEW_SECS: u64 = 60;

// Retry parameters
pub const MAX_RETRIES: u32 = 10;
pub const RETRIABLE_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

// Upload parameters
pub const UPLOAD_CHUNK_GRANULARITY: usize = 256 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = 32 * UPLOAD_CHUNK_GRANULARITY; // 8 MiB
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_VIDEO_MIME: &str = "video/*";

// Video defaults
pub const DEFAULT_CATEGORY: &str = "22";
pub const DEFAULT_TITLE: &str = "Test Title";
pub const DEFAULT_DESCRIPTION: &str = "Test Description";

// Success reporting
pub const SUCCESS_MARKER_PATH: &str = "uploads/success.txt";
pub const SUCCESS_PAGE_URL: &str =
    "http://localhost:5000/success?message='Video uploaded successfully'";

/// Round a requested chunk size to the granularity the resumable protocol
/// accepts for every chunk but the last. Never returns zero.
pub fn aligned_chunk_size(requested: usize) -> usize {
    let chunks = (requested / UPLOAD_CHUNK_GRANULARITY).max(1);
    chunks * UPLOAD_CHUNK_GRANULARITY
}

/// Which failures the uploader retries, and how many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retriable_statuses: Vec<u16>,
}

impl RetryPolicy {
    pub fn is_retriable_status(&self, status: u16) -> bool {
        self.retriable_statuses.contains(&status)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            retriable_statuses: RETRIABLE_STATUS_CODES.to_vec(),
        }
    }
}

/// Runtime configuration for an upload.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub success_marker: Option<PathBuf>,
    pub mime_type: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            success_marker: Some(PathBuf::from(SUCCESS_MARKER_PATH)),
            mime_type: DEFAULT_VIDEO_MIME.to_string(),
        }
    }
}

/// Endpoints and transport settings for the API client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base: String,
    pub upload_base: String,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: API_BASE_URL.to_string(),
            upload_base: UPLOAD_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Settings for the installed-app consent flow.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_secrets: PathBuf,
    pub token_cache: Option<PathBuf>,
    pub callback_port: u16,
    pub open_browser: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secrets: PathBuf::from(CLIENT_SECRETS_FILE),
            token_cache: None,
            callback_port: OAUTH_CALLBACK_PORT,
            open_browser: true,
        }
    }
}
