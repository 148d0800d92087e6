pub mod api;
pub mod auth;
pub mod config;
pub mod update;
pub mod upload;
pub mod video;

pub use api::{ApiError, VideoApi, YouTubeClient};
pub use config::{AuthConfig, ClientConfig, RetryPolicy, UploadConfig};
pub use update::{update_metadata, update_privacy, MetadataUpdate, UpdateError};
pub use upload::{
    upload_video, ChunkOutcome, ChunkSender, ResumableUploader, UploadError, UploadReceipt,
};
pub use video::{PrivacyStatus, UploadRequest};
