use log::info;
use thiserror::Error;

use crate::api::{ApiError, VideoApi};
use crate::config;
use crate::video::{PrivacyStatus, Video, VideoSnippet, VideoStatus};

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("No video found with ID {0}")]
    NoVideoFound(String),
    #[error("An HTTP error occurred: {0}")]
    Api(#[from] ApiError),
}

/// Change only the privacy status of an existing video.
///
/// The current status is fetched first so every other status field is sent
/// back unchanged. Nothing is updated when the id does not resolve.
pub fn update_privacy<A: VideoApi + ?Sized>(
    api: &A,
    video_id: &str,
    privacy_status: PrivacyStatus,
) -> Result<Video, UpdateError> {
    let current = api
        .find_video(video_id, "status")?
        .ok_or_else(|| UpdateError::NoVideoFound(video_id.to_string()))?;

    let mut status = current.status.unwrap_or_default();
    status.privacy_status = Some(privacy_status);

    let updated = api.update_video(&Video {
        id: Some(video_id.to_string()),
        snippet: None,
        status: Some(status),
    })?;
    info!("Video privacy status updated to {privacy_status} for video ID {video_id}");
    Ok(updated)
}

/// New metadata for an existing video.
#[derive(Debug, Clone)]
pub struct MetadataUpdate {
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy_status: PrivacyStatus,
}

impl MetadataUpdate {
    pub fn to_video(&self) -> Video {
        Video {
            id: Some(self.video_id.clone()),
            snippet: Some(VideoSnippet {
                title: Some(self.title.clone()),
                description: Some(self.description.clone()),
                tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
                category_id: Some(config::DEFAULT_CATEGORY.to_string()),
            }),
            status: Some(VideoStatus {
                privacy_status: Some(self.privacy_status),
                ..Default::default()
            }),
        }
    }
}

/// Replace title, description, tags and privacy of a video in one call.
pub fn update_metadata<A: VideoApi + ?Sized>(
    api: &A,
    update: &MetadataUpdate,
) -> Result<Video, UpdateError> {
    let updated = api.update_video(&update.to_video())?;
    info!(
        "Video updated: {}",
        updated.id.as_deref().unwrap_or(&update.video_id)
    );
    Ok(updated)
}
