use std::fmt;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config;

/// Visibility of a hosted video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    Public,
    Private,
    Unlisted,
}

impl PrivacyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyStatus::Public => "public",
            PrivacyStatus::Private => "private",
            PrivacyStatus::Unlisted => "unlisted",
        }
    }
}

impl fmt::Display for PrivacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a comma-separated keyword list into tags.
///
/// Whitespace around each keyword is trimmed, empty entries are dropped and
/// repeated keywords keep only their first occurrence.
pub fn parse_keywords(keywords: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for keyword in keywords.split(',').map(str::trim) {
        if !keyword.is_empty() && !tags.iter().any(|t| t == keyword) {
            tags.push(keyword.to_string());
        }
    }
    tags
}

/// The `snippet` part of a video resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
}

/// The `status` part of a video resource.
///
/// Only the privacy field is modelled; every other field the API returns is
/// kept in `other` so an update sends it back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy_status: Option<PrivacyStatus>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A video resource as sent to and returned by `videos.insert`/`videos.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Video {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<VideoSnippet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VideoStatus>,
}

impl Video {
    /// Comma-joined names of the parts this resource carries, as the API's
    /// `part` parameter expects.
    pub fn parts(&self) -> String {
        let mut parts = Vec::new();
        if self.snippet.is_some() {
            parts.push("snippet");
        }
        if self.status.is_some() {
            parts.push("status");
        }
        parts.join(",")
    }
}

/// Everything needed to upload one file. Built once from CLI input.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: PrivacyStatus,
}

impl UploadRequest {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            title: config::DEFAULT_TITLE.to_string(),
            description: config::DEFAULT_DESCRIPTION.to_string(),
            tags: Vec::new(),
            category_id: config::DEFAULT_CATEGORY.to_string(),
            privacy_status: PrivacyStatus::Unlisted,
        }
    }

    /// The `videos.insert` request body.
    pub fn to_video(&self) -> Video {
        Video {
            id: None,
            snippet: Some(VideoSnippet {
                title: Some(self.title.clone()),
                description: Some(self.description.clone()),
                tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
                category_id: Some(self.category_id.clone()),
            }),
            status: Some(VideoStatus {
                privacy_status: Some(self.privacy_status),
                other: Map::new(),
            }),
        }
    }
}
