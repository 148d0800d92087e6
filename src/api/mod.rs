use std::io;

use log::debug;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::video::Video;

/// Every way a call to the remote API can fail.
///
/// Transport faults are always transient. Whether an HTTP status is worth
/// retrying is decided by the caller's [`RetryPolicy`](crate::config::RetryPolicy).
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("redirect ({0}) without a Location header")]
    RedirectMissingLocation(u16),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("invalid request: {0}")]
    Request(String),
}

impl ApiError {
    /// `true` for transport-level faults that say nothing about the request
    /// itself and may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::Connect(_)
                | ApiError::Timeout(_)
                | ApiError::Transport(_)
                | ApiError::RedirectMissingLocation(_)
                | ApiError::Io(_)
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_connect() {
            ApiError::Connect(e.to_string())
        } else if e.is_decode() {
            ApiError::Malformed(e.to_string())
        } else if e.is_builder() {
            ApiError::Request(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// Turn a non-success response into an [`ApiError`].
pub(crate) fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_redirection() && !response.headers().contains_key(LOCATION) {
        return Err(ApiError::RedirectMissingLocation(status.as_u16()));
    }
    let body = response.text().unwrap_or_else(|e| {
        debug!("could not read the body of a {status} response: {e}");
        format!("<unreadable body: {e}>")
    });
    Err(ApiError::Http {
        status: status.as_u16(),
        body,
    })
}

/// The remote operations the update tools need.
///
/// Implemented by [`YouTubeClient`]; tests substitute an in-memory fake.
pub trait VideoApi {
    /// Fetch the given parts of one video. `Ok(None)` when no video has that id.
    fn find_video(&self, video_id: &str, part: &str) -> Result<Option<Video>, ApiError>;

    /// Submit `video` through `videos.update`, sending the parts it carries.
    fn update_video(&self, video: &Video) -> Result<Video, ApiError>;
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<Video>,
}

/// Blocking client for the YouTube Data API v3, authorised with a bearer token.
pub struct YouTubeClient {
    http: Client,
    access_token: String,
    cfg: ClientConfig,
}

impl YouTubeClient {
    pub fn new(access_token: impl Into<String>, cfg: ClientConfig) -> Result<Self, ApiError> {
        // 308 is the resumable protocol's "keep going" reply, never a redirect.
        let http = Client::builder()
            .redirect(Policy::none())
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.into(),
            cfg,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    /// Open a resumable upload session for `video` and return its session URI.
    pub fn start_resumable_session(
        &self,
        video: &Video,
        content_length: u64,
        mime_type: &str,
    ) -> Result<String, ApiError> {
        let url = format!("{}/videos", self.cfg.upload_base);
        let parts = video.parts();
        debug!("initiating resumable session at {url} (part={parts})");

        let response = self
            .authorized(self.http.post(&url))
            .query(&[("uploadType", "resumable"), ("part", parts.as_str())])
            .header("X-Upload-Content-Length", content_length.to_string())
            .header("X-Upload-Content-Type", mime_type)
            .json(video)
            .send()?;
        let response = check_status(response)?;

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ApiError::Malformed("no Location header in upload-initiation response".into())
            })
    }

    /// PUT one piece of the upload (or an empty status query) to a session.
    ///
    /// The raw response is returned because `308` is a normal outcome here.
    pub(crate) fn put_to_session(
        &self,
        session_uri: &str,
        content_range: &str,
        mime_type: &str,
        bytes: Vec<u8>,
    ) -> Result<Response, ApiError> {
        let response = self
            .authorized(self.http.put(session_uri))
            .header(CONTENT_RANGE, content_range)
            .header(CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()?;
        Ok(response)
    }
}

impl VideoApi for YouTubeClient {
    fn find_video(&self, video_id: &str, part: &str) -> Result<Option<Video>, ApiError> {
        let url = format!("{}/videos", self.cfg.api_base);
        let response = self
            .authorized(self.http.get(&url))
            .query(&[("part", part), ("id", video_id)])
            .send()?;
        let list: VideoListResponse = check_status(response)?.json()?;
        Ok(list.items.into_iter().next())
    }

    fn update_video(&self, video: &Video) -> Result<Video, ApiError> {
        let url = format!("{}/videos", self.cfg.api_base);
        let parts = video.parts();
        let response = self
            .authorized(self.http.put(&url))
            .query(&[("part", parts.as_str())])
            .json(video)
            .send()?;
        Ok(check_status(response)?.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    /// Serve a single raw HTTP response and return a client pointed at it.
    fn one_shot(raw: &'static str) -> (YouTubeClient, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            stream.write_all(raw.as_bytes()).unwrap();
        });
        let client = YouTubeClient::new(
            "token",
            ClientConfig {
                api_base: format!("http://{addr}"),
                ..Default::default()
            },
        )
        .unwrap();
        (client, server)
    }

    #[test]
    fn test_error_body_is_kept() {
        let (client, server) = one_shot(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope",
        );
        let err = client.find_video("abc", "status").unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, ApiError::Http { status: 404, ref body } if body == "nope"));
    }

    #[test]
    fn test_truncated_error_body_is_reported() {
        let (client, server) = one_shot(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial",
        );
        let err = client.find_video("abc", "status").unwrap_err();
        server.join().unwrap();
        match err {
            ApiError::Http { status, body } => {
                assert_eq!(status, 500);
                assert!(body.starts_with("<unreadable body"), "{body}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transport_faults_are_transient() {
        assert!(ApiError::Connect("refused".into()).is_transient());
        assert!(ApiError::Timeout("slow".into()).is_transient());
        assert!(ApiError::Transport("reset".into()).is_transient());
        assert!(ApiError::RedirectMissingLocation(302).is_transient());
        assert!(ApiError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).is_transient());
    }

    #[test]
    fn test_http_and_payload_errors_are_not_transient() {
        let http = ApiError::Http {
            status: 503,
            body: String::new(),
        };
        assert!(!http.is_transient());
        assert_eq!(http.status(), Some(503));
        assert!(!ApiError::Malformed("bad json".into()).is_transient());
        assert!(!ApiError::Request("bad url".into()).is_transient());
        assert_eq!(ApiError::Connect("x".into()).status(), None);
    }

    #[test]
    fn test_list_response_tolerates_missing_items() {
        let list: VideoListResponse = serde_json::from_str(r#"{"kind":"youtube#videoListResponse"}"#).unwrap();
        assert!(list.items.is_empty());
    }
}
