pub mod marker;
pub mod session;

use std::io;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use rand::rngs::ThreadRng;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;

use crate::api::{ApiError, YouTubeClient};
use crate::config::{RetryPolicy, UploadConfig};
use crate::video::UploadRequest;
use session::HttpChunkSender;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Please specify a valid file using the --file= parameter ({} not found)", .0.display())]
    MissingFile(PathBuf),
    #[error("{} is empty; there is nothing to upload", .0.display())]
    EmptyFile(PathBuf),
    #[error("cannot access {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("upload failed: {0}")]
    Api(#[from] ApiError),
    #[error("No longer attempting to retry (gave up after {retries} retries, last error: {last_error})")]
    RetriesExhausted { retries: u32, last_error: String },
    #[error("The upload failed with an unexpected response: {0}")]
    UnexpectedResponse(Value),
}

/// How far a multi-chunk upload has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStatus {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadStatus {
    /// Fraction of the file acknowledged by the server, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_sent as f64 / self.total_bytes as f64
        }
    }
}

/// What one call to [`ChunkSender::next_chunk`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// The chunk was accepted and more remain.
    Pending(UploadStatus),
    /// The upload finished; carries the server's final response body.
    Complete(Value),
}

/// Sends the next piece of a chunked upload.
///
/// Implementations track their own offset, so calling `next_chunk` again
/// after a failure must not re-send bytes the server already holds.
pub trait ChunkSender {
    fn next_chunk(&mut self) -> Result<ChunkOutcome, ApiError>;
}

impl<F> ChunkSender for F
where
    F: FnMut() -> Result<ChunkOutcome, ApiError>,
{
    fn next_chunk(&mut self) -> Result<ChunkOutcome, ApiError> {
        self()
    }
}

/// Blocks between retry attempts.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

impl<T: Sleeper + ?Sized> Sleeper for &T {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Sleeps the current thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Backoff before retry number `retry`: uniform in `[0, 2^retry)` seconds.
///
/// The bound saturates at `u64::MAX` nanoseconds for very large retry counts.
pub fn backoff_delay<R: Rng + ?Sized>(retry: u32, rng: &mut R) -> Duration {
    let max_nanos = 1u64
        .checked_shl(retry)
        .and_then(|secs| secs.checked_mul(NANOS_PER_SEC))
        .unwrap_or(u64::MAX);
    // Scale a full-width draw into [0, max_nanos); the high half of the
    // product is always below max_nanos.
    let nanos = (u128::from(rng.gen::<u64>()) * u128::from(max_nanos)) >> 64;
    Duration::from_nanos(nanos as u64)
}

/// A completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub video_id: String,
    /// Number of retriable failures absorbed along the way.
    pub retries: u32,
}

#[derive(Debug, Default)]
struct UploadProgress {
    last_error: Option<String>,
    retry: u32,
}

/// Drives a [`ChunkSender`] to completion, retrying transient failures with
/// randomised exponential backoff until the policy's budget runs out.
pub struct ResumableUploader<S, R> {
    policy: RetryPolicy,
    sleeper: S,
    rng: R,
    success_marker: Option<PathBuf>,
}

impl ResumableUploader<ThreadSleeper, ThreadRng> {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sources(policy, ThreadSleeper, rand::thread_rng())
    }
}

impl<S: Sleeper, R: Rng> ResumableUploader<S, R> {
    /// Build an uploader with an explicit sleeper and random source.
    pub fn with_sources(policy: RetryPolicy, sleeper: S, rng: R) -> Self {
        Self {
            policy,
            sleeper,
            rng,
            success_marker: None,
        }
    }

    /// Write a success marker to `path` once the upload completes.
    pub fn with_success_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.success_marker = Some(path.into());
        self
    }

    pub fn run<C: ChunkSender + ?Sized>(&mut self, sender: &mut C) -> Result<UploadReceipt, UploadError> {
        let mut progress = UploadProgress::default();

        let response = loop {
            info!("Uploading file...");
            let failure = match sender.next_chunk() {
                Ok(ChunkOutcome::Complete(response)) => break response,
                Ok(ChunkOutcome::Pending(status)) => {
                    debug!(
                        "{}/{} bytes acknowledged ({:.1}%)",
                        status.bytes_sent,
                        status.total_bytes,
                        status.progress() * 100.0
                    );
                    continue;
                }
                Err(ApiError::Http { status, body }) if self.policy.is_retriable_status(status) => {
                    format!("A retriable HTTP error {status} occurred:\n{body}")
                }
                Err(e) if e.is_transient() => format!("A retriable error occurred: {e}"),
                Err(e) => return Err(e.into()),
            };

            warn!("{failure}");
            progress.retry += 1;
            progress.last_error = Some(failure);
            if progress.retry > self.policy.max_retries {
                error!("No longer attempting to retry.");
                return Err(UploadError::RetriesExhausted {
                    retries: self.policy.max_retries,
                    last_error: progress.last_error.take().unwrap_or_default(),
                });
            }

            let delay = backoff_delay(progress.retry, &mut self.rng);
            info!("Sleeping {:.6} seconds and then retrying...", delay.as_secs_f64());
            self.sleeper.sleep(delay);
        };

        self.finish(response, progress.retry)
    }

    fn finish(&self, response: Value, retries: u32) -> Result<UploadReceipt, UploadError> {
        let video_id = match response.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                error!("upload finished without a video id: {response}");
                return Err(UploadError::UnexpectedResponse(response));
            }
        };
        info!("Video id '{video_id}' was successfully uploaded.");

        if let Some(path) = &self.success_marker {
            marker::write_success_marker(path, &video_id).map_err(|source| UploadError::Io {
                path: path.clone(),
                source,
            })?;
            debug!("success marker written to {}", path.display());
        }

        Ok(UploadReceipt { video_id, retries })
    }
}

/// Upload `request.file` over a resumable session, retrying per `cfg.retry`.
/// Check that `path` names a non-empty regular file and return its size.
pub fn check_upload_file(path: &Path) -> Result<u64, UploadError> {
    if !path.is_file() {
        return Err(UploadError::MissingFile(path.to_path_buf()));
    }
    let len = fs::metadata(path)
        .map_err(|source| UploadError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .len();
    if len == 0 {
        return Err(UploadError::EmptyFile(path.to_path_buf()));
    }
    Ok(len)
}

pub fn upload_video(
    client: &YouTubeClient,
    request: &UploadRequest,
    cfg: &UploadConfig,
) -> Result<UploadReceipt, UploadError> {
    check_upload_file(&request.file)?;

    let mut sender = HttpChunkSender::new(client, request.to_video(), &request.file, cfg)
        .map_err(|source| UploadError::Io {
            path: request.file.clone(),
            source,
        })?;
    info!(
        "uploading {} ({} bytes) as {}",
        request.file.display(),
        sender.total_bytes(),
        request.privacy_status
    );

    let mut uploader = ResumableUploader::new(cfg.retry.clone());
    if let Some(path) = &cfg.success_marker {
        uploader = uploader.with_success_marker(path);
    }

    let result = uploader.run(&mut sender);
    sender.finish();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSleeper {
        delays: RefCell<Vec<Duration>>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.delays.borrow_mut().push(duration);
        }
    }

    fn http(status: u16) -> ApiError {
        ApiError::Http {
            status,
            body: format!("status {status}"),
        }
    }

    fn uploader(sleeper: &RecordingSleeper) -> ResumableUploader<&RecordingSleeper, StepRng> {
        ResumableUploader::with_sources(RetryPolicy::default(), sleeper, StepRng::new(u64::MAX / 2, 0))
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tubeup_test_{name}"));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    #[test]
    fn test_three_server_errors_then_success() {
        let dir = temp_dir("three_errors");
        let marker_path = dir.join("uploads").join("success.txt");
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper).with_success_marker(&marker_path);

        let mut calls = 0;
        let mut sender = || {
            calls += 1;
            if calls <= 3 {
                Err(http(500))
            } else {
                Ok(ChunkOutcome::Complete(json!({"id": "abc123"})))
            }
        };

        let receipt = uploader.run(&mut sender).unwrap();
        assert_eq!(receipt.video_id, "abc123");
        assert_eq!(receipt.retries, 3);
        assert_eq!(calls, 4);
        assert_eq!(sleeper.delays.borrow().len(), 3);

        let marker = std::fs::read_to_string(&marker_path).unwrap();
        assert_eq!(marker, "Video uploaded successfully. ID: abc123");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_always_unavailable_exhausts_budget() {
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper);

        let mut calls = 0;
        let mut sender = || -> Result<ChunkOutcome, ApiError> {
            calls += 1;
            Err(http(503))
        };

        let err = uploader.run(&mut sender).unwrap_err();
        assert!(matches!(err, UploadError::RetriesExhausted { retries: 10, .. }));
        assert!(err.to_string().starts_with("No longer attempting to retry"));
        assert_eq!(calls, 11);
        assert_eq!(sleeper.delays.borrow().len(), 10);
    }

    #[test]
    fn test_each_retriable_status_is_retried() {
        for status in [500, 502, 503, 504] {
            let sleeper = RecordingSleeper::default();
            let mut uploader = uploader(&sleeper);
            let mut failed = false;
            let mut sender = || {
                if failed {
                    Ok(ChunkOutcome::Complete(json!({"id": "v"})))
                } else {
                    failed = true;
                    Err(http(status))
                }
            };

            let receipt = uploader.run(&mut sender).unwrap();
            assert_eq!(receipt.retries, 1, "status {status}");
            assert_eq!(sleeper.delays.borrow().len(), 1, "status {status}");
        }
    }

    #[test]
    fn test_other_statuses_abort_without_sleeping() {
        for status in [400, 401, 403, 404, 409, 501] {
            let sleeper = RecordingSleeper::default();
            let mut uploader = uploader(&sleeper);
            let mut calls = 0;
            let mut sender = || -> Result<ChunkOutcome, ApiError> {
                calls += 1;
                Err(http(status))
            };

            let err = uploader.run(&mut sender).unwrap_err();
            match err {
                UploadError::Api(e) => assert_eq!(e.status(), Some(status)),
                other => panic!("unexpected error for {status}: {other}"),
            }
            assert_eq!(calls, 1);
            assert!(sleeper.delays.borrow().is_empty());
        }
    }

    #[test]
    fn test_transport_faults_are_retried() {
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper);
        let mut script = vec![
            Err(ApiError::Connect("server not found".into())),
            Err(ApiError::RedirectMissingLocation(302)),
            Err(ApiError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))),
            Ok(ChunkOutcome::Complete(json!({"id": "t1"}))),
        ]
        .into_iter();
        let mut sender = || script.next().unwrap();

        let receipt = uploader.run(&mut sender).unwrap();
        assert_eq!(receipt.video_id, "t1");
        assert_eq!(receipt.retries, 3);
    }

    #[test]
    fn test_malformed_response_error_aborts() {
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper);
        let mut sender = || -> Result<ChunkOutcome, ApiError> { Err(ApiError::Malformed("not json".into())) };

        assert!(matches!(
            uploader.run(&mut sender),
            Err(UploadError::Api(ApiError::Malformed(_)))
        ));
        assert!(sleeper.delays.borrow().is_empty());
    }

    #[test]
    fn test_final_response_without_id_is_fatal() {
        let dir = temp_dir("no_id");
        let marker_path = dir.join("success.txt");
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper).with_success_marker(&marker_path);
        let mut sender = || Ok(ChunkOutcome::Complete(json!({"kind": "youtube#video"})));

        let err = uploader.run(&mut sender).unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedResponse(_)));
        assert!(!marker_path.exists());
    }

    #[test]
    fn test_pending_chunks_do_not_consume_retries() {
        let sleeper = RecordingSleeper::default();
        let mut uploader = uploader(&sleeper);
        let mut sent = 0u64;
        let mut sender = || {
            sent += 1;
            if sent < 4 {
                Ok(ChunkOutcome::Pending(UploadStatus {
                    bytes_sent: sent * 10,
                    total_bytes: 40,
                }))
            } else {
                Ok(ChunkOutcome::Complete(json!({"id": "multi"})))
            }
        };

        let receipt = uploader.run(&mut sender).unwrap();
        assert_eq!(receipt.retries, 0);
        assert!(sleeper.delays.borrow().is_empty());
    }

    #[test]
    fn test_custom_retry_budget() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_retries: 2,
            retriable_statuses: vec![429],
        };
        let mut uploader = ResumableUploader::with_sources(policy, &sleeper, StepRng::new(0, 0));
        let mut calls = 0;
        let mut sender = || -> Result<ChunkOutcome, ApiError> {
            calls += 1;
            Err(http(429))
        };

        assert!(matches!(
            uploader.run(&mut sender),
            Err(UploadError::RetriesExhausted { retries: 2, .. })
        ));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_backoff_stays_below_exponential_bound() {
        let sleeper = RecordingSleeper::default();
        let mut uploader =
            ResumableUploader::with_sources(RetryPolicy::default(), &sleeper, StepRng::new(u64::MAX, 0));
        let mut sender = || -> Result<ChunkOutcome, ApiError> { Err(http(502)) };
        uploader.run(&mut sender).unwrap_err();

        let delays = sleeper.delays.borrow();
        assert_eq!(delays.len(), 10);
        for (i, delay) in delays.iter().enumerate() {
            let bound = Duration::from_secs(1 << (i + 1));
            assert!(*delay < bound, "retry {}: {:?}", i + 1, delay);
            assert_eq!(bound - *delay, Duration::from_nanos(1), "retry {}", i + 1);
        }
    }

    #[test]
    fn test_backoff_with_zero_draw() {
        let mut rng = StepRng::new(0, 0);
        for retry in 1..=10 {
            assert_eq!(backoff_delay(retry, &mut rng), Duration::ZERO);
        }
    }

    #[test]
    fn test_backoff_random_draws_in_range() {
        let mut rng = rand::thread_rng();
        for retry in 1..=10 {
            for _ in 0..100 {
                let delay = backoff_delay(retry, &mut rng);
                assert!(delay < Duration::from_secs(1 << retry));
            }
        }
    }

    #[test]
    fn test_backoff_with_huge_retry_counts() {
        let mut top = StepRng::new(u64::MAX, 0);
        let mut zero = StepRng::new(0, 0);
        let ceiling = Duration::from_nanos(u64::MAX);
        assert!(backoff_delay(34, &mut top) < Duration::from_secs(1 << 34));
        for retry in [35, 63, 64, 65, 1024, u32::MAX] {
            let delay = backoff_delay(retry, &mut top);
            assert_eq!(ceiling - delay, Duration::from_nanos(1), "retry {retry}");
            assert_eq!(backoff_delay(retry, &mut zero), Duration::ZERO);
        }
    }

    #[test]
    fn test_huge_retry_budget_does_not_panic() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_retries: 70,
            ..RetryPolicy::default()
        };
        let mut uploader = ResumableUploader::with_sources(policy, &sleeper, StepRng::new(u64::MAX, 0));
        let mut sender = || -> Result<ChunkOutcome, ApiError> { Err(http(503)) };
        assert!(matches!(
            uploader.run(&mut sender),
            Err(UploadError::RetriesExhausted { retries: 70, .. })
        ));
        assert_eq!(sleeper.delays.borrow().len(), 70);
    }

    #[test]
    fn test_upload_file_checks() {
        let dir = std::env::temp_dir().join("tubeup_test_upload_file_checks");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();

        let missing = dir.join("missing.mp4");
        assert!(matches!(check_upload_file(&missing), Err(UploadError::MissingFile(_))));
        assert!(matches!(check_upload_file(&dir), Err(UploadError::MissingFile(_))));

        let empty = dir.join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(check_upload_file(&empty), Err(UploadError::EmptyFile(_))));

        let video = dir.join("video.mp4");
        std::fs::write(&video, [7u8; 1000]).unwrap();
        assert_eq!(check_upload_file(&video).unwrap(), 1000);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_file_is_rejected_before_any_request() {
        let dir = std::env::temp_dir().join("tubeup_test_empty_upload");
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        let empty = dir.join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();

        // Nothing listens on this base; any request would fail with Connect.
        let client = YouTubeClient::new(
            "token",
            crate::config::ClientConfig {
                upload_base: "http://127.0.0.1:9".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let request = UploadRequest::new(empty.clone());
        let err = upload_video(&client, &request, &UploadConfig::default()).unwrap_err();
        assert!(matches!(err, UploadError::EmptyFile(ref path) if *path == empty));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_status_progress() {
        let half = UploadStatus {
            bytes_sent: 50,
            total_bytes: 100,
        };
        assert!((half.progress() - 0.5).abs() < f64::EPSILON);
        let empty = UploadStatus {
            bytes_sent: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.progress(), 1.0);
    }
}
