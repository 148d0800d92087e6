use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use reqwest::blocking::Response;
use reqwest::header::RANGE;

use super::{ChunkOutcome, ChunkSender, UploadStatus};
use crate::api::{check_status, ApiError, YouTubeClient};
use crate::config::{self, UploadConfig};
use crate::video::Video;

const RESUME_INCOMPLETE: u16 = 308;

/// `Content-Range` value for `len` bytes starting at `start`.
/// An empty body asks the server how much it has received.
pub fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}

/// Offset of the first byte the server does not hold yet, from a `Range`
/// header such as `bytes=0-524287`. No header means nothing was received.
pub fn next_offset(range: Option<&str>) -> Result<u64, ApiError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .map(|end| end + 1)
        .ok_or_else(|| ApiError::Malformed(format!("unparseable Range header: {range}")))
}

/// [`ChunkSender`] over a YouTube resumable upload session.
///
/// The session is opened lazily on the first call so that a failed
/// initiation is retried like any other chunk. After a failed call the next
/// one first asks the server for its offset, so acknowledged bytes are never
/// sent twice.
pub struct HttpChunkSender<'a> {
    client: &'a YouTubeClient,
    video: Video,
    file: File,
    total: u64,
    chunk_size: usize,
    mime_type: String,
    session_uri: Option<String>,
    offset: u64,
    needs_resync: bool,
    progress: ProgressBar,
}

impl<'a> HttpChunkSender<'a> {
    pub fn new(
        client: &'a YouTubeClient,
        video: Video,
        path: &Path,
        cfg: &UploadConfig,
    ) -> io::Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();

        let progress = ProgressBar::new(total);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("##-"),
        );

        Ok(Self {
            client,
            video,
            file,
            total,
            chunk_size: config::aligned_chunk_size(cfg.chunk_size),
            mime_type: cfg.mime_type.clone(),
            session_uri: None,
            offset: 0,
            needs_resync: false,
            progress,
        })
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn finish(&self) {
        self.progress.finish_and_clear();
    }

    fn session_uri(&mut self) -> Result<String, ApiError> {
        if let Some(uri) = &self.session_uri {
            return Ok(uri.clone());
        }
        let uri = self
            .client
            .start_resumable_session(&self.video, self.total, &self.mime_type)?;
        info!("resumable upload session opened");
        self.session_uri = Some(uri.clone());
        Ok(uri)
    }

    fn read_chunk(&mut self) -> io::Result<Vec<u8>> {
        let len = (self.total - self.offset).min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        self.file.seek(SeekFrom::Start(self.offset))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn interpret(&mut self, response: Response) -> Result<ChunkOutcome, ApiError> {
        let status = response.status();
        if status.as_u16() == RESUME_INCOMPLETE {
            let range = response.headers().get(RANGE).and_then(|v| v.to_str().ok());
            self.offset = next_offset(range)?.min(self.total);
            self.progress.set_position(self.offset);
            return Ok(ChunkOutcome::Pending(UploadStatus {
                bytes_sent: self.offset,
                total_bytes: self.total,
            }));
        }

        let response = check_status(response)?;
        self.offset = self.total;
        self.progress.set_position(self.total);
        Ok(ChunkOutcome::Complete(response.json()?))
    }

    fn send(&mut self) -> Result<ChunkOutcome, ApiError> {
        let uri = self.session_uri()?;

        if self.needs_resync {
            debug!("querying session for the committed offset");
            let range = content_range(0, 0, self.total);
            let response = self
                .client
                .put_to_session(&uri, &range, &self.mime_type, Vec::new())?;
            let outcome = self.interpret(response)?;
            self.needs_resync = false;
            if let ChunkOutcome::Complete(_) = outcome {
                return Ok(outcome);
            }
        }

        let start = self.offset;
        let bytes = self.read_chunk()?;
        let range = content_range(start, bytes.len() as u64, self.total);
        debug!("sending {range}");
        let response = self
            .client
            .put_to_session(&uri, &range, &self.mime_type, bytes)?;
        self.interpret(response)
    }
}

impl ChunkSender for HttpChunkSender<'_> {
    fn next_chunk(&mut self) -> Result<ChunkOutcome, ApiError> {
        let result = self.send();
        if result.is_err() && self.session_uri.is_some() {
            self.needs_resync = true;
        }
        result
    }
}
