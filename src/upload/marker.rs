use std::fs;
use std::io;
use std::path::Path;

/// Text of the success marker for `video_id`.
///
/// The id must stay the fifth space-separated word; the web front end reads
/// it back by position.
pub fn success_message(video_id: &str) -> String {
    format!("Video uploaded successfully. ID: {video_id}")
}

/// Write the success marker, creating its parent directory if needed.
pub fn write_success_marker(path: &Path, video_id: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, success_message(video_id))
}
