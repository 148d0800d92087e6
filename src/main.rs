use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};

use tubeup::config::{
    CLIENT_SECRETS_FILE, DEFAULT_CATEGORY, DEFAULT_CHUNK_SIZE, DEFAULT_DESCRIPTION,
    DEFAULT_TITLE, MAX_RETRIES, OAUTH_CALLBACK_PORT, SUCCESS_MARKER_PATH, SUCCESS_PAGE_URL,
    UPLOAD_SCOPES,
};
use tubeup::upload::check_upload_file;
use tubeup::video::parse_keywords;
use tubeup::{
    auth, update_privacy, upload_video, AuthConfig, ClientConfig, PrivacyStatus, RetryPolicy,
    UpdateError, UploadConfig, UploadRequest, YouTubeClient,
};

/// Upload a video to YouTube, or change the privacy status of an existing one.
#[derive(Parser)]
#[command(name = "upload-video", version, about)]
struct Cli {
    /// Video file to upload
    #[arg(long, required_unless_present = "update_privacy")]
    file: Option<PathBuf>,

    /// Video title
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,

    /// Video description
    #[arg(long, default_value = DEFAULT_DESCRIPTION)]
    description: String,

    /// Numeric video category
    #[arg(long, default_value = DEFAULT_CATEGORY)]
    category: String,

    /// Video keywords, comma separated
    #[arg(long, default_value = "")]
    keywords: String,

    /// Video privacy status
    #[arg(long = "privacyStatus", value_enum, default_value_t = PrivacyStatus::Unlisted)]
    privacy_status: PrivacyStatus,

    /// Update the privacy status of an existing video instead of uploading
    #[arg(long = "update_privacy", requires = "video_id")]
    update_privacy: bool,

    /// ID of the video whose privacy status to update
    #[arg(long = "video_id")]
    video_id: Option<String>,

    /// OAuth client secrets file
    #[arg(long, default_value = CLIENT_SECRETS_FILE)]
    client_secrets: PathBuf,

    /// Cache OAuth tokens in this file and reuse them on later runs
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Local port for the OAuth redirect
    #[arg(long, default_value_t = OAUTH_CALLBACK_PORT)]
    port: u16,

    /// Bytes per upload request (rounded down to a multiple of 256 KiB)
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Give up after this many consecutive retriable failures
    #[arg(long, default_value_t = MAX_RETRIES)]
    max_retries: u32,

    /// Where to record the uploaded video id
    #[arg(long, default_value = SUCCESS_MARKER_PATH)]
    success_file: PathBuf,

    /// Page opened in the browser after a successful upload
    #[arg(long, default_value = SUCCESS_PAGE_URL)]
    success_url: String,

    /// Never launch a browser; print URLs instead
    #[arg(long)]
    no_browser: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let auth_cfg = AuthConfig {
        client_secrets: cli.client_secrets.clone(),
        token_cache: cli.token_file.clone(),
        callback_port: cli.port,
        open_browser: !cli.no_browser,
    };

    // Validate the upload input before asking the user to authenticate.
    let request = match (&cli.video_id, &cli.file) {
        (Some(_), _) if cli.update_privacy => None,
        (_, Some(file)) => {
            check_upload_file(file)?;
            Some(UploadRequest {
                file: file.clone(),
                title: cli.title.clone(),
                description: cli.description.clone(),
                tags: parse_keywords(&cli.keywords),
                category_id: cli.category.clone(),
                privacy_status: cli.privacy_status,
            })
        }
        (_, None) => anyhow::bail!("Please specify a valid file using the --file= parameter."),
    };

    let token = auth::authenticate(&auth_cfg, &UPLOAD_SCOPES).context("authentication failed")?;
    let client = YouTubeClient::new(token.access_token, ClientConfig::default())?;

    let Some(request) = request else {
        let video_id = cli.video_id.as_deref().unwrap_or_default();
        return match update_privacy(&client, video_id, cli.privacy_status) {
            Ok(_) => Ok(()),
            Err(UpdateError::Api(e)) => {
                error!("An HTTP error occurred: {e}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        };
    };

    let upload_cfg = UploadConfig {
        chunk_size: cli.chunk_size,
        retry: RetryPolicy {
            max_retries: cli.max_retries,
            ..RetryPolicy::default()
        },
        success_marker: Some(cli.success_file.clone()),
        ..UploadConfig::default()
    };

    let receipt = upload_video(&client, &request, &upload_cfg)?;
    debug!("upload finished after {} retries", receipt.retries);

    if !cli.no_browser {
        info!("Redirecting to success page...");
        if let Err(e) = open::that(&cli.success_url) {
            warn!("could not open {}: {e}", cli.success_url);
        }
    }

    Ok(())
}
