use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use tubeup::config::{CLIENT_SECRETS_FILE, OAUTH_CALLBACK_PORT, UPDATE_SCOPES};
use tubeup::video::parse_keywords;
use tubeup::{
    auth, update_metadata, AuthConfig, ClientConfig, MetadataUpdate, PrivacyStatus, UpdateError,
    YouTubeClient,
};

/// Update the title, description, keywords and privacy status of a YouTube video.
#[derive(Parser)]
#[command(name = "update-video", version, about)]
struct Cli {
    /// ID of the video to update
    #[arg(long = "videoId")]
    video_id: String,

    /// Title of the video
    #[arg(long)]
    title: String,

    /// Description of the video
    #[arg(long)]
    description: String,

    /// Comma separated list of keywords
    #[arg(long)]
    keywords: Option<String>,

    /// Privacy status of the video
    #[arg(long = "privacyStatus", value_enum)]
    privacy_status: PrivacyStatus,

    /// OAuth client secrets file
    #[arg(long, default_value = CLIENT_SECRETS_FILE)]
    client_secrets: PathBuf,

    /// Cache OAuth tokens in this file and reuse them on later runs
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Local port for the OAuth redirect
    #[arg(long, default_value_t = OAUTH_CALLBACK_PORT)]
    port: u16,

    /// Never launch a browser; print the consent URL instead
    #[arg(long)]
    no_browser: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let auth_cfg = AuthConfig {
        client_secrets: cli.client_secrets,
        token_cache: cli.token_file,
        callback_port: cli.port,
        open_browser: !cli.no_browser,
    };
    let token = auth::authenticate(&auth_cfg, &UPDATE_SCOPES).context("authentication failed")?;
    let client = YouTubeClient::new(token.access_token, ClientConfig::default())?;

    let update = MetadataUpdate {
        video_id: cli.video_id,
        title: cli.title,
        description: cli.description,
        tags: cli.keywords.as_deref().map(parse_keywords).unwrap_or_default(),
        privacy_status: cli.privacy_status,
    };

    match update_metadata(&client, &update) {
        Ok(_) => Ok(()),
        Err(UpdateError::Api(e)) => {
            error!("An HTTP error occurred: {e}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
