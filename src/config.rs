//! Run configuration, read once from a TOML file and handed to every component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use educe::Educe;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::MediaKind;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub library: LibraryConfig,
    pub encoder: EncoderConfig,
    pub subtitles: SubtitleConfig,
    pub catalog: CatalogConfig,
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LibraryConfig {
    /// Prefix joined onto remote paths that were stored relative.
    pub base_path: PathBuf,
    pub tv_roots: Vec<PathBuf>,
    pub movie_roots: Vec<PathBuf>,
    /// Inboxes of freshly downloaded episodes waiting to be filed under a show.
    pub unsorted_roots: Vec<PathBuf>,
    /// Files at or below this size never enter the local inventory.
    #[serde(deserialize_with = "de::byte_size")]
    pub minimum_file_size: u64,
    pub media_extensions: Vec<String>,
    pub subtitle_extensions: Vec<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/"),
            tv_roots: Vec::new(),
            movie_roots: Vec::new(),
            unsorted_roots: Vec::new(),
            minimum_file_size: 20_000_000,
            media_extensions: [".mp4", ".avi", ".mpeg", ".mkv", ".m4v", ".mpg"]
                .map(String::from)
                .to_vec(),
            subtitle_extensions: vec![".srt".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncoderConfig {
    pub program: PathBuf,
    pub subtitle_converter: PathBuf,
    /// Encoder library used when video has to be re-encoded.
    pub video_codec: String,
    /// Encoder library used when audio has to be re-encoded.
    pub audio_codec: String,
    /// Codec names, as the encoder banner prints them, that play in a browser as-is.
    pub streamable_video_codecs: Vec<String>,
    pub streamable_audio_codecs: Vec<String>,
    #[serde(deserialize_with = "de::byte_size")]
    pub large_file_threshold: u64,
    pub large_file_crf: u8,
    pub large_file_preset: String,
    pub completion_suffix: String,
    pub scratch_dir: PathBuf,
    #[serde(deserialize_with = "de::duration")]
    pub timeout: Duration,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: ffmpeg_sidecar::paths::ffmpeg_path(),
            subtitle_converter: PathBuf::from("srt-vtt"),
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            streamable_video_codecs: vec!["h264".to_string()],
            streamable_audio_codecs: vec!["aac".to_string(), "mp3".to_string()],
            large_file_threshold: 1_250_000_000,
            large_file_crf: 30,
            large_file_preset: "slow".to_string(),
            completion_suffix: "mv-encoded.mp4".to_string(),
            scratch_dir: std::env::temp_dir(),
            timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubtitleConfig {
    /// Matched against sidecar file names to find English tracks.
    pub english_pattern: String,
    /// Names promoted from a movie's sub-directories up to the movie root.
    pub promote_names: Vec<String>,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            english_pattern: "(?i)eng".to_string(),
            promote_names: ["2_Eng.srt", "English.srt", "2_English.srt"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Clone, Deserialize, Educe)]
#[educe(Debug)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub base_url: String,
    pub username: String,
    #[educe(Debug(ignore))]
    pub password: String,
    pub verify_tls: bool,
    pub server_name: String,
    #[serde(deserialize_with = "de::duration")]
    pub request_cooldown: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:8001/mediaviewer/api/".to_string(),
            username: String::new(),
            password: String::new(),
            verify_tls: true,
            server_name: "127.0.0.1".to_string(),
            request_cooldown: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Deserialize, Educe)]
#[educe(Debug)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub username: String,
    #[educe(Debug(ignore))]
    pub password: String,
    pub recipients: Vec<String>,
    pub subject: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: "smtp.gmail.com".to_string(),
            username: String::new(),
            password: String::new(),
            recipients: Vec::new(),
            subject: "mediasync: got some errors".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("parse config file '{}'", path.display()))?;
        info!("Using configuration from '{}'", path.display());
        Ok(config)
    }

    pub fn roots(&self, kind: MediaKind) -> &[PathBuf] {
        match kind {
            MediaKind::Tv => &self.library.tv_roots,
            MediaKind::Movie => &self.library.movie_roots,
        }
    }

    pub fn validate(&self) -> Result<()> {
        Regex::new(&self.subtitles.english_pattern).map_err(|e| {
            Error::Config(format!("subtitles.english_pattern is not a valid regex: {e}"))
        })?;
        reqwest::Url::parse(&self.catalog.base_url)
            .map_err(|e| Error::Config(format!("catalog.base_url: {e}")))?;
        if self.encoder.completion_suffix.is_empty() {
            return Err(Error::Config(
                "encoder.completion_suffix cannot be empty".to_string(),
            ));
        }
        if self.email.enabled && self.email.recipients.is_empty() {
            return Err(Error::Config(
                "email is enabled but has no recipients".to_string(),
            ));
        }
        for root in self
            .library
            .tv_roots
            .iter()
            .chain(&self.library.movie_roots)
            .chain(&self.library.unsorted_roots)
        {
            if !root.exists() {
                warn!(path = %root.display(), "configured library root does not exist");
            }
        }
        Ok(())
    }
}

mod de {
    use std::time::Duration;

    use bytesize::ByteSize;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Bytes(u64),
        Human(String),
    }

    pub fn byte_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Size::deserialize(deserializer)? {
            Size::Bytes(bytes) => Ok(bytes),
            Size::Human(text) => text
                .parse::<ByteSize>()
                .map(|size| size.as_u64())
                .map_err(D::Error::custom),
        }
    }

    pub fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}
