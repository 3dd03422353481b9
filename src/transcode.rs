//! Turning an arbitrary media file into a browser-streamable mp4.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{Config, EncoderConfig};
use crate::error::{EncoderError, Error, Result};
use crate::naming;
use crate::placement::{self, PlaceOptions};
use crate::probe::{self, ProbeParser, ProbeResult};
use crate::process::{CommandLine, ProcessRunner};
use crate::subtitles::SubtitlePipeline;

/// Why a file was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SkipReason {
    #[strum(to_string = "already carries the completion marker")]
    AlreadyEncoded,
    #[strum(to_string = "not a media file or does not exist")]
    NotMedia,
}

/// Outcome of [`Transcoder::make_streamable`] for a single file.
///
/// `Failed` is the encoder's problem with this one file and never stops a run; any
/// `Err` beside it is fatal for the directory being processed.
#[derive(Debug)]
pub enum Streamable {
    Encoded(PathBuf),
    Skipped(SkipReason),
    Failed(EncoderError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeReport {
    pub command: Option<CommandLine>,
    pub probe: ProbeResult,
    /// Subtitle files written beside the encoded output.
    pub subtitles: Vec<PathBuf>,
}

/// Picks the stream handling for `source` from what the probe found.
///
/// Streams that already play in a browser are copied and the rest re-encoded.
/// Surround audio is down-mixed to stereo whenever audio is re-encoded because of it.
pub fn build_encode_command(
    config: &EncoderConfig,
    source: &Path,
    dest: &Path,
    probe: &ProbeResult,
    source_size: u64,
) -> CommandLine {
    let mut cmd = CommandLine::new(&config.program);
    cmd.arg("-hide_banner").arg("-y").arg("-i").arg(source);

    let video = config.video_codec.as_str();
    let audio = config.audio_codec.as_str();
    let ProbeResult {
        video_ok,
        audio_ok,
        surround,
        ..
    } = *probe;

    match (video_ok, audio_ok) {
        (true, true) if !surround => {
            if source_size > config.large_file_threshold {
                cmd.args(["-c:v", video])
                    .arg("-crf")
                    .arg(config.large_file_crf.to_string())
                    .args(["-preset", config.large_file_preset.as_str()])
                    .args(["-c:a", "copy"]);
            } else {
                cmd.args(["-c", "copy"]);
            }
        }
        (true, _) => {
            cmd.args(["-c:v", "copy", "-c:a", audio]);
            if surround {
                cmd.args(["-ac", "2"]);
            }
        }
        (false, true) if !surround => {
            cmd.args(["-c:v", video, "-c:a", "copy"]);
        }
        (false, true) => {
            cmd.args(["-c:v", video, "-c:a", audio, "-ac", "2"]);
        }
        (false, false) => {
            cmd.args(["-c:v", video, "-c:a", audio]);
            if surround {
                cmd.args(["-ac", "2"]);
            }
        }
    }

    cmd.args(["-pix_fmt", "yuv420p", "-movflags", "faststart"])
        .arg(dest);
    cmd
}

pub struct Transcoder {
    encoder: EncoderConfig,
    media_extensions: Vec<String>,
    runner: Arc<dyn ProcessRunner>,
    parser: ProbeParser,
    subtitles: SubtitlePipeline,
}

impl Transcoder {
    pub fn new(config: &Config, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        Ok(Self {
            encoder: config.encoder.clone(),
            media_extensions: config.library.media_extensions.clone(),
            runner,
            parser: ProbeParser::new(&config.encoder)?,
            subtitles: SubtitlePipeline::new(config)?,
        })
    }

    pub fn completion_suffix(&self) -> &str {
        &self.encoder.completion_suffix
    }

    pub async fn probe(&self, source: &Path) -> std::result::Result<ProbeResult, EncoderError> {
        probe::probe(&*self.runner, &self.parser, &self.encoder.program, source).await
    }

    /// Probes `source`, prepares its subtitles and encodes it to `dest`.
    ///
    /// A failed encode leaves nothing behind at `dest`.
    #[tracing::instrument(skip_all, fields(path = %source.display()))]
    pub async fn encode(&self, source: &Path, dest: &Path, dry_run: bool) -> Result<EncodeReport> {
        info!("Probing {}", source.display());
        let probe = self.probe(source).await?;
        let subtitles = self
            .subtitles
            .attach(&*self.runner, source, dest, probe.subtitle, dry_run)
            .await?;

        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| Error::io(source, e))?
            .len();
        let command = build_encode_command(&self.encoder, source, dest, &probe, size);
        info!("Encoding with: {command}");

        if dry_run {
            info!("Skipping encode for dry-run");
            return Ok(EncodeReport {
                command: Some(command),
                probe,
                subtitles,
            });
        }

        let output = self.runner.run(&command).await;
        let failure = match output {
            Ok(output) if output.success() => None,
            Ok(output) => {
                error!("{}", output.stderr);
                Some(EncoderError::new("Encoding failed"))
            }
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            for partial in std::iter::once(dest).chain(subtitles.iter().map(PathBuf::as_path)) {
                if let Err(err) = tokio::fs::remove_file(partial).await {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %partial.display(), "could not clean up: {err}");
                    }
                }
            }
            return Err(e.into());
        }

        Ok(EncodeReport {
            command: Some(command),
            probe,
            subtitles,
        })
    }

    /// Replaces `path` with a streamable encode of itself.
    ///
    /// Files already carrying the completion marker are recognized before anything
    /// else happens, so nothing is encoded twice.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn make_streamable(&self, path: &Path, options: PlaceOptions) -> Result<Streamable> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains(self.encoder.completion_suffix.as_str()) {
            info!("File has already been encoded. Skipping...");
            return Ok(Streamable::Skipped(SkipReason::AlreadyEncoded));
        }
        if !naming::is_media(path, &self.media_extensions) || !path.is_file() {
            warn!("File is not a media file or does not exist. Skipping...");
            return Ok(Streamable::Skipped(SkipReason::NotMedia));
        }

        let source = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| Error::io(path, e))?;
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self.encoder.scratch_dir.join(format!("{stem}.mp4"));

        let report = match self.encode(&source, &temp, options.dry_run).await {
            Ok(report) => report,
            Err(Error::Encoder(e)) => return Ok(Streamable::Failed(e)),
            Err(e) => return Err(e),
        };

        let target = placement::place(&temp, &source, &self.encoder.completion_suffix, options).await?;
        if !options.dry_run {
            placement::place_subtitles(&report.subtitles, &temp, &target).await?;
        }
        Ok(Streamable::Encoded(target))
    }
}
