//! Stream inspection by scraping the encoder's diagnostic banner.
//!
//! Running the encoder with an input and no output prints a description of every
//! stream and then complains that no output was given. That complaint is how a
//! successful inspection is recognized; the stream lines are matched one field at a
//! time by [`ProbeParser`].

use std::fmt;
use std::path::Path;

use regex::Regex;
use tracing::{debug, error};

use crate::config::EncoderConfig;
use crate::error::{EncoderError, Error, Result};
use crate::process::{CommandLine, ProcessRunner};

/// Second-to-last diagnostic line of a successful inspection.
pub const NO_OUTPUT_MESSAGE: &str = "At least one output file must be specified";

/// An embedded stream address as the encoder's `-map` option expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId {
    pub input: u32,
    pub stream: u32,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.input, self.stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub video_ok: bool,
    pub audio_ok: bool,
    pub subtitle: Option<StreamId>,
    pub surround: bool,
}

#[derive(Debug, Clone)]
pub struct ProbeParser {
    video: Regex,
    audio: Regex,
    subtitle: Regex,
    surround: Regex,
}

impl ProbeParser {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let video = codec_pattern("Video", &config.streamable_video_codecs)?;
        let audio = codec_pattern("Audio", &config.streamable_audio_codecs)?;
        let subtitle = compile(r"(\d+)\D(\d+)\(eng.*Subtitle")?;
        let surround = compile(r"Audio:.*\b(5\.1|6\.1|7\.1)")?;
        Ok(Self {
            video,
            audio,
            subtitle,
            surround,
        })
    }

    /// Checks the tail of the banner. Anything other than the "no output" complaint
    /// means the encoder could not read the input.
    pub fn check_success(&self, diagnostics: &str) -> std::result::Result<(), EncoderError> {
        let tail = diagnostics
            .split('\n')
            .rev()
            .nth(1)
            .map(|line| line.trim_end_matches('\r'));
        if tail == Some(NO_OUTPUT_MESSAGE) {
            Ok(())
        } else {
            Err(EncoderError::new(diagnostics))
        }
    }

    pub fn video_ok(&self, diagnostics: &str) -> bool {
        self.video.is_match(diagnostics)
    }

    pub fn audio_ok(&self, diagnostics: &str) -> bool {
        self.audio.is_match(diagnostics)
    }

    pub fn english_subtitle(&self, diagnostics: &str) -> Option<StreamId> {
        let captures = self.subtitle.captures(diagnostics)?;
        Some(StreamId {
            input: captures[1].parse().ok()?,
            stream: captures[2].parse().ok()?,
        })
    }

    pub fn surround(&self, diagnostics: &str) -> bool {
        self.surround.is_match(diagnostics)
    }

    pub fn parse(&self, diagnostics: &str) -> std::result::Result<ProbeResult, EncoderError> {
        self.check_success(diagnostics)?;
        Ok(ProbeResult {
            video_ok: self.video_ok(diagnostics),
            audio_ok: self.audio_ok(diagnostics),
            subtitle: self.english_subtitle(diagnostics),
            surround: self.surround(diagnostics),
        })
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("bad probe pattern '{pattern}': {e}")))
}

fn codec_pattern(stream: &str, codecs: &[String]) -> Result<Regex> {
    if codecs.is_empty() {
        return Err(Error::Config(format!(
            "no streamable {} codecs configured",
            stream.to_lowercase()
        )));
    }
    let alternatives = codecs
        .iter()
        .map(|c| regex::escape(c))
        .collect::<Vec<_>>()
        .join("|");
    compile(&format!(r"{stream}:.*\b({alternatives})\b"))
}

pub fn probe_command(encoder: &Path, source: &Path) -> CommandLine {
    let mut cmd = CommandLine::new(encoder);
    cmd.arg("-hide_banner").arg("-i").arg(source);
    cmd
}

/// Inspects `source` with the encoder.
#[tracing::instrument(skip_all, fields(path = %source.display()))]
pub async fn probe(
    runner: &dyn ProcessRunner,
    parser: &ProbeParser,
    encoder: &Path,
    source: &Path,
) -> std::result::Result<ProbeResult, EncoderError> {
    // The exit status is always non-zero here; only the banner tail matters.
    let output = runner.run(&probe_command(encoder, source)).await?;
    let result = parser.parse(&output.stderr).map_err(|e| {
        error!("{}", output.stderr);
        e
    })?;
    debug!(?result, "probed");
    Ok(result)
}
