//! Browser-ready subtitle tracks for an encode.
//!
//! Tracks come from the first source that yields anything, in order: sidecar files
//! that look English, sidecar files named after the source, then the English stream
//! embedded in the source itself.

use std::path::{Path, PathBuf};

use regex::Regex;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{EncoderError, Error, Result};
use crate::naming;
use crate::placement::move_file;
use crate::probe::StreamId;
use crate::process::{CommandLine, ProcessRunner};

#[derive(Debug, Clone)]
pub struct SubtitlePipeline {
    encoder: PathBuf,
    converter: PathBuf,
    english: Regex,
    extensions: Vec<String>,
}

impl SubtitlePipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let english = Regex::new(&config.subtitles.english_pattern)
            .map_err(|e| Error::Config(format!("subtitles.english_pattern: {e}")))?;
        Ok(Self {
            encoder: config.encoder.program.clone(),
            converter: config.encoder.subtitle_converter.clone(),
            english,
            extensions: config.library.subtitle_extensions.clone(),
        })
    }

    /// Produces `.vtt` files beside `dest` for `source` and returns their paths.
    ///
    /// Sidecar tracks are written as `<dest stem>-<n>.vtt`, an extracted embedded
    /// track as `<dest stem>.vtt`. Sidecar files themselves are left where they are.
    #[tracing::instrument(skip_all, fields(path = %source.display()))]
    pub async fn attach(
        &self,
        runner: &dyn ProcessRunner,
        source: &Path,
        dest: &Path,
        embedded: Option<StreamId>,
        dry_run: bool,
    ) -> Result<Vec<PathBuf>> {
        let sidecars = self.sidecars(source).await?;
        if !sidecars.is_empty() {
            let dest_dir = dest.parent().unwrap_or(Path::new("."));
            let dest_stem = stem(dest);
            let mut produced: Vec<PathBuf> = Vec::with_capacity(sidecars.len());
            for (n, srt) in sidecars.iter().enumerate() {
                let target = dest_dir.join(format!("{dest_stem}-{n}.vtt"));
                info!("Converting {} to {}", srt.display(), target.display());
                if dry_run {
                    continue;
                }
                let placed = match self.convert(runner, srt).await {
                    Ok(vtt) => move_file(&vtt, &target).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = placed {
                    for done in &produced {
                        remove_quietly(done).await;
                    }
                    return Err(e);
                }
                produced.push(target);
            }
            return Ok(produced);
        }

        let Some(stream) = embedded else {
            debug!("no subtitles found");
            return Ok(Vec::new());
        };

        let srt = dest.with_extension("srt");
        info!("Extracting embedded subtitle stream {stream} to {}", srt.display());
        if dry_run {
            return Ok(Vec::new());
        }
        self.extract(runner, source, stream, &srt).await?;
        let converted = self.convert(runner, &srt).await;
        remove_quietly(&srt).await;
        Ok(vec![converted?])
    }

    /// Sidecar subtitle files for `source`, sorted by name. English-looking names win
    /// over names that carry the source's stem (`<stem>.srt`, `<stem>-0.srt`, ...).
    async fn sidecars(&self, source: &Path) -> Result<Vec<PathBuf>> {
        let Some(dir) = source.parent() else {
            return Ok(Vec::new());
        };
        let root = dir.to_path_buf();
        let extensions = self.extensions.clone();
        let candidates = spawn_blocking(move || {
            let mut found = Vec::new();
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1).sort_by_file_name() {
                let Ok(entry) = entry else {
                    warn!("skipping entry: {entry:?}");
                    continue;
                };
                if entry.file_type().is_file() && naming::is_subtitle(entry.path(), &extensions) {
                    found.push(entry.into_path());
                }
            }
            found
        })
        .await
        .map_err(|e| Error::io(dir, std::io::Error::other(e)))?;

        let english: Vec<PathBuf> = candidates
            .iter()
            .filter(|path| self.english.is_match(&file_name(path)))
            .cloned()
            .collect();
        if !english.is_empty() {
            return Ok(english);
        }

        let source_stem = stem(source);
        Ok(candidates
            .into_iter()
            .filter(|path| shares_stem(&file_name(path), &source_stem))
            .collect())
    }

    /// Runs the converter on `srt`, which writes the `.vtt` beside it.
    async fn convert(&self, runner: &dyn ProcessRunner, srt: &Path) -> Result<PathBuf> {
        let vtt = srt.with_extension("vtt");
        let mut cmd = CommandLine::new(&self.converter);
        cmd.arg(srt);

        let output = runner.run(&cmd).await?;
        if !output.success() {
            remove_quietly(&vtt).await;
            warn!("{}", output.stderr);
            return Err(EncoderError::new(format!(
                "subtitle conversion failed for '{}'",
                srt.display()
            ))
            .into());
        }
        if !vtt.exists() {
            return Err(EncoderError::new(format!(
                "subtitle converter produced nothing for '{}'",
                srt.display()
            ))
            .into());
        }
        Ok(vtt)
    }

    async fn extract(
        &self,
        runner: &dyn ProcessRunner,
        source: &Path,
        stream: StreamId,
        srt: &Path,
    ) -> Result<()> {
        let mut cmd = CommandLine::new(&self.encoder);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-map")
            .arg(stream.to_string())
            .arg(srt);

        let output = runner.run(&cmd).await?;
        if !output.success() {
            remove_quietly(srt).await;
            warn!("{}", output.stderr);
            return Err(EncoderError::new(format!(
                "subtitle extraction failed for '{}'",
                source.display()
            ))
            .into());
        }
        Ok(())
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "could not remove: {e}");
        }
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `name` belongs to `stem` if the stem is followed by an extension or a counter, so
/// `E1` does not pick up `E10`'s subtitles.
fn shares_stem(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('-'))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
