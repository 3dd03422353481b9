//! Bringing the catalog in line with what is on disk, one library half at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing_indicatif::style::ProgressStyle;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use walkdir::WalkDir;

use crate::catalog::MediaCatalog;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{MediaKind, MediaPath, NewMediaFile, PathKey};
use crate::naming;
use crate::notify::Notifier;
use crate::placement::PlaceOptions;
use crate::transcode::{Streamable, Transcoder};

/// Reconciles every candidate directory of one [`MediaKind`].
pub struct Reconciler<'a> {
    kind: MediaKind,
    config: &'a Config,
    catalog: &'a dyn MediaCatalog,
    transcoder: &'a Transcoder,
    notifier: &'a dyn Notifier,
    dry_run: bool,
    errors: Vec<String>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        kind: MediaKind,
        config: &'a Config,
        catalog: &'a dyn MediaCatalog,
        transcoder: &'a Transcoder,
        notifier: &'a dyn Notifier,
        dry_run: bool,
    ) -> Self {
        Self {
            kind,
            config,
            catalog,
            transcoder,
            notifier,
            dry_run,
            errors: Vec::new(),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Runs the whole pass and returns the per-file errors collected along the way.
    ///
    /// A fatal error inside one directory is recorded and the next directory is
    /// processed; only failing to list the catalog's paths aborts the pass.
    pub async fn run(mut self) -> Result<Vec<String>> {
        let span = info_span!("reconcile", kind = %self.kind);
        self.run_inner().instrument(span).await?;
        Ok(self.errors)
    }

    async fn run_inner(&mut self) -> Result<()> {
        if self.kind == MediaKind::Tv && !self.dry_run {
            self.sort_unsorted_files().await;
        }

        let paths = self.load_paths().await?;
        info!("Found {} {} paths to reconcile", paths.len(), self.kind);

        let span = Span::current();
        span.pb_set_style(&ProgressStyle::default_bar());
        span.pb_set_length(paths.len() as u64);

        for path in paths.values() {
            match self.reconcile_path(path).await {
                Ok(()) => {}
                Err(Error::MissingPath(missing)) => {
                    warn!("Path not found: {}", missing.display());
                }
                Err(e) => {
                    error!(path = %path.local_path.display(), "Error processing path: {e}");
                    self.errors
                        .push(format!("{}: {e}", path.local_path.display()));
                }
            }
            span.pb_inc(1);
        }

        if !self.errors.is_empty() {
            error!("Errors occurred in the following files:");
            for error in &self.errors {
                error!("{error}");
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(path = %path.local_path.display()))]
    async fn reconcile_path(&mut self, path: &MediaPath) -> Result<()> {
        let dir = &path.local_path;
        if !self.dry_run {
            match self.kind {
                MediaKind::Tv => self.handle_dirs(dir).await?,
                MediaKind::Movie => self.promote_subtitles(dir).await?,
            }
        }

        let local = self.build_local_file_set(dir).await?;
        let remote = self.build_remote_file_set(path).await?;
        self.update_file_records(dir, &local, &remote).await
    }

    /// Maps a catalog path onto this machine's filesystem.
    fn rebase(&self, remote: &str) -> PathBuf {
        let remote = Path::new(remote);
        let base = &self.config.library.base_path;
        if remote.starts_with(base) {
            remote.to_path_buf()
        } else {
            base.join(remote)
        }
    }

    /// Every directory worth reconciling: the catalog's unfinished paths plus every
    /// directory directly under a configured root.
    pub async fn load_paths(&self) -> Result<BTreeMap<PathBuf, MediaPath>> {
        let mut paths: BTreeMap<PathBuf, MediaPath> = BTreeMap::new();
        for record in self.catalog.list_paths(self.kind).await? {
            let local_path = self.rebase(&record.localpath);
            paths
                .entry(local_path.clone())
                .or_insert_with(|| MediaPath {
                    local_path,
                    keys: BTreeSet::new(),
                    finished: record.finished,
                })
                .keys
                .insert(PathKey::Remote(record.pk));
        }

        for local_path in self.local_paths().await {
            paths
                .entry(local_path.clone())
                .or_insert_with(|| MediaPath {
                    local_path,
                    keys: BTreeSet::new(),
                    finished: false,
                })
                .keys
                .insert(PathKey::LocalOnly);
        }

        paths.retain(|_, path| !path.finished);
        Ok(paths)
    }

    /// Directories one level under each configured root of this kind.
    async fn local_paths(&self) -> Vec<PathBuf> {
        let roots = self.config.roots(self.kind).to_vec();
        let scan = spawn_blocking(move || {
            let mut found = Vec::new();
            for root in roots {
                if !root.exists() {
                    error!("{} does not exist. Continuing...", root.display());
                    continue;
                }
                for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
                    let Ok(entry) = entry else {
                        warn!("skipping entry: {entry:?}");
                        continue;
                    };
                    if entry.path().is_dir() {
                        found.push(entry.into_path());
                    }
                }
            }
            found
        });
        scan.await.unwrap_or_else(|e| {
            error!("directory scan failed: {e}");
            Vec::new()
        })
    }

    /// Names of the media-sized files directly inside `dir`, subtitles excluded.
    pub async fn build_local_file_set(&self, dir: &Path) -> Result<BTreeSet<String>> {
        if !dir.is_dir() {
            return Err(Error::MissingPath(dir.to_path_buf()));
        }
        let root = dir.to_path_buf();
        let minimum = self.config.library.minimum_file_size;
        let subtitles = self.config.library.subtitle_extensions.clone();

        let scan = spawn_blocking(move || {
            let mut names = BTreeSet::new();
            for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
                let Ok(entry) = entry else {
                    warn!("skipping entry: {entry:?}");
                    continue;
                };
                if entry.path_is_symlink() || !entry.file_type().is_file() {
                    continue;
                }
                if naming::is_subtitle(entry.path(), &subtitles) {
                    continue;
                }
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                if metadata.len() > minimum {
                    names.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
            names
        });
        scan.await
            .map_err(|e| Error::io(dir, std::io::Error::other(e)))
    }

    pub async fn build_remote_file_set(&self, path: &MediaPath) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for id in path.remote_ids() {
            for file in self.catalog.list_files(self.kind, id).await? {
                names.insert(file.filename);
            }
        }
        Ok(names)
    }

    /// Encodes and registers every file that is on disk but unknown to the catalog.
    ///
    /// The directory's catalog record is created on first need. A record flagged
    /// `skip` ends the directory without touching anything.
    pub async fn update_file_records(
        &mut self,
        dir: &Path,
        local: &BTreeSet<String>,
        remote: &BTreeSet<String>,
    ) -> Result<()> {
        let mut path_id = None;
        for name in local.difference(remote) {
            let id = match path_id {
                Some(id) => id,
                None => {
                    let record = self.catalog.create_path(self.kind, dir).await?;
                    if record.skip {
                        info!("Skipping {} (marked skip in the catalog)", dir.display());
                        return Ok(());
                    }
                    path_id = Some(record.pk);
                    record.pk
                }
            };

            let normalized = {
                let (name, root) = (name.clone(), dir.to_path_buf());
                spawn_blocking(move || naming::normalize(&name, Some(&root)))
                    .await
                    .unwrap_or_else(|e| Err(Error::io(dir, std::io::Error::other(e))))
            };
            let path = match normalized {
                Ok(path) => path,
                Err(e) => {
                    error!("Could not normalize {name}: {e}");
                    self.errors
                        .push(format!("{}: could not normalize: {e}", dir.join(name).display()));
                    continue;
                }
            };

            if let Err(e) = self.process_file(&path, id).await {
                let message = format!(
                    "Something bad happened attempting to make {} streamable",
                    path.display()
                );
                error!("{message}: {e}");
                self.notifier
                    .notify(&self.config.email.subject, &format!("{message}\n\n{e}"))
                    .await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn process_file(&mut self, path: &Path, path_id: i64) -> Result<()> {
        let options = PlaceOptions {
            dry_run: self.dry_run,
            ..Default::default()
        };
        match self.transcoder.make_streamable(path, options).await? {
            Streamable::Encoded(final_path) => {
                if self.dry_run {
                    info!("Skipping registration of {} for dry-run", final_path.display());
                    return Ok(());
                }
                let Ok(metadata) = tokio::fs::metadata(&final_path).await else {
                    warn!("Encoded file vanished: {}", final_path.display());
                    return Ok(());
                };
                let filename = final_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let file = NewMediaFile::streamable(self.kind, path_id, filename, metadata.len());
                info!("Registering {} with the catalog", file.filename);
                self.catalog.create_file(self.kind, &file).await?;
            }
            Streamable::Skipped(reason) => {
                debug!("Skipped {}: {reason}", path.display());
            }
            Streamable::Failed(e) => {
                let message = format!(
                    "Got a non-fatal encoding error attempting to make {} streamable",
                    path.display()
                );
                error!("{message}: {e}");
                self.errors.push(message);
            }
        }
        Ok(())
    }

    /// Pulls episodes out of per-episode sub-directories into the show directory.
    ///
    /// Media files above the size floor move up as-is; subtitles move up renamed after
    /// the first of them as `<stem>-<n><ext>`. A sub-directory that gave up media is
    /// then deleted along with whatever was left in it.
    #[tracing::instrument(skip_all, fields(path = %show_dir.display()))]
    pub async fn handle_dirs(&self, show_dir: &Path) -> Result<()> {
        if !show_dir.is_dir() {
            return Ok(());
        }
        let root = show_dir.to_path_buf();
        let minimum = self.config.library.minimum_file_size;
        let media_exts = self.config.library.media_extensions.clone();
        let subtitle_exts = self.config.library.subtitle_extensions.clone();

        spawn_blocking(move || hoist_episodes(&root, minimum, &media_exts, &subtitle_exts))
            .await
            .map_err(|e| Error::io(show_dir, std::io::Error::other(e)))?
    }

    /// Files each entry of the unsorted inboxes under the show the catalog names for it.
    pub async fn sort_unsorted_files(&self) {
        let inboxes = self.config.library.unsorted_roots.clone();
        let scan = spawn_blocking(move || {
            let mut found = Vec::new();
            for inbox in inboxes {
                for entry in WalkDir::new(&inbox).min_depth(1).max_depth(1).sort_by_file_name() {
                    let Ok(entry) = entry else {
                        debug!("skipping entry: {entry:?}");
                        continue;
                    };
                    found.push(entry.into_path());
                }
            }
            found
        });
        let entries = scan.await.unwrap_or_else(|e| {
            error!("unsorted scan failed: {e}");
            Vec::new()
        });

        for entry in entries {
            let Some(name) = entry.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let destination = match self.catalog.lookup_localpath(&name).await {
                Ok(Some(found)) => self.rebase(&found.to_string_lossy()),
                Ok(None) => {
                    debug!("No location known for {name}");
                    continue;
                }
                Err(e) => {
                    warn!("Lookup failed for {name}: {e}");
                    continue;
                }
            };
            if !tokio::fs::metadata(&destination).await.is_ok_and(|m| m.is_dir()) {
                warn!("{} does not exist, leaving {name} in place", destination.display());
                continue;
            }

            let target = destination.join(&name);
            info!("Moving {} to {}", entry.display(), target.display());
            if let Err(e) = tokio::fs::rename(&entry, &target).await {
                error!("Could not move {}: {e}", entry.display());
            }
        }
    }

    /// Makes sure a movie directory has its English subtitle at the top level.
    pub async fn promote_subtitles(&self, movie_dir: &Path) -> Result<()> {
        if !tokio::fs::metadata(movie_dir).await.is_ok_and(|m| m.is_dir()) {
            return Ok(());
        }
        let names = self.config.subtitles.promote_names.clone();
        for name in &names {
            if tokio::fs::try_exists(movie_dir.join(name)).await.unwrap_or(false) {
                return Ok(());
            }
        }

        let root = movie_dir.to_path_buf();
        let nested = spawn_blocking(move || {
            WalkDir::new(&root)
                .min_depth(2)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .find(|entry| {
                    let name = entry.file_name().to_string_lossy();
                    names.iter().any(|n| *n == name)
                })
                .map(|entry| entry.into_path())
        })
        .await
        .map_err(|e| Error::io(movie_dir, std::io::Error::other(e)))?;

        let Some(found) = nested else {
            return Ok(());
        };
        let Some(name) = found.file_name() else {
            return Ok(());
        };
        let target = movie_dir.join(name);
        info!("Promoting {} to {}", found.display(), target.display());
        tokio::fs::rename(&found, &target)
            .await
            .map_err(|e| Error::io(&found, e))
    }
}

fn hoist_episodes(
    show_dir: &Path,
    minimum: u64,
    media_exts: &[String],
    subtitle_exts: &[String],
) -> Result<()> {
    let mut episode_dirs = Vec::new();
    for entry in WalkDir::new(show_dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().is_dir() {
            episode_dirs.push(entry.into_path());
        }
    }

    for episode_dir in episode_dirs {
        let mut media = Vec::new();
        let mut subtitles = Vec::new();
        for entry in WalkDir::new(&episode_dir).sort_by_file_name() {
            let Ok(entry) = entry else {
                continue;
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if naming::is_media(path, media_exts) {
                if entry.metadata().is_ok_and(|m| m.len() > minimum) {
                    media.push(path.to_path_buf());
                }
            } else if naming::is_subtitle(path, subtitle_exts) {
                subtitles.push(path.to_path_buf());
            }
        }

        let Some(first) = media.first() else {
            debug!("nothing to hoist from {}", episode_dir.display());
            continue;
        };
        let stem = first
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        for file in &media {
            let Some(name) = file.file_name() else {
                continue;
            };
            let target = show_dir.join(name);
            info!("Moving {} to {}", file.display(), target.display());
            std::fs::rename(file, &target).map_err(|e| Error::io(file, e))?;
        }
        for (n, subtitle) in subtitles.iter().enumerate() {
            let ext = naming::file_ext(subtitle).unwrap_or_default();
            let target = show_dir.join(format!("{stem}-{n}{ext}"));
            info!("Moving {} to {}", subtitle.display(), target.display());
            std::fs::rename(subtitle, &target).map_err(|e| Error::io(subtitle, e))?;
        }

        info!("Removing {}", episode_dir.display());
        std::fs::remove_dir_all(&episode_dir).map_err(|e| Error::io(&episode_dir, e))?;
    }
    Ok(())
}
