//! Moving finished encodes (and their subtitles) over the files they replace.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceOptions {
    pub remove_original: bool,
    pub dry_run: bool,
    pub append_suffix: bool,
}

impl Default for PlaceOptions {
    fn default() -> Self {
        Self {
            remove_original: true,
            dry_run: false,
            append_suffix: true,
        }
    }
}

/// `final_path` with the completion suffix appended to its file name.
pub fn suffixed(final_path: &Path, suffix: &str) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("{name}.{suffix}"))
}

/// Renames `from` to `to`, replacing whatever is at `to`.
///
/// When a plain rename is refused (typically because the two paths are on different
/// filesystems) the data is copied to a hidden staging file next to `to` and renamed
/// from there, so `to` never holds a partial file.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::io(from, e)),
        Err(e) => debug!(from = %from.display(), to = %to.display(), "rename refused, copying: {e}"),
    }

    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = to.with_file_name(format!(".{name}.partial"));
    if let Err(e) = tokio::fs::copy(from, &staging).await {
        tokio::fs::remove_file(&staging).await.ok();
        return Err(Error::io(from, e));
    }
    tokio::fs::rename(&staging, to)
        .await
        .map_err(|e| Error::io(&staging, e))?;
    tokio::fs::remove_file(from)
        .await
        .map_err(|e| Error::io(from, e))?;
    Ok(())
}

/// Swaps the encoded file at `temp` into place for `final_path` and returns where it
/// ended up. Under `dry_run` nothing moves but the would-be path is still returned.
pub async fn place(
    temp: &Path,
    final_path: &Path,
    suffix: &str,
    options: PlaceOptions,
) -> Result<PathBuf> {
    let target = if options.append_suffix {
        suffixed(final_path, suffix)
    } else {
        final_path.to_path_buf()
    };

    info!("Renaming file {} to {}", temp.display(), target.display());
    if options.dry_run {
        info!("Skipping move execution for dry-run");
        return Ok(target);
    }

    // The replacement lands first; the original only goes once it is in place.
    move_file(temp, &target).await?;

    if options.remove_original && target != final_path {
        match tokio::fs::remove_file(final_path).await {
            Ok(()) => debug!(path = %final_path.display(), "removed original"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(final_path, e)),
        }
    }

    Ok(target)
}

/// Moves subtitle files produced beside `temp` so they sit beside `target`, keeping
/// whatever followed the temp file's stem (`-0.vtt`, `.vtt`, ...).
pub async fn place_subtitles(
    produced: &[PathBuf],
    temp: &Path,
    target: &Path,
) -> Result<Vec<PathBuf>> {
    let temp_stem = stem(temp);
    let target_stem = stem(target);
    let Some(target_dir) = target.parent() else {
        return Ok(Vec::new());
    };

    let mut placed = Vec::with_capacity(produced.len());
    for subtitle in produced {
        let name = subtitle
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let rest = name.strip_prefix(&temp_stem).unwrap_or(&name);
        let destination = target_dir.join(format!("{target_stem}{rest}"));
        if !subtitle.exists() {
            warn!("File not found: {}", subtitle.display());
            continue;
        }
        info!(
            "Moving subtitle from {} to {}",
            subtitle.display(),
            destination.display()
        );
        move_file(subtitle, &destination).await?;
        placed.push(destination);
    }
    Ok(placed)
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
