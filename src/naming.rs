//! File name hygiene and extension-based classification.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Error, Result};

/// Lower-cased extension including the leading dot, e.g. `".mp4"`.
pub fn file_ext(path: impl AsRef<Path>) -> Option<String> {
    path.as_ref()
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn has_extension(path: &Path, allowed: &[String]) -> bool {
    file_ext(path).is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext)))
}

pub fn is_media(path: impl AsRef<Path>, media_extensions: &[String]) -> bool {
    has_extension(path.as_ref(), media_extensions)
}

pub fn is_subtitle(path: impl AsRef<Path>, subtitle_extensions: &[String]) -> bool {
    has_extension(path.as_ref(), subtitle_extensions)
}

/// Closest ASCII spelling of `raw`, without apostrophes. Byte names are decoded as
/// UTF-8 first.
pub fn normalized_name(raw: impl AsRef<[u8]>) -> String {
    let decoded = String::from_utf8_lossy(raw.as_ref());
    deunicode::deunicode(&decoded).replace('\'', "")
}

/// Renames `name` (inside `dir`, when given) to its normalized spelling and returns the
/// resulting path. Leaves the file alone when the name is already clean.
pub fn normalize(name: impl AsRef<Path>, dir: Option<&Path>) -> Result<PathBuf> {
    let name = name.as_ref();
    let current = match dir {
        Some(dir) => dir.join(name),
        None => name.to_path_buf(),
    };
    let Some(file_name) = current.file_name() else {
        return Ok(current);
    };

    let clean = normalized_name(file_name.as_encoded_bytes());
    if file_name == clean.as_str() {
        return Ok(current);
    }

    let renamed = current.with_file_name(&clean);
    if renamed.exists() {
        return Err(Error::io(
            &renamed,
            std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("cannot rename '{}' over an existing file", current.display()),
            ),
        ));
    }
    info!(from = %current.display(), to = %renamed.display(), "normalizing file name");
    std::fs::rename(&current, &renamed).map_err(|e| Error::io(&current, e))?;
    Ok(renamed)
}
