use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The two halves of the library. Each one has its own roots and its own
/// catalog collections.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Tv,
    Movie,
}

impl MediaKind {
    pub fn path_endpoint(self) -> &'static str {
        match self {
            MediaKind::Tv => "tvpath/",
            MediaKind::Movie => "moviepath/",
        }
    }

    pub fn file_endpoint(self) -> &'static str {
        match self {
            MediaKind::Tv => "tv/",
            MediaKind::Movie => "movie/",
        }
    }
}

/// Identifies the catalog record(s) behind a local directory.
///
/// `LocalOnly` marks a directory that was found on disk but has no remote
/// record yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathKey {
    Remote(i64),
    LocalOnly,
}

/// One library directory and everything the catalog knows about it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaPath {
    pub local_path: PathBuf,
    pub keys: BTreeSet<PathKey>,
    pub finished: bool,
}

impl MediaPath {
    pub fn remote_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.keys.iter().filter_map(|key| match key {
            PathKey::Remote(id) => Some(*id),
            PathKey::LocalOnly => None,
        })
    }
}

/// A media path as the catalog serves it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaPathRecord {
    pub pk: i64,
    #[serde(default)]
    pub localpath: String,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub skip: bool,
}

/// A media file as the catalog serves it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaFileRecord {
    pub filename: String,
}

/// A freshly encoded file being registered with the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMediaFile {
    #[serde(rename = "path")]
    pub path_id: i64,
    pub filename: String,
    pub size: u64,
    pub streamable: bool,
    pub skip: bool,
    pub finished: bool,
    #[serde(skip)]
    pub is_movie: bool,
}

impl NewMediaFile {
    pub fn streamable(kind: MediaKind, path_id: i64, filename: String, size: u64) -> Self {
        Self {
            path_id,
            filename,
            size,
            streamable: true,
            skip: false,
            finished: true,
            is_movie: kind == MediaKind::Movie,
        }
    }
}
