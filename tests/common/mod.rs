#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediasync::catalog::MediaCatalog;
use mediasync::model::{MediaFileRecord, MediaKind, MediaPathRecord, NewMediaFile};
use mediasync::notify::Notifier;
use mediasync::process::{CommandLine, ProcessOutput, ProcessRunner};
use mediasync::{Config, EncoderError, Error, Orchestrator, Result};
use tempfile::TempDir;

pub const STREAMABLE_BANNER: &str = "
Input #0, matroska,webm, from 'input.mkv':
  Duration: 00:42:10.00, start: 0.000000, bitrate: 2500 kb/s
    Stream #0:0(und): Video: h264 (Main), yuv420p, 1280x720, 23.98 fps (default)
    Stream #0:1(und): Audio: aac (LC), 48000 Hz, stereo, fltp, 192 kb/s (default)
At least one output file must be specified
";

/// Size of every file the fake encoder produces.
pub const ENCODED_SIZE: usize = 64;

#[derive(Default)]
pub struct CatalogState {
    pub paths: Vec<(MediaKind, MediaPathRecord)>,
    pub files: HashMap<(MediaKind, i64), Vec<String>>,
    pub lookups: HashMap<String, PathBuf>,
    pub created_paths: Vec<(MediaKind, PathBuf)>,
    pub created_files: Vec<(MediaKind, NewMediaFile)>,
    pub infer_calls: usize,
    /// `create_file` fails for file names containing any of these.
    pub reject_files: HashSet<String>,
}

/// The catalog, in memory.
#[derive(Default)]
pub struct FakeCatalog {
    pub state: Mutex<CatalogState>,
}

impl FakeCatalog {
    pub fn add_path(&self, kind: MediaKind, pk: i64, localpath: &Path, finished: bool, skip: bool) {
        self.state.lock().unwrap().paths.push((
            kind,
            MediaPathRecord {
                pk,
                localpath: localpath.to_string_lossy().into_owned(),
                finished,
                skip,
            },
        ));
    }

    pub fn add_file(&self, kind: MediaKind, pk: i64, filename: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .entry((kind, pk))
            .or_default()
            .push(filename.to_string());
    }

    pub fn created_files(&self) -> Vec<(MediaKind, NewMediaFile)> {
        self.state.lock().unwrap().created_files.clone()
    }

    pub fn created_paths(&self) -> Vec<(MediaKind, PathBuf)> {
        self.state.lock().unwrap().created_paths.clone()
    }
}

#[async_trait]
impl MediaCatalog for FakeCatalog {
    async fn list_paths(&self, kind: MediaKind) -> Result<Vec<MediaPathRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .paths
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn list_files(&self, kind: MediaKind, path_id: i64) -> Result<Vec<MediaFileRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .get(&(kind, path_id))
            .into_iter()
            .flatten()
            .map(|filename| MediaFileRecord {
                filename: filename.clone(),
            })
            .collect())
    }

    async fn create_path(&self, kind: MediaKind, local_path: &Path) -> Result<MediaPathRecord> {
        let mut state = self.state.lock().unwrap();
        state.created_paths.push((kind, local_path.to_path_buf()));
        let local = local_path.to_string_lossy().into_owned();
        if let Some((_, existing)) = state
            .paths
            .iter()
            .find(|(k, record)| *k == kind && record.localpath == local)
        {
            return Ok(existing.clone());
        }
        let pk = 1000 + state.paths.len() as i64;
        let record = MediaPathRecord {
            pk,
            localpath: local,
            finished: false,
            skip: false,
        };
        state.paths.push((kind, record.clone()));
        Ok(record)
    }

    async fn create_file(&self, kind: MediaKind, file: &NewMediaFile) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state
            .reject_files
            .iter()
            .any(|needle| file.filename.contains(needle.as_str()))
        {
            return Err(Error::Catalog(format!("rejected {}", file.filename)));
        }
        state.created_files.push((kind, file.clone()));
        state
            .files
            .entry((kind, file.path_id))
            .or_default()
            .push(file.filename.clone());
        Ok(())
    }

    async fn lookup_localpath(&self, title: &str) -> Result<Option<PathBuf>> {
        Ok(self.state.lock().unwrap().lookups.get(title).cloned())
    }

    async fn infer_scrapers(&self) -> Result<()> {
        self.state.lock().unwrap().infer_calls += 1;
        Ok(())
    }
}

/// Stands in for the encoder and subtitle converter by writing the files they would.
#[derive(Default)]
pub struct FakeEncoder {
    /// Encodes of sources whose path contains any of these exit non-zero.
    pub fail_when: Vec<String>,
    pub calls: Mutex<Vec<CommandLine>>,
}

impl FakeEncoder {
    pub fn failing(needles: &[&str]) -> Self {
        Self {
            fail_when: needles.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn encodes(&self) -> Vec<CommandLine> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|cmd| cmd.contains(&["-movflags", "faststart"]))
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn exit(code: i32) -> ProcessOutput {
    ProcessOutput {
        code: Some(code),
        ..Default::default()
    }
}

#[async_trait]
impl ProcessRunner for FakeEncoder {
    async fn run(&self, command: &CommandLine) -> std::result::Result<ProcessOutput, EncoderError> {
        self.calls.lock().unwrap().push(command.clone());
        let args: Vec<String> = command
            .get_args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        if command.program() == "srt-vtt" {
            let srt = PathBuf::from(&args[0]);
            fs::write(srt.with_extension("vtt"), b"WEBVTT\n").unwrap();
            return Ok(exit(0));
        }
        if command.contains(&["-movflags", "faststart"]) {
            if args
                .iter()
                .any(|a| self.fail_when.iter().any(|needle| a.contains(needle.as_str())))
            {
                return Ok(ProcessOutput {
                    code: Some(1),
                    stderr: "Conversion failed!".to_string(),
                    ..Default::default()
                });
            }
            fs::write(args.last().unwrap(), vec![b'e'; ENCODED_SIZE]).unwrap();
            return Ok(exit(0));
        }
        if command.contains(&["-map"]) {
            fs::write(args.last().unwrap(), b"1\n").unwrap();
            return Ok(exit(0));
        }
        Ok(ProcessOutput {
            code: Some(1),
            stderr: STREAMABLE_BANNER.to_string(),
            ..Default::default()
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
    }
}

/// A throwaway library: `tv/`, `movies/`, `unsorted/` and a scratch directory.
pub struct Library {
    pub root: TempDir,
    pub config: Config,
}

impl Library {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        for dir in ["tv", "movies", "unsorted", "scratch"] {
            fs::create_dir_all(root.path().join(dir)).unwrap();
        }
        let mut config = Config::default();
        config.library.tv_roots = vec![root.path().join("tv")];
        config.library.movie_roots = vec![root.path().join("movies")];
        config.library.unsorted_roots = vec![root.path().join("unsorted")];
        config.library.minimum_file_size = 10;
        config.encoder.program = PathBuf::from("ffmpeg");
        config.encoder.scratch_dir = root.path().join("scratch");
        config.catalog.request_cooldown = Duration::ZERO;
        Self { root, config }
    }

    pub fn tv(&self, show: &str) -> PathBuf {
        self.root.path().join("tv").join(show)
    }

    pub fn movie(&self, title: &str) -> PathBuf {
        self.root.path().join("movies").join(title)
    }

    pub fn unsorted(&self) -> PathBuf {
        self.root.path().join("unsorted")
    }

    /// Writes a file big enough to count as media.
    pub fn media(&self, path: &Path) -> PathBuf {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, vec![b'x'; 100]).unwrap();
        path.to_path_buf()
    }

    pub fn orchestrator(
        &self,
        catalog: &Arc<FakeCatalog>,
        encoder: &Arc<FakeEncoder>,
        notifier: &Arc<RecordingNotifier>,
        dry_run: bool,
    ) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            catalog.clone(),
            notifier.clone(),
            encoder.clone(),
            dry_run,
        )
        .unwrap()
    }
}

pub struct Harness {
    pub library: Library,
    pub catalog: Arc<FakeCatalog>,
    pub encoder: Arc<FakeEncoder>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_encoder(FakeEncoder::default())
    }

    pub fn with_encoder(encoder: FakeEncoder) -> Self {
        Self {
            library: Library::new(),
            catalog: Arc::new(FakeCatalog::default()),
            encoder: Arc::new(encoder),
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    pub fn orchestrator(&self, dry_run: bool) -> Orchestrator {
        self.library
            .orchestrator(&self.catalog, &self.encoder, &self.notifier, dry_run)
    }
}
