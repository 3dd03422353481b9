//! Keeps a media catalog in sync with the library on disk, re-encoding whatever
//! is not yet browser-streamable along the way.

pub mod catalog;
pub mod config;
pub mod error;
pub mod model;
pub mod naming;
pub mod notify;
pub mod orchestrator;
pub mod placement;
pub mod probe;
pub mod process;
pub mod reconcile;
pub mod subtitles;
pub mod transcode;

pub use config::Config;
pub use error::{EncoderError, Error, Result};
pub use orchestrator::Orchestrator;
