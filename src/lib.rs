//! Resumable, checkpointed backups for a database-backed site.
//!
//! A backup is a pipeline of steps (discovery, database dump, filelist,
//! archive assembly, remote transfer) driven by an orchestrator that
//! checkpoints after every step. A single-flight marker in the settings
//! store prevents concurrent runs; interrupted runs resume from the last
//! completed step.

pub mod compressor;
pub mod config;
pub mod db;
pub mod error;
pub mod filelist;
pub mod fs;
pub mod logger;
pub mod notice;
pub mod pipeline;
pub mod progress;
pub mod remote;
pub mod settings;
pub mod steps;

pub use config::AppConfig;
pub use error::{BackupError, Result};
