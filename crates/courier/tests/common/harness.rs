//! Test harness for isolated engine runs.
//!
//! The `TestHarness` struct provides:
//! - Temporary source and destination directories behind local connections
//! - An in-memory database with both connections registered
//! - A `TransferEngine` wired to a `FaultyFactory` with fast polling

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use courier::config::{EngineConfig, PollConfig};
use courier::db::{connection_repo, job_repo, log_repo, run_repo};
use courier::model::{Connection, Credentials, Job, JobRun, Protocol, TransferLog};
use courier::{Database, TransferEngine};

use super::FaultyFactory;

pub const SOURCE_CONNECTION: &str = "conn-source";
pub const DESTINATION_CONNECTION: &str = "conn-destination";

/// Engine settings with millisecond delays so retries and polling stay fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_attempts: 3,
        retry_delay_ms: 1,
        progress_flush_interval_ms: 5,
        verify: PollConfig::new(2, 1),
        verify_lagging: PollConfig::new(2, 1),
        delete_confirm: PollConfig::new(2, 1),
        ..EngineConfig::default()
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub source_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub db: Arc<Database>,
    pub factory: Arc<FaultyFactory>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_dir = temp_dir.path().join("source");
        let dest_dir = temp_dir.path().join("destination");
        std::fs::create_dir_all(&source_dir).expect("Failed to create source dir");
        std::fs::create_dir_all(&dest_dir).expect("Failed to create destination dir");

        let db = Arc::new(Database::open_in_memory().expect("Failed to open database"));
        for (id, dir) in [
            (SOURCE_CONNECTION, &source_dir),
            (DESTINATION_CONNECTION, &dest_dir),
        ] {
            let connection = Connection {
                id: id.to_string(),
                name: id.to_string(),
                protocol: Protocol::Local,
                host: String::new(),
                port: 0,
                credentials: Credentials::new().with("basePath", dir.to_string_lossy()),
            };
            connection_repo::insert(&db, &connection).expect("Failed to insert connection");
        }

        Self {
            temp_dir,
            source_dir,
            dest_dir,
            db,
            factory: Arc::new(FaultyFactory::new()),
        }
    }

    pub fn engine(&self) -> TransferEngine {
        TransferEngine::new(self.db.clone(), self.factory.clone(), fast_config())
    }

    pub fn add_job(&self, job: &Job) {
        job_repo::insert(&self.db, job).expect("Failed to insert job");
    }

    pub fn job(&self, id: &str) -> Job {
        job_repo::find_by_id(&self.db, id)
            .expect("Failed to load job")
            .expect("Job missing")
    }

    /// Runs for a job, newest first.
    pub fn runs(&self, job_id: &str) -> Vec<JobRun> {
        run_repo::list_for_job(&self.db, job_id, 100).expect("Failed to list runs")
    }

    pub fn logs(&self, run_id: &str) -> Vec<TransferLog> {
        log_repo::list_for_run(&self.db, run_id).expect("Failed to list logs")
    }

    pub fn write_source(&self, name: &str, content: &[u8]) -> PathBuf {
        write(self.source_dir.join(name), content)
    }

    pub fn write_dest(&self, name: &str, content: &[u8]) -> PathBuf {
        write(self.dest_dir.join(name), content)
    }

    pub fn read_dest(&self, name: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dest_dir.join(name)).ok()
    }

    pub fn source_exists(&self, relative: &str) -> bool {
        self.source_dir.join(relative).exists()
    }

    pub fn dest_exists(&self, relative: &str) -> bool {
        self.dest_dir.join(relative).exists()
    }

    /// Sorted regular-file names directly under the destination directory.
    pub fn dest_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.dest_dir)
            .expect("Failed to read destination dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn write(path: PathBuf, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(&path, content).expect("Failed to write file");
    path
}

/// Sets a file's modification time to `seconds_ago` before now.
pub fn set_age(path: &PathBuf, seconds_ago: u64) {
    let when = SystemTime::now() - Duration::from_secs(seconds_ago);
    std::fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file")
        .set_modified(when)
        .expect("Failed to set mtime");
}
