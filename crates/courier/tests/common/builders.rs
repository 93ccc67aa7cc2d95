//! Builders for jobs and archive fixtures.

#![allow(dead_code)]

use std::io::Write;

use courier::model::{Job, JobStatus, PostTransferAction};

use super::harness::{DESTINATION_CONNECTION, SOURCE_CONNECTION};

/// Builder for `Job` rows wired to the harness connections.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    /// A retain job copying everything from `/` to `/` with overwrite on.
    pub fn new(id: &str) -> Self {
        Self {
            job: Job {
                id: id.to_string(),
                name: format!("{} job", id),
                source_connection_id: SOURCE_CONNECTION.to_string(),
                source_path: "/".to_string(),
                destination_connection_id: DESTINATION_CONNECTION.to_string(),
                destination_path: "/".to_string(),
                file_filter: String::new(),
                post_transfer_action: PostTransferAction::Retain,
                move_path: None,
                overwrite_existing: true,
                skip_hidden_files: false,
                extract_archives: false,
                delta_sync: false,
                status: JobStatus::Active,
            },
        }
    }

    pub fn filter(mut self, expression: &str) -> Self {
        self.job.file_filter = expression.to_string();
        self
    }

    pub fn source_path(mut self, path: &str) -> Self {
        self.job.source_path = path.to_string();
        self
    }

    pub fn destination_path(mut self, path: &str) -> Self {
        self.job.destination_path = path.to_string();
        self
    }

    pub fn source_connection(mut self, id: &str) -> Self {
        self.job.source_connection_id = id.to_string();
        self
    }

    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.job.overwrite_existing = enabled;
        self
    }

    pub fn delta_sync(mut self, enabled: bool) -> Self {
        self.job.delta_sync = enabled;
        self
    }

    pub fn extract_archives(mut self, enabled: bool) -> Self {
        self.job.extract_archives = enabled;
        self
    }

    pub fn skip_hidden(mut self, enabled: bool) -> Self {
        self.job.skip_hidden_files = enabled;
        self
    }

    pub fn delete_after(mut self) -> Self {
        self.job.post_transfer_action = PostTransferAction::Delete;
        self
    }

    pub fn move_to(mut self, path: &str) -> Self {
        self.job.post_transfer_action = PostTransferAction::Move;
        self.job.move_path = Some(path.to_string());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.job.status = status;
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}

/// Zip archive bytes holding the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).expect("Failed to start zip entry");
        writer.write_all(data).expect("Failed to write zip entry");
    }
    writer
        .finish()
        .expect("Failed to finish zip")
        .into_inner()
}
