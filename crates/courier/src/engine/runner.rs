//! Executes one job run end to end.

use std::collections::BTreeSet;
use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::progress::{CountingReader, ProgressFlusher};
use super::selection::{DestinationIndex, Selection};
use super::verify;
use super::{EngineError, RunStore};
use crate::archive::{self, ArchiveEntry};
use crate::config::{EngineConfig, PollConfig};
use crate::model::{
    Connection, Job, JobRun, JobStatus, NewTransferLog, PostTransferAction, RunOutcome,
    RunProgress, RunStatus,
};
use crate::provider::{join_path, FileInfo, ProviderError, ProviderFactory, StorageProvider};
use crate::sanitize::{describe_connection, hash_path, redact_path};

/// What `run_job` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunReport {
    /// The job was already running; no run was created.
    AlreadyRunning,
    Finished {
        run_id: String,
        status: RunStatus,
        files_transferred: u64,
        bytes_transferred: u64,
        error_message: Option<String>,
    },
}

pub struct TransferEngine {
    pub(super) store: Arc<dyn RunStore>,
    pub(super) providers: Arc<dyn ProviderFactory>,
    pub(super) config: EngineConfig,
}

#[derive(Debug, Default)]
struct RunCounters {
    files: u64,
    bytes: u64,
}

/// Per-run state shared by every file.
struct RunContext<'a> {
    job: &'a Job,
    run_id: &'a str,
    selection: &'a Selection<'a>,
    index: Option<&'a DestinationIndex>,
    source: &'a dyn StorageProvider,
    destination: &'a dyn StorageProvider,
}

impl RunContext<'_> {
    fn destination_has(&self, name: &str) -> bool {
        self.index.is_some_and(|i| i.contains(name))
    }
}

/// Result of one successful attempt on one source file.
struct Delivered {
    logs: Vec<NewTransferLog>,
    files: u64,
    bytes: u64,
}

enum FileOutcome {
    Delivered { files: u64, bytes: u64 },
    Directory,
    Failed,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn RunStore>,
        providers: Arc<dyn ProviderFactory>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            providers,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs a job once.
    ///
    /// Missing jobs or connections are returned as errors before any run is
    /// recorded. Everything that goes wrong after the run row exists ends up
    /// in the run's status and error message instead, except a failure to
    /// store that outcome, which is returned after the job status is reset.
    pub async fn run_job(&self, job_id: &str) -> Result<RunReport, EngineError> {
        let job = self
            .store
            .find_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;

        if job.status == JobStatus::Running {
            info!(job_id = %job.id, "Job is already running; not starting another run");
            return Ok(RunReport::AlreadyRunning);
        }

        let source = self.load_connection(&job.source_connection_id).await?;
        let destination = self.load_connection(&job.destination_connection_id).await?;

        let previous_status = job.status;
        let run = JobRun::start(&job.id);
        self.store.create_run(&run).await?;

        let span = info_span!(
            "job_run",
            job_id = %job.id,
            run_id = %run.id,
            source = %describe_connection(&source),
            destination = %describe_connection(&destination),
        );

        let mut counters = RunCounters::default();
        let result = match self.store.set_job_status(&job.id, JobStatus::Running).await {
            Ok(()) => {
                self.execute(&job, &source, &destination, &run.id, &mut counters)
                    .instrument(span.clone())
                    .await
            }
            Err(e) => Err(e.into()),
        };

        let (status, error_message) = match result {
            Ok(()) => (RunStatus::Success, None),
            Err(e) => {
                span.in_scope(|| warn!(error = %e, "Run failed"));
                (RunStatus::Failure, Some(e.to_string()))
            }
        };

        let completed = self
            .store
            .complete_run(
                &run.id,
                &RunOutcome {
                    status,
                    error_message: error_message.clone(),
                    files_transferred: counters.files,
                    bytes_transferred: counters.bytes,
                    completed_at: Utc::now(),
                },
            )
            .await;
        if let Err(e) = &completed {
            span.in_scope(|| error!(error = %e, "Failed to record run outcome"));
        }

        // The job must leave `running` even when the outcome was not stored.
        let final_status = match (previous_status, status, &completed) {
            (JobStatus::Inactive, _, _) => JobStatus::Inactive,
            (_, RunStatus::Success, Ok(())) => JobStatus::Active,
            _ => JobStatus::Error,
        };
        let reset = self.store.set_job_status(&job.id, final_status).await;
        completed?;
        reset?;

        span.in_scope(|| {
            info!(
                status = %status,
                files = counters.files,
                bytes = counters.bytes,
                "Run finished"
            )
        });

        Ok(RunReport::Finished {
            run_id: run.id,
            status,
            files_transferred: counters.files,
            bytes_transferred: counters.bytes,
            error_message,
        })
    }

    pub(super) async fn load_connection(&self, id: &str) -> Result<Connection, EngineError> {
        self.store
            .find_connection(id)
            .await?
            .ok_or_else(|| EngineError::ConnectionNotFound(id.to_string()))
    }

    async fn execute(
        &self,
        job: &Job,
        source_conn: &Connection,
        destination_conn: &Connection,
        run_id: &str,
        counters: &mut RunCounters,
    ) -> Result<(), EngineError> {
        let selection = Selection::new(job)?;
        let mut source = self.providers.create(source_conn)?;
        let mut destination = self.providers.create(destination_conn)?;

        let result = self
            .transfer_all(
                job,
                &selection,
                source.as_mut(),
                destination.as_mut(),
                run_id,
                counters,
            )
            .await;

        if let Err(e) = source.disconnect().await {
            debug!(error = %e, "Source disconnect failed");
        }
        if let Err(e) = destination.disconnect().await {
            debug!(error = %e, "Destination disconnect failed");
        }
        result
    }

    async fn transfer_all(
        &self,
        job: &Job,
        selection: &Selection<'_>,
        source: &mut dyn StorageProvider,
        destination: &mut dyn StorageProvider,
        run_id: &str,
        counters: &mut RunCounters,
    ) -> Result<(), EngineError> {
        source.connect().await?;
        destination.connect().await?;

        let mut files = source
            .list_files(&job.source_path, Some(selection.filter()))
            .await?;
        files.retain(|f| !selection.is_excluded(f));

        let total_bytes: u64 = files.iter().map(|f| f.size).sum();
        self.store
            .record_totals(run_id, files.len() as u64, total_bytes)
            .await?;
        info!(
            files = files.len(),
            bytes = total_bytes,
            source_path = %redact_path(&job.source_path),
            "Source listed"
        );

        let index = if job.needs_destination_index() {
            Some(load_destination_index(&*destination, &job.destination_path).await?)
        } else {
            None
        };

        let ctx = RunContext {
            job,
            run_id,
            selection,
            index: index.as_ref(),
            source: &*source,
            destination: &*destination,
        };

        for file in &files {
            self.store
                .record_progress(
                    run_id,
                    &RunProgress {
                        current_file: Some(file.name.clone()),
                        current_file_size: Some(file.size),
                        current_file_bytes_transferred: Some(0),
                        files_transferred: counters.files,
                        bytes_transferred: counters.bytes,
                    },
                )
                .await?;

            if let Some(reason) = selection.destination_skip(file, ctx.index) {
                debug!(file = %file.name, reason = ?reason, "Skipping");
                continue;
            }

            match self.transfer_with_retries(&ctx, file).await? {
                FileOutcome::Delivered { files, bytes } => {
                    counters.files += files;
                    counters.bytes += bytes;
                }
                FileOutcome::Directory => {
                    debug!(file = %file.name, "Listed entry is a directory; skipped");
                }
                FileOutcome::Failed => {}
            }
        }
        Ok(())
    }

    /// Only store errors escape; transfer errors become failure logs.
    async fn transfer_with_retries(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
    ) -> Result<FileOutcome, EngineError> {
        let destination_path = join_path(&ctx.job.destination_path, &file.name);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        let mut written = BTreeSet::new();

        for attempt in 1..=max_attempts {
            match self.attempt(ctx, file, &destination_path, &mut written).await {
                Ok(delivered) => {
                    for log in &delivered.logs {
                        self.store.append_log(log).await?;
                    }
                    info!(file = %file.name, bytes = delivered.bytes, "Transferred");
                    return Ok(FileOutcome::Delivered {
                        files: delivered.files,
                        bytes: delivered.bytes,
                    });
                }
                Err(e) if e.is_directory() => return Ok(FileOutcome::Directory),
                Err(EngineError::Store(e)) => return Err(EngineError::Store(e)),
                Err(e) => {
                    warn!(
                        file = %file.name,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transfer attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_delay(attempt)).await;
                    }
                }
            }
        }

        written.insert(destination_path.clone());
        for path in &written {
            if let Err(e) = ctx.destination.delete_file(path).await {
                debug!(
                    path = %redact_path(path),
                    error = %e,
                    "No partial destination file removed"
                );
            }
        }
        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "transfer failed".to_string());
        self.store
            .append_log(&NewTransferLog::failure(
                ctx.run_id,
                &file.name,
                &file.path,
                &destination_path,
                file.size,
                message,
            ))
            .await?;
        Ok(FileOutcome::Failed)
    }

    async fn attempt(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
        destination_path: &str,
        written: &mut BTreeSet<String>,
    ) -> Result<Delivered, EngineError> {
        let delivered = if ctx.selection.will_extract(file) {
            self.transfer_archive(ctx, file, destination_path, written).await?
        } else {
            self.transfer_stream(ctx, file, destination_path).await?
        };
        self.apply_post_action(ctx, file).await?;
        Ok(delivered)
    }

    fn verify_poll(&self, destination: &dyn StorageProvider) -> PollConfig {
        if destination.listing_lags() {
            self.config.verify_lagging
        } else {
            self.config.verify
        }
    }

    async fn clear_destination(&self, ctx: &RunContext<'_>, name: &str, path: &str) {
        if !ctx.destination_has(name) {
            return;
        }
        if let Err(e) = ctx.destination.delete_file(path).await {
            debug!(file = %name, error = %e, "Could not remove existing destination file");
        }
    }

    async fn transfer_stream(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
        destination_path: &str,
    ) -> Result<Delivered, EngineError> {
        self.clear_destination(ctx, &file.name, destination_path)
            .await;

        let download = ctx.source.download_file(&file.path, Some(file.size)).await?;
        let flusher = ProgressFlusher::start(
            self.store.clone(),
            ctx.run_id,
            self.config.progress_flush_interval(),
        );
        let reader = CountingReader::new(download, flusher.counter());
        let upload = ctx
            .destination
            .upload_file(Box::pin(reader), destination_path, Some(file.size))
            .await;
        let transferred = flusher.finish().await;
        upload?;

        if transferred != file.size {
            return Err(EngineError::ByteCountMismatch {
                file: file.name.clone(),
                expected: file.size,
                actual: transferred,
            });
        }

        verify::verify_size(
            ctx.destination,
            &ctx.job.destination_path,
            &file.name,
            file.size,
            self.verify_poll(ctx.destination),
        )
        .await?;

        Ok(Delivered {
            logs: vec![NewTransferLog::success(
                ctx.run_id,
                &file.name,
                &file.path,
                destination_path,
                transferred,
            )],
            files: 1,
            bytes: transferred,
        })
    }

    /// Extracted entry paths go into `written` before their upload starts.
    async fn transfer_archive(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
        destination_path: &str,
        written: &mut BTreeSet<String>,
    ) -> Result<Delivered, EngineError> {
        let download = ctx.source.download_file(&file.path, Some(file.size)).await?;
        let flusher = ProgressFlusher::start(
            self.store.clone(),
            ctx.run_id,
            self.config.progress_flush_interval(),
        );
        let mut reader = CountingReader::new(download, flusher.counter());
        let mut buffer = Vec::with_capacity(file.size.min(64 * 1024 * 1024) as usize);
        let read = reader.read_to_end(&mut buffer).await;
        flusher.finish().await;
        read.map_err(|e| ProviderError::io(&file.path, e))?;

        if buffer.len() as u64 != file.size {
            return Err(EngineError::ByteCountMismatch {
                file: file.name.clone(),
                expected: file.size,
                actual: buffer.len() as u64,
            });
        }

        match archive::extract(&file.name, &buffer) {
            Ok(Some(entries)) if !entries.is_empty() => {
                debug!(file = %file.name, entries = entries.len(), "Archive extracted");
                self.upload_entries(ctx, file, entries, written).await
            }
            Ok(_) => {
                debug!(file = %file.name, "Archive has no entries; uploading as-is");
                self.upload_buffered(ctx, file, destination_path, buffer)
                    .await
            }
            Err(e) => {
                warn!(file = %file.name, error = %e, "Archive extraction failed; uploading as-is");
                self.upload_buffered(ctx, file, destination_path, buffer)
                    .await
            }
        }
    }

    async fn upload_entries(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
        entries: Vec<ArchiveEntry>,
        written: &mut BTreeSet<String>,
    ) -> Result<Delivered, EngineError> {
        let poll = self.verify_poll(ctx.destination);
        let mut delivered = Delivered {
            logs: Vec::new(),
            files: 0,
            bytes: 0,
        };

        for entry in entries {
            if ctx.destination_has(&entry.name) {
                debug!(archive = %file.name, entry = %entry.name, "Entry already at destination");
                continue;
            }
            let entry_path = join_path(&ctx.job.destination_path, &entry.name);
            written.insert(entry_path.clone());
            let size = entry.size();
            let uploaded = ctx
                .destination
                .upload_file(Box::pin(Cursor::new(entry.data)), &entry_path, Some(size))
                .await?;
            if uploaded != size {
                return Err(EngineError::ByteCountMismatch {
                    file: entry.name,
                    expected: size,
                    actual: uploaded,
                });
            }
            verify::verify_size(
                ctx.destination,
                &ctx.job.destination_path,
                &entry.name,
                size,
                poll,
            )
            .await?;

            delivered.logs.push(NewTransferLog::success(
                ctx.run_id,
                &entry.name,
                &file.path,
                &entry_path,
                size,
            ));
            delivered.files += 1;
            delivered.bytes += size;
        }
        Ok(delivered)
    }

    async fn upload_buffered(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
        destination_path: &str,
        buffer: Vec<u8>,
    ) -> Result<Delivered, EngineError> {
        self.clear_destination(ctx, &file.name, destination_path)
            .await;
        let size = buffer.len() as u64;
        let written = ctx
            .destination
            .upload_file(Box::pin(Cursor::new(buffer)), destination_path, Some(size))
            .await?;
        if written != size {
            return Err(EngineError::ByteCountMismatch {
                file: file.name.clone(),
                expected: size,
                actual: written,
            });
        }
        verify::verify_size(
            ctx.destination,
            &ctx.job.destination_path,
            &file.name,
            size,
            self.verify_poll(ctx.destination),
        )
        .await?;

        Ok(Delivered {
            logs: vec![NewTransferLog::success(
                ctx.run_id,
                &file.name,
                &file.path,
                destination_path,
                size,
            )],
            files: 1,
            bytes: size,
        })
    }

    /// Errors from the delete or move call are logged only. A delete that
    /// the source listing never confirms fails the attempt.
    async fn apply_post_action(
        &self,
        ctx: &RunContext<'_>,
        file: &FileInfo,
    ) -> Result<(), EngineError> {
        match ctx.job.post_transfer_action {
            PostTransferAction::Retain => Ok(()),
            PostTransferAction::Delete => {
                if let Err(e) = ctx.source.delete_file(&file.path).await {
                    warn!(file = %file.name, error = %e, "Failed to delete source file");
                    return Ok(());
                }
                let gone = verify::confirm_deleted(
                    ctx.source,
                    &ctx.job.source_path,
                    &file.name,
                    self.config.delete_confirm,
                )
                .await?;
                if !gone {
                    return Err(EngineError::DeleteNotConfirmed {
                        file: file.name.clone(),
                    });
                }
                debug!(file = %file.name, "Source file deleted");
                Ok(())
            }
            PostTransferAction::Move => {
                let Some(target_dir) = ctx.job.move_target() else {
                    warn!(file = %file.name, "Move action without a move path; source retained");
                    return Ok(());
                };
                if let Err(e) = ctx.source.create_directory(target_dir).await {
                    warn!(error = %e, "Failed to create move directory");
                }
                let target = join_path(target_dir, &file.name);
                match ctx.source.move_file(&file.path, &target).await {
                    Ok(()) => debug!(
                        file = %file.name,
                        target = %hash_path(&target),
                        "Source file moved"
                    ),
                    Err(e) => warn!(file = %file.name, error = %e, "Failed to move source file"),
                }
                Ok(())
            }
        }
    }
}

/// A destination directory that does not exist yet indexes as empty.
pub(super) async fn load_destination_index(
    destination: &dyn StorageProvider,
    path: &str,
) -> Result<DestinationIndex, EngineError> {
    match destination.list_files(path, None).await {
        Ok(listing) => Ok(DestinationIndex::from_listing(listing)),
        Err(e) if e.is_not_found() => {
            debug!(path = %redact_path(path), "Destination directory missing; empty index");
            Ok(DestinationIndex::default())
        }
        Err(e) => Err(e.into()),
    }
}
