//! Read-only preview of what a run would transfer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info_span, Instrument};

use super::runner::load_destination_index;
use super::selection::{DestinationIndex, Selection, SkipReason};
use super::{EngineError, TransferEngine};
use crate::model::Job;
use crate::provider::{FileInfo, StorageProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunEntry {
    pub name: String,
    pub path: String,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub would_skip: bool,
    pub skip_reason: Option<SkipReason>,
    pub would_extract: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub move_destination: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    pub files: Vec<DryRunEntry>,
    pub total_in_source: u64,
    pub total_matched: u64,
    pub would_transfer: u64,
    pub skipped_by_filter: u64,
    pub skipped_by_exists: u64,
    pub skipped_by_delta: u64,
}

impl DryRunResult {
    /// Every listed file is counted exactly once.
    pub fn is_partitioned(&self) -> bool {
        self.would_transfer + self.skipped_by_filter + self.skipped_by_exists + self.skipped_by_delta
            == self.total_in_source
    }
}

/// Classifies an unfiltered source listing the way a run would.
pub fn plan(
    selection: &Selection<'_>,
    listing: Vec<FileInfo>,
    index: Option<&DestinationIndex>,
) -> DryRunResult {
    let mut result = DryRunResult::default();

    for file in listing {
        if selection.is_excluded(&file) {
            continue;
        }
        result.total_in_source += 1;

        let skip_reason = if selection.matches_filter(&file) {
            result.total_matched += 1;
            selection.destination_skip(&file, index)
        } else {
            Some(SkipReason::Filter)
        };

        match skip_reason {
            Some(SkipReason::Filter) => result.skipped_by_filter += 1,
            Some(SkipReason::Exists) => result.skipped_by_exists += 1,
            Some(SkipReason::Delta) => result.skipped_by_delta += 1,
            None => result.would_transfer += 1,
        }

        let would_skip = skip_reason.is_some();
        result.files.push(DryRunEntry {
            would_extract: !would_skip && selection.will_extract(&file),
            move_destination: if would_skip {
                None
            } else {
                selection.move_destination(&file)
            },
            name: file.name,
            path: file.path,
            size: file.size,
            modified_at: file.modified_at,
            would_skip,
            skip_reason,
        });
    }
    result
}

impl TransferEngine {
    /// Lists both ends and reports per-file decisions without writing
    /// anything: no run, no logs, no job status change.
    pub async fn dry_run_job(&self, job_id: &str) -> Result<DryRunResult, EngineError> {
        let job = self
            .store
            .find_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let source_conn = self.load_connection(&job.source_connection_id).await?;
        let destination_conn = self
            .load_connection(&job.destination_connection_id)
            .await?;

        let selection = Selection::new(&job)?;
        let mut source = self.providers.create(&source_conn)?;
        let mut destination = self.providers.create(&destination_conn)?;

        let span = info_span!("dry_run", job_id = %job.id);
        let result = preview(&job, &selection, source.as_mut(), destination.as_mut())
            .instrument(span)
            .await;

        if let Err(e) = source.disconnect().await {
            debug!(error = %e, "Source disconnect failed");
        }
        if let Err(e) = destination.disconnect().await {
            debug!(error = %e, "Destination disconnect failed");
        }
        result
    }
}

async fn preview(
    job: &Job,
    selection: &Selection<'_>,
    source: &mut dyn StorageProvider,
    destination: &mut dyn StorageProvider,
) -> Result<DryRunResult, EngineError> {
    source.connect().await?;
    let listing = source.list_files(&job.source_path, None).await?;

    let index = if job.needs_destination_index() {
        destination.connect().await?;
        Some(load_destination_index(&*destination, &job.destination_path).await?)
    } else {
        None
    };

    let result = plan(selection, listing, index.as_ref());
    debug!(
        total = result.total_in_source,
        would_transfer = result.would_transfer,
        "Dry run planned"
    );
    Ok(result)
}
