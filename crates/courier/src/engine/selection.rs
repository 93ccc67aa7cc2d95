//! File selection rules shared by real runs and dry runs.
//!
//! Both paths go through [`Selection`] so a dry run reports exactly what a
//! real run would do against the same listings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive;
use crate::filter::{FilterError, GlobFilter};
use crate::model::Job;
use crate::provider::{join_path, path_segments, FileInfo};

/// Why a source file is not transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReason {
    Filter,
    Exists,
    Delta,
}

/// Destination file names with their modification times.
#[derive(Debug, Clone, Default)]
pub struct DestinationIndex {
    files: HashMap<String, Option<DateTime<Utc>>>,
}

impl DestinationIndex {
    pub fn from_listing(listing: Vec<FileInfo>) -> Self {
        let files = listing
            .into_iter()
            .filter(|f| !f.is_directory)
            .map(|f| (f.name, f.modified_at))
            .collect();
        Self { files }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn modified_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.files.get(name).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

pub struct Selection<'a> {
    job: &'a Job,
    filter: GlobFilter,
    excluded_folder: Option<String>,
}

impl<'a> Selection<'a> {
    pub fn new(job: &'a Job) -> Result<Self, FilterError> {
        Ok(Self {
            job,
            filter: GlobFilter::new(&job.file_filter)?,
            excluded_folder: job
                .move_target()
                .and_then(|target| move_folder_name(&job.source_path, target)),
        })
    }

    pub fn filter(&self) -> &GlobFilter {
        &self.filter
    }

    /// First component of the move target when it lies inside the source path.
    pub fn excluded_folder(&self) -> Option<&str> {
        self.excluded_folder.as_deref()
    }

    /// Hidden files (when skipped) and the move folder never enter a run.
    pub fn is_excluded(&self, file: &FileInfo) -> bool {
        if self.job.skip_hidden_files && file.name.starts_with('.') {
            return true;
        }
        self.excluded_folder.as_deref() == Some(file.name.as_str())
    }

    pub fn matches_filter(&self, file: &FileInfo) -> bool {
        self.filter.matches(&file.name)
    }

    pub fn will_extract(&self, file: &FileInfo) -> bool {
        self.job.extract_archives && archive::is_archive(&file.name)
    }

    /// Exists and delta checks against the destination listing.
    ///
    /// Archives that will be extracted are exempt from the delta check since
    /// their entries, not the archive itself, land in the destination.
    pub fn destination_skip(
        &self,
        file: &FileInfo,
        index: Option<&DestinationIndex>,
    ) -> Option<SkipReason> {
        let index = index?;
        if self.job.delta_sync {
            if self.will_extract(file) {
                return None;
            }
            let dest_modified = index.modified_at(&file.name)?;
            let src_modified = file.modified_at?;
            return (dest_modified >= src_modified).then_some(SkipReason::Delta);
        }
        if !self.job.overwrite_existing && index.contains(&file.name) {
            return Some(SkipReason::Exists);
        }
        None
    }

    /// Where the source file ends up after a `move` post-transfer action.
    pub fn move_destination(&self, file: &FileInfo) -> Option<String> {
        self.job
            .move_target()
            .map(|target| join_path(target, &file.name))
    }
}

fn move_folder_name(source_path: &str, move_path: &str) -> Option<String> {
    let source: Vec<&str> = path_segments(source_path).collect();
    let target: Vec<&str> = path_segments(move_path).collect();
    if target.len() <= source.len() || target[..source.len()] != source[..] {
        return None;
    }
    Some(target[source.len()].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobStatus, PostTransferAction};
    use chrono::TimeZone;

    fn job() -> Job {
        Job {
            id: "j".into(),
            name: "job".into(),
            source_connection_id: "src".into(),
            source_path: "/inbox".into(),
            destination_connection_id: "dst".into(),
            destination_path: "/outbox".into(),
            file_filter: String::new(),
            post_transfer_action: PostTransferAction::Retain,
            move_path: None,
            overwrite_existing: false,
            skip_hidden_files: false,
            extract_archives: false,
            delta_sync: false,
            status: JobStatus::Active,
        }
    }

    fn at(hour: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap())
    }

    fn file(name: &str, modified_at: Option<DateTime<Utc>>) -> FileInfo {
        FileInfo::file("/inbox", name, 10, modified_at)
    }

    fn index(entries: &[(&str, Option<DateTime<Utc>>)]) -> DestinationIndex {
        DestinationIndex::from_listing(
            entries
                .iter()
                .map(|(name, m)| FileInfo::file("/outbox", name, 10, *m))
                .collect(),
        )
    }

    #[test]
    fn test_move_folder_name() {
        assert_eq!(
            move_folder_name("/inbox", "/inbox/processed/2024"),
            Some("processed".to_string())
        );
        assert_eq!(
            move_folder_name("inbox/", "/inbox/done"),
            Some("done".to_string())
        );
        assert_eq!(move_folder_name("/inbox", "/archive"), None);
        assert_eq!(move_folder_name("/inbox", "/inbox"), None);
        assert_eq!(move_folder_name("/in", "/inbox/done"), None);
    }

    #[test]
    fn test_excludes_hidden_and_move_folder() {
        let mut job = job();
        job.skip_hidden_files = true;
        job.post_transfer_action = PostTransferAction::Move;
        job.move_path = Some("/inbox/processed".into());
        let selection = Selection::new(&job).unwrap();

        assert_eq!(selection.excluded_folder(), Some("processed"));
        assert!(selection.is_excluded(&file(".hidden", None)));
        assert!(selection.is_excluded(&FileInfo::directory("/inbox", "processed", None)));
        assert!(!selection.is_excluded(&file("a.csv", None)));
    }

    #[test]
    fn test_hidden_files_kept_unless_skipped() {
        let job = job();
        let selection = Selection::new(&job).unwrap();
        assert!(!selection.is_excluded(&file(".hidden", None)));
    }

    #[test]
    fn test_exists_skip_only_without_overwrite_or_delta() {
        let mut job = job();
        let idx = index(&[("a.csv", at(1))]);
        let a = file("a.csv", at(2));

        assert_eq!(
            Selection::new(&job).unwrap().destination_skip(&a, Some(&idx)),
            Some(SkipReason::Exists)
        );

        job.overwrite_existing = true;
        assert_eq!(
            Selection::new(&job).unwrap().destination_skip(&a, Some(&idx)),
            None
        );
    }

    #[test]
    fn test_delta_skip_when_destination_not_older() {
        let mut job = job();
        job.delta_sync = true;
        let selection = Selection::new(&job).unwrap();
        let idx = index(&[("a.csv", at(5)), ("b.csv", at(1)), ("c.csv", None)]);

        assert_eq!(
            selection.destination_skip(&file("a.csv", at(5)), Some(&idx)),
            Some(SkipReason::Delta)
        );
        assert_eq!(
            selection.destination_skip(&file("b.csv", at(5)), Some(&idx)),
            None
        );
        // Unknown times on either side transfer.
        assert_eq!(
            selection.destination_skip(&file("c.csv", at(5)), Some(&idx)),
            None
        );
        assert_eq!(
            selection.destination_skip(&file("a.csv", None), Some(&idx)),
            None
        );
        assert_eq!(
            selection.destination_skip(&file("new.csv", at(5)), Some(&idx)),
            None
        );
    }

    #[test]
    fn test_extracted_archives_exempt_from_delta() {
        let mut job = job();
        job.delta_sync = true;
        job.extract_archives = true;
        let selection = Selection::new(&job).unwrap();
        let idx = index(&[("bundle.zip", at(9))]);
        let archive = file("bundle.zip", at(1));

        assert!(selection.will_extract(&archive));
        assert_eq!(selection.destination_skip(&archive, Some(&idx)), None);
    }

    #[test]
    fn test_no_index_means_no_destination_skip() {
        let job = job();
        let selection = Selection::new(&job).unwrap();
        assert_eq!(selection.destination_skip(&file("a.csv", None), None), None);
    }

    #[test]
    fn test_move_destination() {
        let mut job = job();
        let selection = Selection::new(&job).unwrap();
        assert_eq!(selection.move_destination(&file("a.csv", None)), None);

        job.post_transfer_action = PostTransferAction::Move;
        job.move_path = Some("/archive".into());
        let selection = Selection::new(&job).unwrap();
        assert_eq!(
            selection.move_destination(&file("a.csv", None)),
            Some("/archive/a.csv".to_string())
        );
    }

    #[test]
    fn test_index_ignores_directories() {
        let idx = DestinationIndex::from_listing(vec![
            FileInfo::directory("/outbox", "sub", None),
            FileInfo::file("/outbox", "a.csv", 1, None),
        ]);
        assert_eq!(idx.len(), 1);
        assert!(!idx.contains("sub"));
    }
}
