//! Bounded polling against provider listings.
//!
//! Some backends apply writes and deletes asynchronously, so a listing right
//! after the call may still show the old state. Each check retries a fixed
//! number of times with a linearly growing delay and then gives up.

use tracing::debug;

use super::EngineError;
use crate::config::PollConfig;
use crate::provider::{FileInfo, ProviderError, StorageProvider};

/// Re-lists `dir` until `done` accepts the listing or the attempts run out.
///
/// Listing errors count as "not yet"; the last one is returned when the
/// final attempt failed that way.
pub async fn poll_listing<F>(
    provider: &dyn StorageProvider,
    dir: &str,
    poll: PollConfig,
    mut done: F,
) -> Result<bool, ProviderError>
where
    F: FnMut(&[FileInfo]) -> bool,
{
    let mut last_error = None;
    for attempt in 1..=poll.attempts {
        match provider.list_files(dir, None).await {
            Ok(listing) => {
                if done(&listing) {
                    return Ok(true);
                }
                last_error = None;
            }
            Err(e) => {
                debug!(attempt, error = %e, "Listing failed while polling");
                last_error = Some(e);
            }
        }
        if attempt < poll.attempts {
            tokio::time::sleep(poll.delay(attempt)).await;
        }
    }
    match last_error {
        Some(e) => Err(e),
        None => Ok(false),
    }
}

fn find<'a>(listing: &'a [FileInfo], name: &str) -> Option<&'a FileInfo> {
    listing.iter().find(|f| !f.is_directory && f.name == name)
}

/// Waits until `dir` lists `name` with exactly `expected` bytes.
pub async fn verify_size(
    provider: &dyn StorageProvider,
    dir: &str,
    name: &str,
    expected: u64,
    poll: PollConfig,
) -> Result<(), EngineError> {
    let mut observed: Option<u64> = None;
    let confirmed = poll_listing(provider, dir, poll, |listing| {
        observed = find(listing, name).map(|f| f.size);
        observed == Some(expected)
    })
    .await?;

    if confirmed {
        return Ok(());
    }
    let reason = match observed {
        Some(size) => format!("destination shows {} bytes, expected {}", size, expected),
        None => "file not listed at destination".to_string(),
    };
    Err(EngineError::VerificationFailed {
        file: name.to_string(),
        reason,
    })
}

/// Waits until `dir` no longer lists `name`.
pub async fn confirm_deleted(
    provider: &dyn StorageProvider,
    dir: &str,
    name: &str,
    poll: PollConfig,
) -> Result<bool, ProviderError> {
    poll_listing(provider, dir, poll, |listing| find(listing, name).is_none()).await
}
