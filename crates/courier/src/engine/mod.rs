//! The transfer engine: one job run from listing to per-file logs, and the
//! dry-run planner that previews the same decisions.

mod dry_run;
mod error;
mod progress;
mod runner;
mod selection;
mod store;
mod verify;

pub use dry_run::{plan, DryRunEntry, DryRunResult};
pub use error::EngineError;
pub use progress::{CountingReader, ProgressFlusher};
pub use runner::{RunReport, TransferEngine};
pub use selection::{DestinationIndex, Selection, SkipReason};
pub use store::RunStore;
pub use verify::{confirm_deleted, poll_listing, verify_size};
