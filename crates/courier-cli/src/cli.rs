//! Command-line definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Runs and inspects unattended file transfer jobs.
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(version)]
pub struct Cli {
    /// Engine configuration file (JSON).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database holding connections, jobs and run history.
    #[arg(long, global = true, value_name = "PATH", env = "COURIER_DB")]
    pub db: Option<PathBuf>,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a job once.
    Run {
        /// Job id.
        job: String,
    },

    /// Preview what a run would transfer without changing anything.
    DryRun {
        /// Job id.
        job: String,
    },

    /// List jobs.
    Jobs {
        /// Only jobs with this status.
        #[arg(long, value_enum)]
        status: Option<JobStatusArg>,
    },

    /// Show the most recent runs of a job.
    Runs {
        /// Job id.
        job: String,

        #[arg(long, default_value_t = 20)]
        limit: u32,
    },

    /// Show per-file transfer logs of a run.
    Logs {
        /// Run id.
        run: String,
    },

    /// List a directory on a connection.
    Browse {
        /// Connection id or name.
        connection: String,

        /// Directory to list; defaults to the session's working directory.
        path: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum LogFormatArg {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum JobStatusArg {
    Active,
    Inactive,
    Running,
    Error,
}
