#![forbid(unsafe_code)]
//! Job status tracking for import runs.
//!
//! The scheduling wrapper that queues imports lives outside this crate; the
//! pipeline only consumes its narrow status surface: a status value, two
//! monotonically increasing counters, and start/end timestamps. [`JobLog`]
//! persists that surface to SQLite, and importers report through the
//! [`StatusSink`] trait so they never touch the job record directly.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::warn;
use rusqlite::{Connection, Error as SqliteError, OptionalExtension, params};
use thiserror::Error;

/// Lifecycle of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued by the scheduler, not yet claimed.
    Pending,
    /// Claimed by a running import.
    InProgress,
    /// Completed successfully.
    Finalized,
    /// Aborted by an escaping error.
    Error,
}

impl JobStatus {
    /// Stable discriminator stored in the `status` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Finalized => "finalized",
            Self::Error => "error",
        }
    }

    fn parse(value: &str) -> Result<Self, JobError> {
        match value {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "finalized" => Ok(Self::Finalized),
            "error" => Ok(Self::Error),
            other => Err(JobError::UnknownStatus {
                value: other.to_owned(),
            }),
        }
    }
}

/// Checkpoint interface the importers report progress through.
///
/// Implementations persist eagerly where durability matters; failures to
/// persist a checkpoint must not abort the surrounding import, so the
/// methods are infallible from the caller's point of view.
pub trait StatusSink {
    /// Flush a batch of successfully processed rows into the job counters.
    fn checkpoint(&mut self, affected_rows: u64);

    /// Count one skipped record.
    fn record_error(&mut self);
}

/// Errors raised when claiming or updating a job record.
#[derive(Debug, Error)]
pub enum JobError {
    /// Opening or preparing the job table failed.
    #[error("failed to initialise job log at {path:?}")]
    Initialise {
        /// Database path holding the job table.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// A status or counter update failed.
    #[error("failed to {operation}")]
    Update {
        /// Description of the failing update.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// The system clock reported a time before the Unix epoch.
    #[error("system clock is before the Unix epoch")]
    Clock {
        /// Underlying clock error.
        #[source]
        source: std::time::SystemTimeError,
    },
    /// The job row carries a status value this build does not know.
    #[error("unknown job status {value:?}")]
    UnknownStatus {
        /// The unrecognised status text.
        value: String,
    },
}

/// SQLite-backed implementation of the job status surface.
#[derive(Debug)]
pub struct JobLog {
    connection: Connection,
    job_id: i64,
    affected_rows: u64,
    error_rows: u64,
}

impl JobLog {
    /// Claim the oldest pending job at the supplied database path, creating
    /// one when the queue is empty, and transition it to in-progress with a
    /// start timestamp.
    pub fn claim(path: &Path) -> Result<Self, JobError> {
        let connection = Connection::open(path).map_err(|source| JobError::Initialise {
            path: path.to_path_buf(),
            source,
        })?;
        connection
            .execute(
                "CREATE TABLE IF NOT EXISTS import_jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    status TEXT NOT NULL,
                    affected_rows INTEGER NOT NULL DEFAULT 0,
                    error_rows INTEGER NOT NULL DEFAULT 0,
                    started_at INTEGER,
                    finished_at INTEGER
                )",
                [],
            )
            .map_err(|source| JobError::Initialise {
                path: path.to_path_buf(),
                source,
            })?;

        let pending: Option<i64> = connection
            .query_row(
                "SELECT id FROM import_jobs WHERE status = 'pending' ORDER BY id LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|source| JobError::Update {
                operation: "find pending job",
                source,
            })?;

        let job_id = match pending {
            Some(id) => id,
            None => {
                connection
                    .execute(
                        "INSERT INTO import_jobs (status) VALUES ('pending')",
                        [],
                    )
                    .map_err(|source| JobError::Update {
                        operation: "queue job",
                        source,
                    })?;
                connection.last_insert_rowid()
            }
        };

        connection
            .execute(
                "UPDATE import_jobs SET status = ?2, started_at = ?3,
                    affected_rows = 0, error_rows = 0 WHERE id = ?1",
                params![job_id, JobStatus::InProgress.as_str(), unix_now()?],
            )
            .map_err(|source| JobError::Update {
                operation: "claim job",
                source,
            })?;

        Ok(Self {
            connection,
            job_id,
            affected_rows: 0,
            error_rows: 0,
        })
    }

    /// Stamp the final status and end timestamp on the job row.
    pub fn finish(&self, status: JobStatus) -> Result<(), JobError> {
        self.connection
            .execute(
                "UPDATE import_jobs SET status = ?2, finished_at = ?3 WHERE id = ?1",
                params![self.job_id, status.as_str(), unix_now()?],
            )
            .map(|_| ())
            .map_err(|source| JobError::Update {
                operation: "finish job",
                source,
            })
    }

    /// Current status of the claimed job row.
    pub fn status(&self) -> Result<JobStatus, JobError> {
        let value: String = self
            .connection
            .query_row(
                "SELECT status FROM import_jobs WHERE id = ?1",
                [self.job_id],
                |row| row.get(0),
            )
            .map_err(|source| JobError::Update {
                operation: "read job status",
                source,
            })?;
        JobStatus::parse(&value)
    }

    /// Accumulated `(affected_rows, error_rows)` counters.
    #[must_use]
    pub const fn counters(&self) -> (u64, u64) {
        (self.affected_rows, self.error_rows)
    }

    fn persist_counters(&self) -> Result<(), JobError> {
        let affected = i64::try_from(self.affected_rows).unwrap_or(i64::MAX);
        let errors = i64::try_from(self.error_rows).unwrap_or(i64::MAX);
        self.connection
            .execute(
                "UPDATE import_jobs SET affected_rows = ?2, error_rows = ?3 WHERE id = ?1",
                params![self.job_id, affected, errors],
            )
            .map(|_| ())
            .map_err(|source| JobError::Update {
                operation: "persist job counters",
                source,
            })
    }
}

impl StatusSink for JobLog {
    fn checkpoint(&mut self, affected_rows: u64) {
        self.affected_rows += affected_rows;
        if let Err(error) = self.persist_counters() {
            warn!("failed to persist job checkpoint: {error}");
        }
    }

    fn record_error(&mut self) {
        self.error_rows += 1;
        if let Err(error) = self.persist_counters() {
            warn!("failed to persist job error count: {error}");
        }
    }
}

fn unix_now() -> Result<i64, JobError> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|source| JobError::Clock { source })?;
    Ok(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory stand-in for the job status surface.

    use super::StatusSink;

    /// Records every checkpoint without persisting anything.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub(crate) checkpoints: Vec<u64>,
        pub(crate) errors: u64,
    }

    impl StatusSink for RecordingSink {
        fn checkpoint(&mut self, affected_rows: u64) {
            self.checkpoints.push(affected_rows);
        }

        fn record_error(&mut self) {
            self.errors += 1;
        }
    }
}
