use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] parley_store::Error),

    #[error(transparent)]
    CronParse(#[from] cron::error::Error),

    #[error("cron job {name}: spec is required")]
    MissingSpec { name: String },

    #[error("invalid cron expression '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("cron interval too short: {interval:?} between runs, minimum is {min:?}")]
    IntervalTooShort { interval: Duration, min: Duration },

    #[error("job not found: {name}")]
    JobNotFound { name: String },

    #[error("scheduler stopped")]
    Stopped,
}

impl Error {
    #[must_use]
    pub fn invalid_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn job_not_found(name: impl Into<String>) -> Self {
        Self::JobNotFound { name: name.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
