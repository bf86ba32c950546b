//! Persisted, named cron jobs.
//!
//! Job parameters live in the shared key-value store under
//! `cron:job:<name>`; callbacks are bound in memory and re-attached at
//! startup by scanning persisted names under a kind prefix.

pub mod error;
pub mod schedule;
pub mod service;
pub mod store;
pub mod types;

pub use {
    error::{Error, Result},
    schedule::{parse_schedule, validate_cron_interval},
    service::CronScheduler,
    store::{CronJobStore, KvCronStore},
    types::{CronParams, JobCallback, SPEC_PARAM, TaskEntry, job_callback},
};
