//! Job parameters, callbacks and introspection records.

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};

/// Parameters persisted with a job. `spec` is required; everything else is
/// up to the job kind (for example `target` and `maxSyncCount`).
pub type CronParams = BTreeMap<String, String>;

/// Callback invoked on every run with the job's parameters.
pub type JobCallback =
    Arc<dyn Fn(CronParams) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Wrap an async closure as a [`JobCallback`].
pub fn job_callback<F, Fut>(f: F) -> JobCallback
where
    F: Fn(CronParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

/// Parameter key holding the cron expression.
pub const SPEC_PARAM: &str = "spec";

/// A registered job as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub name: String,
    /// Job name up to the last `:`.
    pub kind: String,
    /// Job name after the last `:`.
    pub target: String,
    pub spec: String,
    pub prev: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

impl TaskEntry {
    /// Split `kind:target` on the last colon. A name without a colon is
    /// all kind and no target.
    pub fn split_name(name: &str) -> (&str, &str) {
        name.rsplit_once(':').unwrap_or((name, ""))
    }
}
