//! Jiadan humor-picture feed: on-demand fetches and scheduled delivery.

pub mod feed;
pub mod sync;

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    clap::Parser,
    parley_channels::{CommandOutcome, NormalizedMessage, parse_command},
    parley_cron::{CronParams, JobCallback, SPEC_PARAM, job_callback, validate_cron_interval},
    tracing::{error, info, warn},
};

pub use {
    feed::{FeedSource, JandanFeed},
    sync::JiadanSync,
};

use crate::{Middleware, MiddlewareContext, Result};

/// Cron job names are `jiadan:<target>`.
pub const JOB_PREFIX: &str = "jiadan:";

/// Fetch the newest jiadan pictures
#[derive(Debug, Parser)]
struct FetchArgs {
    /// Number of posts to send
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=20))]
    top: u32,
}

/// Turn scheduled jiadan delivery for this chat on or off
#[derive(Debug, Parser)]
struct SyncArgs {
    /// Turn delivery off
    #[arg(long)]
    off: bool,
    /// Cron expression [default: jiadan.sync_cron]
    #[arg(long)]
    cron: Option<String>,
    /// Posts per run [default: jiadan.max_sync_count]
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    top: Option<u32>,
}

pub struct JiadanMiddleware {
    sync: Arc<JiadanSync>,
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    match JandanFeed::new() {
        Ok(feed) => Some(Box::new(JiadanMiddleware::new(
            Arc::clone(ctx),
            Arc::new(feed),
        ))),
        Err(e) => {
            error!(error = %e, "jiadan feed unavailable, middleware disabled");
            None
        },
    }
}

fn job_name(target: &str) -> String {
    format!("{JOB_PREFIX}{target}")
}

impl JiadanMiddleware {
    pub fn new(ctx: Arc<MiddlewareContext>, feed: Arc<dyn FeedSource>) -> Self {
        Self {
            sync: Arc::new(JiadanSync::new(ctx, feed)),
        }
    }

    fn ctx(&self) -> &Arc<MiddlewareContext> {
        &self.sync.ctx
    }

    fn callback(&self) -> JobCallback {
        let sync = Arc::clone(&self.sync);
        job_callback(move |params| {
            let sync = Arc::clone(&sync);
            async move { sync.run_scheduled(params).await }
        })
    }

    fn fetch(&self, msg: &NormalizedMessage, args: FetchArgs) {
        let sync = Arc::clone(&self.sync);
        let target = msg.target().to_string();
        self.ctx()
            .spawn(async move { sync.deliver(&target, args.top as usize).await });
    }

    async fn toggle_sync(&self, msg: &NormalizedMessage, args: SyncArgs) -> String {
        let ctx = self.ctx();
        if !ctx.access.is_admin(&msg.user_id) {
            return "only the admin can change jiadan sync".into();
        }
        let target = msg.target();
        let name = job_name(target);

        if args.off {
            return match ctx.cron.remove_cron_job(&name).await {
                Ok(()) => "jiadan sync disabled".into(),
                Err(e) => {
                    error!(target, error = %e, "failed to remove jiadan job");
                    "failed to disable jiadan sync".into()
                },
            };
        }

        let config = &ctx.config.jiadan;
        let spec = args.cron.unwrap_or_else(|| config.sync_cron.clone());
        let min_interval = Duration::from_secs(config.min_interval_mins * 60);
        if let Err(e) = validate_cron_interval(&spec, min_interval) {
            return e.to_string();
        }
        let top = args.top.unwrap_or(config.max_sync_count).max(1);
        let params = CronParams::from([
            (SPEC_PARAM.to_string(), spec.clone()),
            (sync::TARGET_PARAM.to_string(), target.to_string()),
            (sync::COUNT_PARAM.to_string(), top.to_string()),
        ]);
        match ctx.cron.add_cron_job(&name, self.callback(), params).await {
            Ok(()) => format!("jiadan sync enabled ({spec}, {top} per run)"),
            Err(e) => {
                error!(target, error = %e, "failed to add jiadan job");
                format!("failed to enable jiadan sync: {e}")
            },
        }
    }
}

#[async_trait]
impl Middleware for JiadanMiddleware {
    fn name(&self) -> &'static str {
        "jiadan"
    }

    /// Re-attach every persisted `jiadan:` job to its callback.
    async fn start(&self) -> Result<()> {
        let cron = &self.ctx().cron;
        for (name, params) in cron.persisted_jobs(JOB_PREFIX).await? {
            if params.get(sync::TARGET_PARAM).is_none_or(|t| t.is_empty()) {
                warn!(name, ?params, "skipping jiadan job without a target");
                continue;
            }
            match cron.add_cron_job(&name, self.callback(), params).await {
                Ok(()) => info!(name, "jiadan sync restored"),
                Err(e) => error!(name, error = %e, "failed to restore jiadan job"),
            }
        }
        Ok(())
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        let text = msg.text_content();
        if let Some(outcome) = parse_command::<FetchArgs>(text, "jiadan") {
            match outcome {
                CommandOutcome::Parsed(args) => self.fetch(msg, args),
                CommandOutcome::Reply(help) => self.ctx().reply(msg, help),
            }
            return Ok(true);
        }
        if let Some(outcome) = parse_command::<SyncArgs>(text, "jiadan-sync") {
            let reply = match outcome {
                CommandOutcome::Parsed(args) => self.toggle_sync(msg, args).await,
                CommandOutcome::Reply(help) => help,
            };
            self.ctx().reply(msg, reply);
            return Ok(true);
        }
        Ok(false)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::{
            sync::tests::{FakeFeed, page, post},
            *,
        },
        crate::testing::{ADMIN, RecordingClient, test_context},
        base64::{Engine as _, engine::general_purpose::STANDARD},
    };

    fn middleware(feed: FakeFeed) -> (Arc<RecordingClient>, Arc<MiddlewareContext>, JiadanMiddleware) {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mw = JiadanMiddleware::new(Arc::clone(&ctx), Arc::new(feed));
        (client, ctx, mw)
    }

    fn in_group(user: &str, text: &str) -> NormalizedMessage {
        NormalizedMessage::text("m1", user, text).in_group("g1@chatroom")
    }

    #[tokio::test]
    async fn enable_and_disable_sync() {
        let (client, ctx, mw) = middleware(FakeFeed::default());

        assert!(mw.on_message(&in_group(ADMIN, "#jiadan-sync --top 3")).await.unwrap());
        let params = ctx.cron.job_params("jiadan:g1@chatroom").await.unwrap();
        assert_eq!(params["spec"], "*/60 8-23 * * *");
        assert_eq!(params["target"], "g1@chatroom");
        assert_eq!(params["maxSyncCount"], "3");

        assert!(mw.on_message(&in_group(ADMIN, "#jiadan-sync --off")).await.unwrap());
        assert!(ctx.cron.task_entries().await.is_empty());
        assert!(ctx.cron.persisted_jobs(JOB_PREFIX).await.unwrap().is_empty());

        assert_eq!(client.wait_for_texts("g1@chatroom", 2).await, vec![
            "jiadan sync enabled (*/60 8-23 * * *, 3 per run)",
            "jiadan sync disabled",
        ]);
        ctx.cron.stop().await;
    }

    #[tokio::test]
    async fn too_frequent_schedule_is_rejected() {
        let (client, ctx, mw) = middleware(FakeFeed::default());
        mw.on_message(&in_group(ADMIN, "#jiadan-sync --cron '* * * * *'"))
            .await
            .unwrap();
        assert!(ctx.cron.task_entries().await.is_empty());
        let reply = client.wait_for_texts("g1@chatroom", 1).await.remove(0);
        assert!(reply.starts_with("cron interval too short"), "{reply}");
    }

    #[tokio::test]
    async fn only_admin_toggles_sync() {
        let (client, ctx, mw) = middleware(FakeFeed::default());
        assert!(mw.on_message(&in_group("u1", "#jiadan-sync")).await.unwrap());
        assert!(ctx.cron.task_entries().await.is_empty());
        assert_eq!(client.wait_for_texts("g1@chatroom", 1).await, vec![
            "only the admin can change jiadan sync"
        ]);
    }

    #[tokio::test]
    async fn start_restores_persisted_jobs() {
        let (_client, ctx, mw) = middleware(FakeFeed::default());
        let kv = Arc::clone(&ctx.kv);
        kv.set_map(
            "cron:job:jiadan:g1",
            &CronParams::from([
                ("spec".to_string(), "*/30 8-23 * * *".to_string()),
                ("target".to_string(), "g1".to_string()),
            ]),
        )
        .await
        .unwrap();
        kv.set_map(
            "cron:job:jiadan:broken",
            &CronParams::from([("spec".to_string(), "0 9 * * *".to_string())]),
        )
        .await
        .unwrap();

        mw.start().await.unwrap();
        let entries = ctx.cron.task_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "jiadan:g1");
        assert!(entries[0].next.is_some());
        ctx.cron.stop().await;
    }

    #[tokio::test]
    async fn fetch_sends_images_in_background() {
        let feed = FakeFeed {
            pages: vec![page(1, 1, vec![
                post("2", "a", &["a.jpg"]),
                post("1", "b", &["b.jpg"]),
            ])],
            ..Default::default()
        };
        let (client, _ctx, mw) = middleware(feed);
        assert!(mw.on_message(&in_group("u1", "#jiadan --top 2")).await.unwrap());

        tokio::time::timeout(Duration::from_secs(5), async {
            while client.images_to("g1@chatroom").len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(client.images_to("g1@chatroom"), vec![
            STANDARD.encode("cdn/a.jpg"),
            STANDARD.encode("cdn/b.jpg"),
        ]);
    }

    #[tokio::test]
    async fn bad_arguments_get_help() {
        let (client, _ctx, mw) = middleware(FakeFeed::default());
        assert!(mw.on_message(&in_group("u1", "#jiadan --top 0")).await.unwrap());
        let reply = client.wait_for_texts("g1@chatroom", 1).await.remove(0);
        assert!(reply.contains("#jiadan -h"), "{reply}");
    }

    #[tokio::test]
    async fn unrelated_text_passes() {
        let (_client, _ctx, mw) = middleware(FakeFeed::default());
        assert!(!mw.on_message(&in_group("u1", "#jiadanx")).await.unwrap());
        assert!(!mw.on_message(&in_group("u1", "hello")).await.unwrap());
    }
}
