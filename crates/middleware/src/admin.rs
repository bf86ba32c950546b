use std::{fmt::Write as _, sync::Arc};

use {
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    clap::Parser,
    parley_channels::{CommandOutcome, NormalizedMessage, parse_command},
    tracing::warn,
};

use crate::{Middleware, MiddlewareContext, Result};

/// Inspect scheduled tasks and access assignments
#[derive(Debug, Parser)]
struct AdminArgs {
    /// Topic: cron or access
    #[arg(short = 's')]
    topic: Option<String>,
    /// With `-s cron`, run this job once now
    #[arg(long)]
    run: Option<String>,
}

/// `#admin -s cron|access`, admin only.
pub struct AdminMiddleware {
    ctx: Arc<MiddlewareContext>,
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    Some(Box::new(AdminMiddleware {
        ctx: Arc::clone(ctx),
    }))
}

fn format_time(time: Option<DateTime<Utc>>, tz: Tz) -> String {
    time.map_or_else(
        || "-".to_string(),
        |t| t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

async fn cron_report(ctx: &MiddlewareContext) -> String {
    let tasks = ctx.cron.task_entries().await;
    if tasks.is_empty() {
        return "no scheduled tasks".into();
    }
    let ids: Vec<String> = tasks.iter().map(|t| t.target.clone()).collect();
    let names = ctx.nicknames(&ids).await;
    let tz = ctx.cron.timezone();

    let mut text = String::with_capacity(tasks.len() * 100);
    for task in &tasks {
        let nickname = names.get(&task.target).map_or(task.target.as_str(), String::as_str);
        let _ = writeln!(text, "📌 {} | {nickname}({})", task.kind, task.target);
        let _ = writeln!(text, "spec: {}", task.spec);
        let _ = writeln!(text, "last run: {}", format_time(task.prev, tz));
        let _ = writeln!(text, "next run: {}", format_time(task.next, tz));
        text.push('\n');
    }
    text.trim_end().to_string()
}

async fn run_job(ctx: &MiddlewareContext, name: &str) -> String {
    match ctx.cron.run_now(name).await {
        Ok(()) => format!("started {name}"),
        Err(e) => e.to_string(),
    }
}

async fn access_report(ctx: &MiddlewareContext) -> String {
    let entries = match ctx.access.list_all().await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "failed to list access entries");
            return "failed to list access entries".into();
        },
    };
    if entries.is_empty() {
        return "no access assignments".into();
    }
    let ids: Vec<String> = entries.iter().map(|e| e.target.clone()).collect();
    let names = ctx.nicknames(&ids).await;

    let mut text = String::with_capacity(entries.len() * 32);
    for entry in &entries {
        let label = match names.get(&entry.target) {
            Some(nickname) => format!("{nickname}({})", entry.target),
            None => entry.target.clone(),
        };
        let _ = writeln!(text, "🔑 {label}: {}", entry.access);
    }
    text.trim_end().to_string()
}

async fn answer(ctx: &MiddlewareContext, args: AdminArgs) -> String {
    match (args.topic.as_deref(), args.run) {
        (Some("cron"), Some(name)) => run_job(ctx, &name).await,
        (Some("cron"), None) => cron_report(ctx).await,
        (Some("access"), _) => access_report(ctx).await,
        _ => "unknown topic, use -s cron or -s access".into(),
    }
}

#[async_trait]
impl Middleware for AdminMiddleware {
    fn name(&self) -> &'static str {
        "admin"
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        if !self.ctx.access.is_admin(&msg.user_id) {
            return Ok(false);
        }
        let args = match parse_command::<AdminArgs>(msg.text_content(), "admin") {
            None => return Ok(false),
            Some(CommandOutcome::Reply(text)) => {
                self.ctx.reply(msg, text);
                return Ok(true);
            },
            Some(CommandOutcome::Parsed(args)) => args,
        };
        // Reports look up nicknames remotely; answer off the dispatch loop.
        let ctx = Arc::clone(&self.ctx);
        let target = msg.target().to_string();
        self.ctx.spawn(async move {
            let reply = answer(&ctx, args).await;
            ctx.send_text(&target, &reply).await;
        });
        Ok(true)
    }
}
