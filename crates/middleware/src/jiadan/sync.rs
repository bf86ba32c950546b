//! Unseen-post collection and delivery shared by the command and the cron job.

use std::{sync::Arc, time::Duration};

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    chrono::{NaiveDateTime, TimeZone, Utc},
    parley_cron::CronParams,
    tracing::{debug, error, info, warn},
};

use crate::{
    MiddlewareContext, Result,
    jiadan::feed::{FeedSource, Post},
};

/// Site account whose posts are announcements, not pictures.
const SKIPPED_AUTHOR: &str = "sein";
/// Visited markers live this long after the post date.
const VISITED_DAYS: i64 = 15;
const MIN_VISITED_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Upper bound on pages walked for one request.
const MAX_PAGES: u32 = 10;

pub const TARGET_PARAM: &str = "target";
pub const COUNT_PARAM: &str = "maxSyncCount";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// On demand: skip posts already shown and keep looking.
    Browse,
    /// Scheduled: everything after the first seen post was delivered before.
    Sync,
}

pub struct JiadanSync {
    pub(crate) ctx: Arc<MiddlewareContext>,
    feed: Arc<dyn FeedSource>,
}

fn visited_key(target: &str, post_id: &str) -> String {
    format!("jiadan:{target}:{post_id}")
}

fn is_gif(pic: &str) -> bool {
    pic.to_ascii_lowercase().ends_with(".gif")
}

impl JiadanSync {
    pub fn new(ctx: Arc<MiddlewareContext>, feed: Arc<dyn FeedSource>) -> Self {
        Self { ctx, feed }
    }

    /// Picture URLs of up to `top` unseen posts for `target`, newest first.
    ///
    /// Every post looked at is marked visited for `target`. If a later page
    /// fails, what was collected so far is returned.
    pub async fn collect(&self, target: &str, top: usize, mode: Mode) -> Result<Vec<String>> {
        let mut urls = Vec::new();
        let mut found = 0;
        let mut page = 0;

        for _ in 0..MAX_PAGES {
            let feed_page = match self.feed.page(page).await {
                Ok(feed_page) => feed_page,
                Err(e) if urls.is_empty() => return Err(e),
                Err(e) => {
                    warn!(target, page, error = %e, "feed page failed, returning partial result");
                    return Ok(urls);
                },
            };

            for post in &feed_page.comments {
                if post.author == SKIPPED_AUTHOR {
                    continue;
                }
                let key = visited_key(target, &post.id);
                if self.ctx.kv.exists(&key).await? {
                    if mode == Mode::Sync {
                        debug!(target, post = %post.id, "reached a delivered post");
                        return Ok(urls);
                    }
                    continue;
                }

                let pics: Vec<String> = post
                    .pics
                    .iter()
                    .filter(|pic| !is_gif(pic))
                    .map(|pic| self.feed.image_url(pic))
                    .collect();
                if !pics.is_empty() {
                    found += 1;
                    urls.extend(pics);
                }
                self.mark_visited(&key, post).await;
                if found >= top {
                    return Ok(urls);
                }
            }

            if feed_page.comments.is_empty() || feed_page.current_page >= feed_page.page_count {
                break;
            }
            page = feed_page.current_page + 1;
        }
        Ok(urls)
    }

    /// Download `urls` as base64. Failed downloads are logged and skipped.
    pub async fn download_all(&self, urls: &[String]) -> Vec<String> {
        let mut images = Vec::with_capacity(urls.len());
        for url in urls {
            match self.feed.download(url).await {
                Ok(bytes) => images.push(STANDARD.encode(bytes)),
                Err(e) => error!(url = %url, error = %e, "failed to download image"),
            }
        }
        images
    }

    /// Collect, download and send on demand, replying with a short notice
    /// when there is nothing to send.
    pub async fn deliver(&self, target: &str, top: usize) {
        let urls = match self.collect(target, top, Mode::Browse).await {
            Ok(urls) => urls,
            Err(e) => {
                error!(target, error = %e, "failed to fetch jiadan posts");
                self.ctx.send_text(target, "failed to fetch jiadan posts").await;
                return;
            },
        };
        if urls.is_empty() {
            self.ctx.send_text(target, "no new jiadan pictures").await;
            return;
        }
        let images = self.download_all(&urls).await;
        if images.is_empty() {
            self.ctx
                .send_text(target, "failed to download jiadan pictures")
                .await;
            return;
        }
        self.send_images(target, &images).await;
    }

    /// Cron callback. Stays quiet when nothing is new.
    pub async fn run_scheduled(&self, params: CronParams) {
        let Some(target) = params.get(TARGET_PARAM).filter(|t| !t.is_empty()) else {
            warn!(?params, "jiadan job without a target");
            return;
        };
        let top = params
            .get(COUNT_PARAM)
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(1)
            .max(1);

        let urls = match self.collect(target, top, Mode::Sync).await {
            Ok(urls) if !urls.is_empty() => urls,
            Ok(_) => {
                debug!(target, "no jiadan update");
                return;
            },
            Err(e) => {
                warn!(target, error = %e, "jiadan sync failed");
                return;
            },
        };
        let images = self.download_all(&urls).await;
        info!(target, count = images.len(), "jiadan sync delivering");
        self.send_images(target, &images).await;
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn send_images(&self, target: &str, images: &[String]) {
        for image in images {
            if self.ctx.cancel.is_cancelled() {
                return;
            }
            self.ctx.send_image(target, image).await;
        }
    }

    async fn mark_visited(&self, key: &str, post: &Post) {
        let ttl = self.visited_ttl(&post.date);
        if let Err(e) = self.ctx.kv.set(key, &post.pics.join(","), Some(ttl)).await {
            warn!(key, error = %e, "failed to mark post visited");
        }
    }

    /// Time left until the post date plus the retention window, at least a day.
    fn visited_ttl(&self, date: &str) -> Duration {
        let posted = NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S")
            .ok()
            .and_then(|naive| {
                self.ctx
                    .cron
                    .timezone()
                    .from_local_datetime(&naive)
                    .earliest()
            })
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| {
                warn!(date, "unparsable post date, using now");
                Utc::now()
            });
        let expires = posted + chrono::Duration::days(VISITED_DAYS);
        (expires - Utc::now())
            .to_std()
            .unwrap_or(MIN_VISITED_TTL)
            .max(MIN_VISITED_TTL)
    }
}
