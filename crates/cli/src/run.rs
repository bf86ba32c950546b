//! Startup wiring and shutdown for the bridge process.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Context as _,
    parley_channels::ChatClient,
    parley_common::BotIdentity,
    parley_config::{ParleyConfig, Severity},
    parley_cron::{CronScheduler, KvCronStore},
    parley_middleware::{MiddlewareContext, Pipeline, default_factories},
    parley_store::KvStore,
    parley_wechat::{WechatClient, ensure_online, run_inbound, sync_transport},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::db_commands;

const PLATFORM: &str = "wechat";
const LOGIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub async fn run(config: ParleyConfig) -> anyhow::Result<()> {
    let validation = config.validate();
    for diagnostic in validation.of(Severity::Warning) {
        warn!(path = %diagnostic.path, "{}", diagnostic.message);
    }
    validation.into_result().context("invalid configuration")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let kv: Arc<dyn KvStore> = Arc::new(db_commands::open(&config).await?);
    spawn_purge(Arc::clone(&kv), cancel.clone());

    let cron = Arc::new(
        CronScheduler::new(Arc::new(KvCronStore::new(Arc::clone(&kv))), &cancel)
            .with_timezone(config.app.tz()),
    );

    let token = config
        .wechat
        .token
        .clone()
        .context("wechat.token is required")?;
    let client = Arc::new(
        WechatClient::builder(&config.wechat.server, token.clone(), &config.wechat.self_id)
            .build()
            .context("failed to build wechat client")?,
    );
    ensure_online(&client, LOGIN_TIMEOUT, &cancel)
        .await
        .context("wechat account is not online")?;
    let inbound = sync_transport(&config.wechat.sub_url, &token)
        .context("invalid wechat.sub_url")?;

    let identity = BotIdentity::new(&config.wechat.self_id, &config.app.bot_name, PLATFORM);
    let chat: Arc<dyn ChatClient> = client.clone();
    let ctx = Arc::new(MiddlewareContext::new(
        chat,
        kv,
        Arc::clone(&cron),
        identity,
        config,
        cancel.clone(),
    ));
    let pipeline = Arc::new(Pipeline::new(ctx).with_factories(&default_factories()));
    info!(middlewares = ?pipeline.names(), "pipeline ready");

    if let Err(e) = pipeline.start().await {
        cancel.cancel();
        pipeline.stop().await;
        cron.stop().await;
        return Err(e).context("failed to start pipeline");
    }

    let dispatch = Arc::clone(&pipeline);
    let result = run_inbound(&inbound, client, cancel.clone(), move |msg| {
        let pipeline = Arc::clone(&dispatch);
        async move {
            let consumed = pipeline.dispatch(&msg).await;
            debug!(id = %msg.id, consumed, "message dispatched");
        }
    })
    .await;

    info!("shutting down");
    cancel.cancel();
    pipeline.stop().await;
    cron.stop().await;
    result.context("inbound transport failed")?;
    info!("bye");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                cancel.cancel();
            },
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });
}

fn spawn_purge(store: Arc<dyn KvStore>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => {},
            }
            match store.purge_expired().await {
                Ok(0) => {},
                Ok(removed) => debug!(removed, "purged expired keys"),
                Err(e) => warn!(error = %e, "failed to purge expired keys"),
            }
        }
    });
}
