//! Sync socket: the inbound half of the binding.

use std::{future::Future, sync::Arc};

use {
    parley_channels::NormalizedMessage,
    parley_transport::{Transport, WsConnector},
    secrecy::{ExposeSecret, Secret},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use crate::{Result, adapter::normalize, client::WechatClient, types::SyncMessage};

pub type SyncTransport = Transport<SyncMessage>;

/// `sub_url` with the token appended as the `key` query parameter.
pub fn sync_endpoint(sub_url: &str, token: &Secret<String>) -> Result<String> {
    let mut url = url::Url::parse(sub_url)?;
    url.query_pairs_mut().append_pair("key", token.expose_secret());
    Ok(url.into())
}

/// Reconnecting transport for the sync socket.
pub fn sync_transport(sub_url: &str, token: &Secret<String>) -> Result<SyncTransport> {
    let endpoint = sync_endpoint(sub_url, token)?;
    Ok(Transport::builder(WsConnector::new(endpoint)).build())
}

/// Drive `transport` until `cancel` fires, handing each adapted message to
/// `on_message` in arrival order.
///
/// Image thumbnails are cached on `client` first so handlers can download
/// them.
pub async fn run_inbound<F, Fut>(
    transport: &SyncTransport,
    client: Arc<WechatClient>,
    cancel: CancellationToken,
    mut on_message: F,
) -> parley_transport::Result<()>
where
    F: FnMut(NormalizedMessage) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let self_id = parley_channels::ChatClient::self_id(client.as_ref()).to_string();
    transport
        .run(cancel, move |raw: SyncMessage| {
            let adapted = adapt(&client, &raw, &self_id);
            let handled = adapted.map(&mut on_message);
            async move {
                if let Some(fut) = handled {
                    fut.await;
                }
            }
        })
        .await
}

fn adapt(client: &WechatClient, raw: &SyncMessage, self_id: &str) -> Option<NormalizedMessage> {
    let msg = normalize(raw, self_id)?;
    if msg.is_image() {
        client.remember_image(&msg.id, &raw.img_buf.buffer);
    }
    info!(
        from = %msg.user_id,
        target = %msg.target(),
        msg_type = raw.msg_type,
        content = %raw.push_content,
        "received message"
    );
    debug!(id = %msg.id, "adapted sync frame");
    Some(msg)
}
