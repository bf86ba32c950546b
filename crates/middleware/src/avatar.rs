use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    parley_channels::{NormalizedMessage, command_args},
    tracing::{error, info, warn},
    uuid::Uuid,
};

use crate::{Middleware, MiddlewareContext, Result};

const SESSION_PREFIX: &str = "avatar:session:";
/// How long a user has to send the image.
pub const SESSION_TTL: Duration = Duration::from_secs(60);
/// Extra lifetime of the stored session so the timeout watcher still finds it.
const SESSION_GRACE: Duration = Duration::from_secs(5);

/// `#avatar` in a private chat: the next image from the sender becomes the
/// avatar reported to the automation backend.
pub struct AvatarMiddleware {
    ctx: Arc<MiddlewareContext>,
    ttl: Duration,
}

fn session_key(user_id: &str) -> String {
    format!("{SESSION_PREFIX}{user_id}")
}

/// Download the image behind `msg_id` and store it as the user's avatar.
/// The session stays open when the image cannot be used.
async fn upload(ctx: &MiddlewareContext, user_id: &str, msg_id: &str) {
    let content = match ctx.client.download_message_image(msg_id).await {
        Ok(content) => content,
        Err(e) => {
            error!(user = %user_id, msg_id, error = %e, "failed to download avatar image");
            ctx.send_text(user_id, "could not download the image, please send it again")
                .await;
            return;
        },
    };

    let stored = match ctx.avatars.save(user_id, &content).await {
        Ok(stored) => stored,
        Err(e @ (parley_store::Error::Base64(_) | parley_store::Error::Image(_))) => {
            warn!(user = %user_id, error = %e, "avatar is not a readable image");
            ctx.send_text(user_id, "could not read the image, please send another one")
                .await;
            return;
        },
        Err(e) => {
            error!(user = %user_id, error = %e, "failed to store avatar");
            ctx.send_text(user_id, "could not save the avatar, try again later")
                .await;
            return;
        },
    };

    if let Err(e) = ctx.kv.del(&session_key(user_id)).await {
        warn!(user = %user_id, error = %e, "failed to clear avatar session");
    }
    info!(user = %user_id, size = stored.len(), "avatar uploaded");
    ctx.send_text(user_id, &format!("avatar saved ({} bytes)", stored.len()))
        .await;
}

impl AvatarMiddleware {
    pub fn new(ctx: Arc<MiddlewareContext>) -> Self {
        Self {
            ctx,
            ttl: SESSION_TTL,
        }
    }

    async fn open_session(&self, msg: &NormalizedMessage) {
        if msg.is_group() {
            self.ctx.reply(msg, "use #avatar in a private chat");
            return;
        }

        let key = session_key(&msg.user_id);
        let nonce = Uuid::new_v4().to_string();
        let opened = match self
            .ctx
            .kv
            .set_nx(&key, &nonce, Some(self.ttl + SESSION_GRACE))
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                error!(user = %msg.user_id, error = %e, "failed to open avatar session");
                self.ctx.reply(msg, "could not open an upload session, try again later");
                return;
            },
        };
        if !opened {
            self.ctx.reply(
                msg,
                "an upload session is already open, send an image or wait for it to expire",
            );
            return;
        }

        self.ctx.reply(msg, "send an image within 1 minute to use as your avatar");
        self.spawn_timeout_watcher(key, msg.user_id.clone(), nonce);
    }

    /// Close the session once the window passes and tell the user, unless
    /// an upload consumed it first. A newer session under the same key
    /// carries a different nonce and is left alone.
    fn spawn_timeout_watcher(&self, key: String, user_id: String, nonce: String) {
        let ctx = Arc::clone(&self.ctx);
        let ttl = self.ttl;
        self.ctx.spawn(async move {
            tokio::time::sleep(ttl).await;
            match ctx.kv.get(&key).await {
                Ok(Some(current)) if current == nonce => {},
                Ok(_) => return,
                Err(e) => {
                    warn!(user = %user_id, error = %e, "failed to read avatar session");
                    return;
                },
            }
            match ctx.kv.del(&key).await {
                Ok(true) => {
                    ctx.send_text(&user_id, "avatar upload timed out, send #avatar again")
                        .await;
                },
                Ok(false) => {},
                Err(e) => warn!(user = %user_id, error = %e, "failed to clear avatar session"),
            }
        });
    }

    /// Returns whether the image belongs to an open session. The download
    /// and save run detached.
    async fn try_upload(&self, msg: &NormalizedMessage) -> Result<bool> {
        if !self.ctx.kv.exists(&session_key(&msg.user_id)).await? {
            return Ok(false);
        }
        let ctx = Arc::clone(&self.ctx);
        let user_id = msg.user_id.clone();
        let msg_id = msg.id.clone();
        self.ctx.spawn(async move { upload(&ctx, &user_id, &msg_id).await });
        Ok(true)
    }
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    Some(Box::new(AvatarMiddleware::new(Arc::clone(ctx))))
}

#[async_trait]
impl Middleware for AvatarMiddleware {
    fn name(&self) -> &'static str {
        "avatar"
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        if !msg.is_group() && msg.is_image() {
            return self.try_upload(msg).await;
        }
        if command_args(msg.text_content(), "avatar").is_some() {
            self.open_session(msg).await;
            return Ok(true);
        }
        Ok(false)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{RecordingClient, jpeg_base64, test_context},
        base64::{Engine as _, engine::general_purpose::STANDARD},
        image::GenericImageView,
        parley_channels::MessageKind,
    };

    fn image_from(user: &str, id: &str) -> NormalizedMessage {
        NormalizedMessage::new(id, MessageKind::Image, user, "<img/>")
    }

    fn avatar_command(id: &str) -> NormalizedMessage {
        NormalizedMessage::text(id, "u1", "#avatar")
    }

    #[tokio::test]
    async fn session_then_image_saves_normalized_avatar() {
        let client = RecordingClient::new();
        client.add_image("img-1", &jpeg_base64(320, 180));
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));

        assert!(mw.on_message(&avatar_command("m1")).await.unwrap());
        assert!(ctx.kv.exists("avatar:session:u1").await.unwrap());

        assert!(mw.on_message(&image_from("u1", "img-1")).await.unwrap());
        let texts = client.wait_for_texts("u1", 2).await;
        assert_eq!(texts[0], "send an image within 1 minute to use as your avatar");
        assert!(texts[1].starts_with("avatar saved ("), "{}", texts[1]);

        let stored = ctx.avatars.get("u1").await.unwrap().unwrap();
        let decoded = image::load_from_memory(&STANDARD.decode(stored).unwrap()).unwrap();
        assert_eq!(decoded.dimensions(), (128, 128));
        assert!(!ctx.kv.exists("avatar:session:u1").await.unwrap());

        // Session is gone, so further images pass through.
        assert!(!mw.on_message(&image_from("u1", "img-1")).await.unwrap());
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn second_request_while_open_is_refused() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));
        mw.on_message(&avatar_command("m1")).await.unwrap();
        mw.on_message(&avatar_command("m2")).await.unwrap();
        assert_eq!(
            client.wait_for_texts("u1", 2).await[1],
            "an upload session is already open, send an image or wait for it to expire"
        );
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn group_request_points_to_private_chat() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));
        let cmd = NormalizedMessage::text("m1", "u1", "#avatar").in_group("g1@chatroom");
        assert!(mw.on_message(&cmd).await.unwrap());
        assert_eq!(client.wait_for_texts("g1@chatroom", 1).await, vec![
            "use #avatar in a private chat"
        ]);
        assert!(!ctx.kv.exists("avatar:session:u1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_download_keeps_session_open() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));
        mw.on_message(&avatar_command("m1")).await.unwrap();

        assert!(mw.on_message(&image_from("u1", "unknown")).await.unwrap());
        assert_eq!(
            client.wait_for_texts("u1", 2).await[1],
            "could not download the image, please send it again"
        );
        assert!(ctx.kv.exists("avatar:session:u1").await.unwrap());
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn unreadable_image_keeps_session_open() {
        let client = RecordingClient::new();
        client.add_image("img-1", &STANDARD.encode("not an image"));
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));
        mw.on_message(&avatar_command("m1")).await.unwrap();

        assert!(mw.on_message(&image_from("u1", "img-1")).await.unwrap());
        assert_eq!(
            client.wait_for_texts("u1", 2).await[1],
            "could not read the image, please send another one"
        );
        assert!(ctx.kv.exists("avatar:session:u1").await.unwrap());
        assert_eq!(ctx.avatars.get("u1").await.unwrap(), None);
        ctx.cancel.cancel();
    }

    #[tokio::test]
    async fn unanswered_session_times_out() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mut mw = AvatarMiddleware::new(Arc::clone(&ctx));
        mw.ttl = Duration::from_millis(50);

        mw.on_message(&avatar_command("m1")).await.unwrap();
        let texts = client.wait_for_texts("u1", 2).await;
        assert_eq!(texts[1], "avatar upload timed out, send #avatar again");
        assert!(!ctx.kv.exists("avatar:session:u1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn old_watcher_leaves_a_reopened_session_alone() {
        let client = RecordingClient::new();
        client.add_image("img-1", &jpeg_base64(64, 64));
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(Arc::clone(&ctx));

        mw.on_message(&avatar_command("m1")).await.unwrap();
        mw.on_message(&image_from("u1", "img-1")).await.unwrap();
        client.wait_for_texts("u1", 2).await;

        tokio::time::sleep(Duration::from_secs(30)).await;
        mw.on_message(&avatar_command("m2")).await.unwrap();
        client.wait_for_texts("u1", 3).await;

        // The first watcher fires here and must not touch the new session.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(ctx.kv.exists("avatar:session:u1").await.unwrap());
        assert_eq!(client.texts_to("u1").len(), 3);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let texts = client.wait_for_texts("u1", 4).await;
        assert_eq!(texts[3], "avatar upload timed out, send #avatar again");
        assert!(!ctx.kv.exists("avatar:session:u1").await.unwrap());
    }

    #[tokio::test]
    async fn images_without_session_pass_through() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let mw = AvatarMiddleware::new(ctx);
        assert!(!mw.on_message(&image_from("u1", "img-1")).await.unwrap());
        assert!(client.cards().is_empty());
    }
}
