use std::sync::Arc;

use {
    async_trait::async_trait,
    clap::Parser,
    parley_channels::{CommandOutcome, NormalizedMessage, parse_command},
    parley_store::Access,
    tracing::info,
};

use crate::{Middleware, MiddlewareContext, Result};

/// Grant or revoke a permission
#[derive(Debug, Parser)]
struct AccessArgs {
    /// Permission name, e.g. gpt
    #[arg(short = 'p')]
    perm: Option<String>,
    /// Target user or group id [default: current chat]
    #[arg(short = 'u')]
    user: Option<String>,
    /// add or del
    verb: Option<String>,
}

/// `#access -p <perm> [-u <target>] add|del`, admin only.
pub struct AccessMiddleware {
    ctx: Arc<MiddlewareContext>,
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    Some(Box::new(AccessMiddleware {
        ctx: Arc::clone(ctx),
    }))
}

/// Apply `args`; `current` is the chat the command came from.
async fn apply(ctx: &MiddlewareContext, current: String, args: AccessArgs) -> String {
    let Some(perm) = args.perm.filter(|p| !p.trim().is_empty()) else {
        return "specify a permission with -p".into();
    };
    let access = Access::parse(&perm);
    if access.is_empty() {
        return format!("unknown permission: {perm}");
    }
    let target = args.user.filter(|u| !u.trim().is_empty()).unwrap_or(current);

    let nickname = ctx
        .nicknames(std::slice::from_ref(&target))
        .await
        .remove(&target)
        .unwrap_or_else(|| target.clone());

    let access_service = &ctx.access;
    match args.verb.as_deref() {
        Some("add") => match access_service.add_access(&target, access).await {
            Ok(()) => {
                info!(target = %target, access = %access, "access granted");
                format!("{nickname}: granted {access}")
            },
            Err(e) => format!("{nickname}: failed to grant access: {e}"),
        },
        Some("del") => match access_service.del_access(&target, access).await {
            Ok(()) => {
                info!(target = %target, access = %access, "access revoked");
                format!("{nickname}: revoked {access}")
            },
            Err(e) => format!("{nickname}: failed to revoke access: {e}"),
        },
        _ => "unknown action, use add or del".into(),
    }
}

#[async_trait]
impl Middleware for AccessMiddleware {
    fn name(&self) -> &'static str {
        "access"
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        if !self.ctx.access.is_admin(&msg.user_id) {
            return Ok(false);
        }
        let args = match parse_command::<AccessArgs>(msg.text_content(), "access") {
            None => return Ok(false),
            Some(CommandOutcome::Reply(text)) => {
                self.ctx.reply(msg, text);
                return Ok(true);
            },
            Some(CommandOutcome::Parsed(args)) => args,
        };
        let ctx = Arc::clone(&self.ctx);
        let current = msg.target().to_string();
        self.ctx.spawn(async move {
            let reply = apply(&ctx, current.clone(), args).await;
            ctx.send_text(&current, &reply).await;
        });
        Ok(true)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{ADMIN, RecordingClient, test_context},
        rstest::rstest,
    };

    fn middleware(client: &Arc<RecordingClient>) -> (Arc<MiddlewareContext>, AccessMiddleware) {
        let ctx = test_context(Arc::clone(client));
        let mw = AccessMiddleware {
            ctx: Arc::clone(&ctx),
        };
        (ctx, mw)
    }

    #[tokio::test]
    async fn admin_grants_and_revokes() {
        let client = RecordingClient::new();
        client.add_contact("u1", "Alice", "");
        let (ctx, mw) = middleware(&client);

        let add = NormalizedMessage::text("m1", ADMIN, "#access -p gpt -u u1 add");
        assert!(mw.on_message(&add).await.unwrap());
        client.wait_for_texts(ADMIN, 1).await;
        assert!(ctx.access.has_access("u1", Access::GPT).await.unwrap());

        let del = NormalizedMessage::text("m2", ADMIN, "#access -p gpt -u u1 del");
        assert!(mw.on_message(&del).await.unwrap());
        client.wait_for_texts(ADMIN, 2).await;
        assert!(!ctx.access.has_access("u1", Access::GPT).await.unwrap());

        assert_eq!(client.texts_to(ADMIN), vec![
            "Alice: granted gpt",
            "Alice: revoked gpt"
        ]);
    }

    #[tokio::test]
    async fn target_defaults_to_current_group() {
        let client = RecordingClient::new();
        let (ctx, mw) = middleware(&client);
        let msg = NormalizedMessage::text("m1", ADMIN, "#access -p gpt add").in_group("g1@chatroom");
        assert!(mw.on_message(&msg).await.unwrap());
        assert_eq!(client.wait_for_texts("g1@chatroom", 1).await, vec![
            "g1@chatroom: granted gpt"
        ]);
        assert!(ctx.access.has_access("g1@chatroom", Access::GPT).await.unwrap());
    }

    #[tokio::test]
    async fn non_admin_is_ignored() {
        let client = RecordingClient::new();
        let (ctx, mw) = middleware(&client);
        let msg = NormalizedMessage::text("m1", "u2", "#access -p gpt -u u2 add");
        assert!(!mw.on_message(&msg).await.unwrap());
        assert!(!ctx.access.has_access("u2", Access::GPT).await.unwrap());
        assert!(client.cards().is_empty());
    }

    #[rstest]
    #[case("#access add", "specify a permission with -p")]
    #[case("#access -p bogus add", "unknown permission: bogus")]
    #[case("#access -p gpt -u u1 grant", "unknown action, use add or del")]
    #[case("#access -p gpt -u u1", "unknown action, use add or del")]
    #[tokio::test]
    async fn validation_errors_are_replied(#[case] text: &str, #[case] expected: &str) {
        let client = RecordingClient::new();
        let (_ctx, mw) = middleware(&client);
        assert!(mw.on_message(&NormalizedMessage::text("m1", ADMIN, text)).await.unwrap());
        assert_eq!(client.wait_for_texts(ADMIN, 1).await, vec![expected]);
    }

    #[tokio::test]
    async fn other_commands_pass_through() {
        let client = RecordingClient::new();
        let (_ctx, mw) = middleware(&client);
        let msg = NormalizedMessage::text("m1", ADMIN, "#accessories");
        assert!(!mw.on_message(&msg).await.unwrap());
    }
}
