//! Startup login check.

use std::time::Duration;

use {
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::{Error, Result, client::WechatClient};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Ask for a fresh QR code every this many failed polls.
const QR_EVERY: u32 = 5;

/// Wait until the account reports online.
///
/// The first failed poll tries a wake-up login; every fifth failure logs a
/// fresh QR code URL for a manual scan. Gives up after `timeout`.
pub async fn ensure_online(
    client: &WechatClient,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut failures = 0u32;
    loop {
        match client.login_status().await {
            Ok(Some(status)) => {
                info!(
                    expiry = %status.expiry_time,
                    online_days = status.online_days,
                    "account is online"
                );
                return Ok(());
            },
            Ok(None) => warn!("account needs to log in"),
            Err(e) => return Err(e),
        }

        if failures == 0 {
            match client.wake_up_login().await {
                Ok(()) => info!("requested wake-up login"),
                Err(e) => warn!(error = %e, "wake-up login failed"),
            }
        } else if failures % QR_EVERY == 0 {
            match client.login_qr_code().await {
                Ok(qr) => warn!(url = %qr.qr_code_url, "scan the QR code to log in"),
                Err(e) => warn!(error = %e, "failed to get login QR code"),
            }
        }
        failures += 1;

        tokio::select! {
            () = cancel.cancelled() => return Err(Error::message("cancelled while waiting for login")),
            () = tokio::time::sleep_until(deadline) => {
                return Err(Error::message(format!("account not online after {timeout:?}")));
            },
            () = tokio::time::sleep(POLL_INTERVAL) => {},
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher, secrecy::Secret, serde_json::json};

    fn client(server: &mockito::ServerGuard) -> WechatClient {
        WechatClient::builder(server.url(), Secret::new("tok".into()), "bot")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn online_account_returns_immediately() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/login/GetLoginStatus")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"Code": 200, "Data": {"loginState": 1, "loginErrMsg": "ok", "onlineDays": 3}})
                    .to_string(),
            )
            .create_async()
            .await;
        ensure_online(&client(&server), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn offline_account_wakes_up_then_times_out() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/login/GetLoginStatus")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"Code": 300, "Data": null, "Text": "login required"}).to_string())
            .create_async()
            .await;
        let wake = server
            .mock("POST", "/login/WakeUpLogin")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"Code": 200}).to_string())
            .expect(1)
            .create_async()
            .await;
        let err = ensure_online(
            &client(&server),
            Duration::from_millis(300),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not online"));
        wake.assert_async().await;
    }

    #[tokio::test]
    async fn http_failure_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/login/GetLoginStatus")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        assert!(
            ensure_online(&client(&server), Duration::from_secs(5), &CancellationToken::new())
                .await
                .is_err()
        );
    }
}
