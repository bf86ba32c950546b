use serde::{Deserialize, Serialize};

/// The single bot identity a process speaks as.
///
/// Resolved once at startup and handed to every component that needs to
/// recognise its own messages or report itself upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Platform user id of the bot account.
    pub user_id: String,
    /// Self id reported to the automation backend.
    pub self_id: String,
    /// Platform name, e.g. `wechat`.
    pub platform: String,
}

impl BotIdentity {
    pub fn new(
        user_id: impl Into<String>,
        self_id: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            self_id: self_id.into(),
            platform: platform.into(),
        }
    }

    /// Whether `user_id` is the bot itself.
    pub fn is_self(&self, user_id: &str) -> bool {
        !self.user_id.is_empty() && self.user_id == user_id
    }
}
