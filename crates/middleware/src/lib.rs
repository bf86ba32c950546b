//! Ordered message pipeline and the built-in middlewares.
//!
//! Every inbound [`parley_channels::NormalizedMessage`] runs through the
//! [`Pipeline`] in registration order until one middleware consumes it.
//! [`default_factories`] lists the production chain.

pub mod access;
pub mod admin;
pub mod avatar;
pub mod bridge;
pub mod context;
pub mod dedup;
pub mod error;
pub mod jiadan;
pub mod log;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use {
    context::MiddlewareContext,
    error::{Error, Result},
    pipeline::{Middleware, MiddlewareFactory, Pipeline},
};

/// The production chain. Logging and dedup come first so every later
/// middleware sees each upstream message once; the bridge comes last so
/// local commands are never forwarded.
pub fn default_factories() -> Vec<MiddlewareFactory> {
    vec![
        log::factory,
        dedup::factory,
        access::factory,
        admin::factory,
        avatar::factory,
        jiadan::factory,
        bridge::factory,
    ]
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{RecordingClient, test_config, test_context, test_context_with},
    };

    #[tokio::test]
    async fn default_chain_order() {
        let pipeline = Pipeline::new(test_context(RecordingClient::new()))
            .with_factories(&default_factories());
        assert_eq!(pipeline.names(), vec![
            "log", "dedup", "access", "admin", "avatar", "jiadan", "bridge"
        ]);
    }

    #[tokio::test]
    async fn bridge_is_left_out_without_a_server() {
        let mut config = test_config();
        config.automation.server = String::new();
        let pipeline = Pipeline::new(test_context_with(RecordingClient::new(), config))
            .with_factories(&default_factories());
        assert!(!pipeline.names().contains(&"bridge"));
    }
}
