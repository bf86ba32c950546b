use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Chat(#[from] parley_channels::Error),

    #[error(transparent)]
    Store(#[from] parley_store::Error),

    #[error(transparent)]
    Cron(#[from] parley_cron::Error),

    #[error(transparent)]
    Transport(#[from] parley_transport::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("middleware {name} failed to start: {source}")]
    Start {
        name: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

parley_common::impl_context!();
