use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error("{path} returned HTTP {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("{path} failed with code {code}: {text}")]
    Api {
        path: String,
        code: i64,
        text: String,
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

pub type Result<T> = std::result::Result<T, Error>;

/// Chat-level view of an API failure.
pub(crate) fn into_chat(operation: &'static str) -> impl FnOnce(Error) -> parley_channels::Error {
    move |e| match e {
        Error::Api { text, code, .. } => {
            parley_channels::Error::rejected(operation, format!("code {code}: {text}"))
        },
        other => parley_channels::Error::external(operation, other),
    }
}
