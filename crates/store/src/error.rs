use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 image: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("corrupt value at {key}: {value}")]
    Corrupt { key: String, value: String },

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

    #[must_use]
    pub fn corrupt(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl parley_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::message(message)
    }
}

parley_common::impl_context!();

pub type Result<T> = std::result::Result<T, Error>;
