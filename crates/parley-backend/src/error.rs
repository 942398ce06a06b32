use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("realtime socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error("not signed in")]
    NoSession,

    #[error("invalid login credentials")]
    InvalidCredentials,

    #[error("account already exists")]
    AccountExists,

    #[error("{0}")]
    Unavailable(String),
}
