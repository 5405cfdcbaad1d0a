use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Registry unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),

    #[error("Registry returned error code {code}: {msg}")]
    Application { code: i32, msg: String },

    #[error("Registry returned HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed registry response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Registration lost: {0}")]
    RegistrationLost(String),

    #[error("Service not registered: {0}")]
    NotRegistered(String),
}
