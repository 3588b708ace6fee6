use ballot_types::models::DraftError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("sign in required")]
    NotSignedIn,

    #[error(transparent)]
    Draft(#[from] DraftError),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// The server's voter set already holds this user.
    pub fn is_already_voted(&self) -> bool {
        matches!(self, Self::Status { code, .. } if code == "ALREADY_VOTED")
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}
