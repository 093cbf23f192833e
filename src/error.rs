use std::path::PathBuf;

/// Failure to reach the agent service or a non-2xx answer from it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Agent server returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl TransportError {
    /// Build a `Status` error from a failed response, keeping whatever body text we can read.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        TransportError::Status { status, body }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Send a message first to start a conversation before uploading documents")]
    MissingThread,
    #[error("Could not read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Upload failed: {0}")]
    Rejected(String),
    #[error("Upload failed: {0}")]
    Transport(#[from] TransportError),
}

/// A `data: ` line whose payload could not be turned into a stream event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),
}
