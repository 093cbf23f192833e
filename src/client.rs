use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{TransportError, UploadError};
use crate::session::DocumentInfo;
use crate::stream::EventStream;

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ResetRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResetOutcome {
    pub thread_id: String,
    #[serde(default)]
    pub documents_cleared: bool,
}

#[derive(Deserialize)]
struct UploadResponse {
    document: Option<UploadedDocument>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct UploadedDocument {
    filename: Option<String>,
    #[serde(default)]
    num_chunks: u32,
    num_pages: Option<u32>,
    file_size: Option<u64>,
}

#[derive(Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    documents: Vec<DocumentInfo>,
}

/// A file ready to be sent to `/documents/upload`
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, UploadError> {
        let bytes = std::fs::read(path).map_err(|source| UploadError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();

        Ok(Self {
            name,
            bytes,
            mime_type,
        })
    }
}

/// HTTP client for the research agent service. Every call is a single
/// request; nothing is retried.
#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    upload_timeout: Duration,
    request_timeout: Duration,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, upload: Duration, request: Duration) -> Self {
        self.upload_timeout = upload;
        self.request_timeout = request;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open a streaming chat reply. No timeout: the agent may take a long
    /// time to wake up and answer.
    pub async fn send_chat_stream(
        &self,
        query: &str,
        thread_id: Option<&str>,
    ) -> Result<EventStream, TransportError> {
        let url = self.url("/chat/stream");
        tracing::debug!(%url, thread_id = ?thread_id, "opening chat stream");

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest { query, thread_id })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::from_response(response).await);
        }

        Ok(EventStream::from_response(response))
    }

    pub async fn reset_chat(
        &self,
        thread_id: Option<&str>,
    ) -> Result<ResetOutcome, TransportError> {
        let url = self.url("/chat/reset");

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&ResetRequest { thread_id })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::from_response(response).await);
        }

        let outcome: ResetOutcome = response.json().await?;
        tracing::info!(
            old = ?thread_id,
            new = %outcome.thread_id,
            documents_cleared = outcome.documents_cleared,
            "chat reset"
        );
        Ok(outcome)
    }

    pub async fn upload_document(
        &self,
        file: UploadFile,
        thread_id: &str,
    ) -> Result<DocumentInfo, UploadError> {
        let url = self.url("/documents/upload");
        let byte_count = file.bytes.len() as u64;
        let filename = file.name.clone();

        let part = Part::bytes(file.bytes)
            .file_name(file.name)
            .mime_str(&file.mime_type)
            .map_err(TransportError::from)?;
        let form = Form::new()
            .part("file", part)
            .text("thread_id", thread_id.to_string());

        let response = self
            .client
            .post(&url)
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(TransportError::from)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<UploadResponse>(&body)
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("server returned {}: {}", status, body));
            return Err(UploadError::Rejected(message));
        }

        let body: UploadResponse = response.json().await.map_err(TransportError::from)?;
        if let Some(error) = body.error {
            return Err(UploadError::Rejected(error));
        }
        let document = body.document.ok_or_else(|| {
            UploadError::Rejected("response did not describe the document".to_string())
        })?;

        let info = DocumentInfo {
            filename: document.filename.unwrap_or(filename),
            num_chunks: document.num_chunks,
            num_pages: document.num_pages,
            file_size: document.file_size.unwrap_or(byte_count),
            upload_time: Some(Utc::now()),
        };
        tracing::info!(filename = %info.filename, chunks = info.num_chunks, "document uploaded");
        Ok(info)
    }

    /// Best effort: any failure yields an empty list.
    pub async fn list_documents(&self, thread_id: &str) -> Vec<DocumentInfo> {
        match self.try_list_documents(thread_id).await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(error = %e, thread_id, "listing documents failed");
                Vec::new()
            }
        }
    }

    async fn try_list_documents(
        &self,
        thread_id: &str,
    ) -> Result<Vec<DocumentInfo>, TransportError> {
        let url = self.url(&format!("/documents/list/{}", thread_id));

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::from_response(response).await);
        }

        let listing: DocumentsResponse = response.json().await?;
        Ok(listing.documents)
    }

    /// Best effort: `true` only when the server confirmed the clear.
    pub async fn clear_documents(&self, thread_id: &str) -> bool {
        let url = self.url(&format!("/documents/clear/{}", thread_id));

        match self
            .client
            .delete(&url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), thread_id, "clearing documents failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, thread_id, "clearing documents failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let client = AgentClient::new("http://localhost:8000//");
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/chat/stream"), "http://localhost:8000/chat/stream");
    }

    #[test]
    fn test_chat_request_omits_missing_thread() {
        let body = serde_json::to_value(ChatRequest {
            query: "hi",
            thread_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"query": "hi"}));

        let body = serde_json::to_value(ChatRequest {
            query: "hi",
            thread_id: Some("t"),
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"query": "hi", "thread_id": "t"}));

        let body = serde_json::to_value(ResetRequest { thread_id: None }).unwrap();
        assert_eq!(body, serde_json::json!({}));
    }

    #[test]
    fn test_upload_file_from_path_guesses_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"%PDF-1.4").unwrap();

        let file = UploadFile::from_path(&path).unwrap();
        assert_eq!(file.name, "paper.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.bytes, b"%PDF-1.4");
    }

    #[test]
    fn test_upload_file_missing_path() {
        let err = UploadFile::from_path(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, UploadError::ReadFile { .. }));
    }
}
