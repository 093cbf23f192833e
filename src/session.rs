//! Per-user chat session state
//!
//! One `SessionState` lives for one interactive session. It is created with a
//! single assistant greeting and only ever shrinks through [`SessionState::reset`].
//! Nothing here touches the network or the terminal.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub const GREETING: &str = "How can I help you?";

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single turn in the conversation transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A document the agent has indexed for the current thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub num_chunks: u32,
    #[serde(default)]
    pub num_pages: Option<u32>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub upload_time: Option<DateTime<Utc>>,
}

impl DocumentInfo {
    /// One-line human summary, e.g. `report.pdf (12 chunks, 3 pages, 40.2 KB)`
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} chunks", self.num_chunks)];
        if let Some(pages) = self.num_pages {
            parts.push(format!("{} pages", pages));
        }
        parts.push(format_size(self.file_size));
        format!("{} ({})", self.filename, parts.join(", "))
    }
}

/// Format a byte count the way upload summaries show it.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Accept RFC 3339 or a naive ISO timestamp (treated as UTC). Anything else
/// becomes `None` rather than failing the whole listing.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    transcript: Vec<ChatTurn>,
    thread_id: Option<String>,
    documents: Vec<DocumentInfo>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            transcript: vec![ChatTurn::assistant(GREETING)],
            thread_id: None,
            documents: Vec::new(),
        }
    }

    pub fn transcript(&self) -> &[ChatTurn] {
        &self.transcript
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    pub fn documents(&self) -> &[DocumentInfo] {
        &self.documents
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.transcript.push(ChatTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.transcript.push(ChatTurn::assistant(content));
    }

    /// The server is authoritative: whatever it last sent wins.
    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) {
        self.thread_id = Some(thread_id.into());
    }

    /// Start over on a fresh server thread.
    pub fn reset(&mut self, thread_id: impl Into<String>) {
        self.transcript = vec![ChatTurn::assistant(GREETING)];
        self.thread_id = Some(thread_id.into());
        self.documents.clear();
    }

    pub fn replace_documents(&mut self, documents: Vec<DocumentInfo>) {
        self.documents = documents;
    }

    pub fn clear_documents(&mut self) {
        self.documents.clear();
    }
}
