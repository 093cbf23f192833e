pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod session;
pub mod stream;
pub mod tui;
pub mod ui;

// Re-export main types for convenience
pub use app::{App, Phase, StreamUpdate};
pub use client::{AgentClient, ResetOutcome, UploadFile};
pub use config::Config;
pub use error::{DecodeError, TransportError, UploadError};
pub use session::{ChatRole, ChatTurn, DocumentInfo, SessionState};
pub use stream::{EventStream, ReplyBuffer, StreamEvent};
