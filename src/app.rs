use std::future::Future;
use std::path::{Path, PathBuf};

use ratatui::layout::Rect;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::client::{AgentClient, ResetOutcome, UploadFile};
use crate::error::{TransportError, UploadError};
use crate::session::{DocumentInfo, SessionState};
use crate::stream::{Flow, ReplyBuffer, StreamEvent};
use crate::tui::AppEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// What the session is doing right now. Only `Idle` accepts new actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingResponse,
    Uploading,
    Resetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

/// Progress of an in-flight chat reply, forwarded from the streaming task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Event(StreamEvent),
    /// The connection failed before or during the reply.
    Failed(String),
    /// The body ended without a `done` event.
    Closed,
}

/// Outcome of a request run off the event loop.
#[derive(Debug)]
pub enum TaskResult {
    Reset(Result<ResetOutcome, TransportError>),
    Upload(Result<Uploaded, UploadError>),
    Listed(Vec<DocumentInfo>),
    Cleared(bool),
}

#[derive(Debug)]
pub struct Uploaded {
    pub document: DocumentInfo,
    /// Listing fetched right after the upload
    pub documents: Vec<DocumentInfo>,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub phase: Phase,
    pub input_mode: InputMode,
    pub session: SessionState,

    // Input state
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Background work
    pub reply: Option<ReplyBuffer>,
    reply_task: Option<JoinHandle<()>>,
    action_task: Option<JoinHandle<()>>,
    updates: UnboundedSender<AppEvent>,

    // Popups
    pub show_reset_confirm: bool,
    pub show_upload_prompt: bool,
    pub upload_path_input: String,
    pub upload_path_cursor: usize,

    pub show_documents: bool,
    pub status: Option<StatusMessage>,

    // Chat view
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub chat_area: Option<Rect>,
    pub documents_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8,

    client: AgentClient,
}

impl App {
    pub fn new(client: AgentClient, updates: UnboundedSender<AppEvent>) -> Self {
        Self {
            should_quit: false,
            phase: Phase::Idle,
            input_mode: InputMode::Editing,
            session: SessionState::new(),

            input: String::new(),
            input_cursor: 0,

            reply: None,
            reply_task: None,
            action_task: None,
            updates,

            show_reset_confirm: false,
            show_upload_prompt: false,
            upload_path_input: String::new(),
            upload_path_cursor: 0,

            show_documents: false,
            status: None,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,
            documents_area: None,

            animation_frame: 0,

            client,
        }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    /// No reply streaming and no request in flight.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle && self.action_task.is_none()
    }

    pub fn set_status(&mut self, kind: StatusKind, text: impl Into<String>) {
        self.status = Some(StatusMessage {
            kind,
            text: text.into(),
        });
    }

    /// Send the current input as a chat message and start streaming the reply.
    /// Returns `false` when nothing was sent.
    pub fn submit_message(&mut self) -> bool {
        let Some((query, thread_id)) = self.begin_reply() else {
            return false;
        };

        let client = self.client.clone();
        let updates = self.updates.clone();
        self.reply_task = Some(tokio::spawn(stream_reply(client, query, thread_id, updates)));
        true
    }

    /// Optimistically record the user turn and move to `AwaitingResponse`.
    pub(crate) fn begin_reply(&mut self) -> Option<(String, Option<String>)> {
        if !self.is_idle() || self.input.trim().is_empty() {
            return None;
        }

        let query = std::mem::take(&mut self.input);
        self.input_cursor = 0;
        self.session.push_user(query.clone());
        self.reply = Some(ReplyBuffer::new());
        self.phase = Phase::AwaitingResponse;
        self.status = None;
        self.scroll_chat_to_bottom();

        Some((query, self.session.thread_id().map(str::to_string)))
    }

    pub fn apply_stream_update(&mut self, update: StreamUpdate) {
        if self.phase != Phase::AwaitingResponse {
            tracing::debug!(?update, "dropping stream update outside of a reply");
            return;
        }

        match update {
            StreamUpdate::Event(event) => {
                if let StreamEvent::ThreadId { thread_id } = &event {
                    if self.session.thread_id() != Some(thread_id.as_str()) {
                        tracing::info!(%thread_id, "server assigned thread");
                    }
                    self.session.set_thread_id(thread_id.clone());
                }
                let flow = match self.reply.as_mut() {
                    Some(reply) => reply.apply(event),
                    None => Flow::Stop,
                };
                if flow == Flow::Stop {
                    self.finish_reply();
                }
            }
            StreamUpdate::Closed => self.finish_reply(),
            StreamUpdate::Failed(message) => {
                // partial text is dropped in favour of the error
                self.reply = None;
                self.reply_task = None;
                self.session.push_assistant(format!("Error: {}", message));
                self.set_status(StatusKind::Error, message);
                self.phase = Phase::Idle;
            }
        }

        self.scroll_chat_to_bottom();
    }

    fn finish_reply(&mut self) {
        let reply = self.reply.take().unwrap_or_default();
        if let Some(error) = reply.error() {
            self.set_status(StatusKind::Error, format!("Agent error: {}", error));
        }
        self.session.push_assistant(reply.finish());
        self.reply_task = None;
        self.phase = Phase::Idle;
    }

    // Reset flow: request -> confirm/cancel
    pub fn request_reset(&mut self) {
        if self.is_idle() {
            self.show_reset_confirm = true;
        }
    }

    pub fn cancel_reset(&mut self) {
        self.show_reset_confirm = false;
    }

    /// Start the confirmed reset in the background. Returns `false` when
    /// there was nothing to confirm.
    pub fn confirm_reset(&mut self) -> bool {
        if !self.show_reset_confirm || !self.is_idle() {
            return false;
        }
        self.show_reset_confirm = false;
        self.phase = Phase::Resetting;

        let client = self.client.clone();
        let current = self.session.thread_id().map(str::to_string);
        self.spawn_task(async move {
            TaskResult::Reset(client.reset_chat(current.as_deref()).await)
        });
        true
    }

    // Upload flow
    pub fn open_upload_prompt(&mut self) {
        if !self.is_idle() {
            return;
        }
        if self.session.thread_id().is_none() {
            self.set_status(StatusKind::Warning, UploadError::MissingThread.to_string());
            return;
        }
        self.show_upload_prompt = true;
        self.upload_path_input.clear();
        self.upload_path_cursor = 0;
    }

    pub fn close_upload_prompt(&mut self) {
        self.show_upload_prompt = false;
        self.upload_path_input.clear();
        self.upload_path_cursor = 0;
    }

    /// Start uploading a local file into the current thread. Returns whether
    /// the upload was started; the outcome arrives as a `TaskResult`.
    pub fn upload_file(&mut self, path: &Path) -> bool {
        if !self.is_idle() {
            return false;
        }
        let Some(thread_id) = self.session.thread_id().map(str::to_string) else {
            self.set_status(StatusKind::Error, UploadError::MissingThread.to_string());
            return false;
        };

        self.phase = Phase::Uploading;
        self.set_status(StatusKind::Info, format!("Uploading {}...", path.display()));

        let client = self.client.clone();
        let path = path.to_path_buf();
        self.spawn_task(upload_and_list(client, path, thread_id));
        true
    }

    /// Replace the local document list with the server's view of it.
    pub fn refresh_documents(&mut self) {
        if !self.is_idle() {
            return;
        }
        let Some(thread_id) = self.session.thread_id().map(str::to_string) else {
            return;
        };

        let client = self.client.clone();
        self.spawn_task(async move {
            TaskResult::Listed(client.list_documents(&thread_id).await)
        });
    }

    pub fn clear_documents(&mut self) {
        if !self.is_idle() {
            return;
        }
        let Some(thread_id) = self.session.thread_id().map(str::to_string) else {
            self.set_status(StatusKind::Warning, "No conversation yet, nothing to clear");
            return;
        };

        let client = self.client.clone();
        self.spawn_task(async move {
            TaskResult::Cleared(client.clear_documents(&thread_id).await)
        });
    }

    fn spawn_task<F>(&mut self, task: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let updates = self.updates.clone();
        self.action_task = Some(tokio::spawn(async move {
            let _ = updates.send(AppEvent::Task(task.await));
        }));
    }

    /// Apply the outcome of a background reset, upload or documents request.
    pub fn apply_task_result(&mut self, result: TaskResult) {
        if self.action_task.is_none() {
            tracing::debug!(?result, "dropping task result nobody is waiting for");
            return;
        }

        match result {
            TaskResult::Reset(Ok(outcome)) => {
                self.session.reset(outcome.thread_id);
                self.chat_scroll = 0;
                let text = if outcome.documents_cleared {
                    "Started a new conversation; uploaded documents were cleared"
                } else {
                    "Started a new conversation"
                };
                self.set_status(StatusKind::Info, text);
            }
            TaskResult::Reset(Err(e)) => {
                tracing::warn!(error = %e, "reset failed");
                self.set_status(
                    StatusKind::Warning,
                    format!("Could not reset the conversation: {}", e),
                );
            }
            TaskResult::Upload(Ok(uploaded)) => {
                self.set_status(
                    StatusKind::Info,
                    format!("Uploaded {}", uploaded.document.summary()),
                );
                self.session.replace_documents(uploaded.documents);
            }
            TaskResult::Upload(Err(e)) => self.set_status(StatusKind::Error, e.to_string()),
            TaskResult::Listed(documents) => {
                let count = documents.len();
                self.session.replace_documents(documents);
                self.set_status(
                    StatusKind::Info,
                    format!("{} document(s) in this conversation", count),
                );
            }
            TaskResult::Cleared(true) => {
                self.session.clear_documents();
                self.set_status(StatusKind::Info, "Cleared uploaded documents");
            }
            TaskResult::Cleared(false) => {
                self.set_status(StatusKind::Warning, "Could not clear documents");
            }
        }

        self.action_task = None;
        self.phase = Phase::Idle;
    }

    /// Stop any reply or request still running. Called on the way out.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.reply_task.take() {
            task.abort();
        }
        if let Some(task) = self.action_task.take() {
            task.abort();
        }
        self.should_quit = true;
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.phase != Phase::Idle {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    /// Scroll chat to the bottom so the newest text is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let pending = self.reply.as_ref().map(|r| r.display());
        let bodies = self
            .session
            .transcript()
            .iter()
            .map(|turn| turn.content.as_str())
            .chain(pending.as_deref());

        let mut total_lines: u16 = 0;
        for body in bodies {
            total_lines = total_lines.saturating_add(1); // Role line
            for line in body.lines() {
                let char_count = line.chars().count();
                let wrapped = u16::try_from(char_count / wrap_width + 1).unwrap_or(u16::MAX);
                total_lines = total_lines.saturating_add(wrapped);
            }
            total_lines = total_lines.saturating_add(1); // Blank line after message
        }

        let visible_height = if self.chat_height > 0 { self.chat_height } else { 20 };

        self.chat_scroll = total_lines.saturating_sub(visible_height);
    }
}

async fn upload_and_list(client: AgentClient, path: PathBuf, thread_id: String) -> TaskResult {
    let uploaded = match UploadFile::from_path(&path) {
        Ok(file) => client.upload_document(file, &thread_id).await,
        Err(e) => Err(e),
    };

    match uploaded {
        Ok(document) => {
            let documents = client.list_documents(&thread_id).await;
            TaskResult::Upload(Ok(Uploaded {
                document,
                documents,
            }))
        }
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "upload failed");
            TaskResult::Upload(Err(e))
        }
    }
}

/// Drive one chat reply to completion, forwarding every event to the UI loop.
/// Stops reading as soon as a terminal event arrives.
async fn stream_reply(
    client: AgentClient,
    query: String,
    thread_id: Option<String>,
    updates: UnboundedSender<AppEvent>,
) {
    let send = |update: StreamUpdate| updates.send(AppEvent::Stream(update)).is_ok();

    let mut events = match client.send_chat_stream(&query, thread_id.as_deref()).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(error = %e, "chat request failed");
            send(StreamUpdate::Failed(e.to_string()));
            return;
        }
    };

    while let Some(item) = events.next_event().await {
        match item {
            Ok(event) => {
                let terminal = event.is_terminal();
                if !send(StreamUpdate::Event(event)) || terminal {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat stream broke off");
                send(StreamUpdate::Failed(e.to_string()));
                return;
            }
        }
    }

    send(StreamUpdate::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ChatRole, ChatTurn, GREETING};
    use tokio::sync::mpsc;

    fn test_app() -> App {
        let (tx, _rx) = mpsc::unbounded_channel();
        App::new(AgentClient::new("http://127.0.0.1:9"), tx)
    }

    fn content(s: &str) -> StreamUpdate {
        StreamUpdate::Event(StreamEvent::Content {
            content: s.to_string(),
        })
    }

    fn thread(id: &str) -> StreamUpdate {
        StreamUpdate::Event(StreamEvent::ThreadId {
            thread_id: id.to_string(),
        })
    }

    fn start(app: &mut App, text: &str) {
        app.input = text.to_string();
        assert!(app.begin_reply().is_some());
    }

    #[test]
    fn test_empty_input_is_not_sent() {
        let mut app = test_app();
        app.input = "   ".to_string();
        assert!(app.begin_reply().is_none());
        assert_eq!(app.phase, Phase::Idle);
        assert_eq!(app.session.transcript().len(), 1);
    }

    #[test]
    fn test_user_turn_is_optimistic() {
        let mut app = test_app();
        app.input = "hello".to_string();
        app.input_cursor = 5;

        let (query, thread) = app.begin_reply().unwrap();
        assert_eq!(query, "hello");
        assert!(thread.is_none());
        assert_eq!(app.phase, Phase::AwaitingResponse);
        assert_eq!(app.session.transcript().last(), Some(&ChatTurn::user("hello")));
        assert!(app.input.is_empty());
        assert_eq!(app.input_cursor, 0);

        // a second send while awaiting is refused
        app.input = "again".to_string();
        assert!(app.begin_reply().is_none());
    }

    #[test]
    fn test_reply_is_appended_once_on_done() {
        let mut app = test_app();
        start(&mut app, "q");

        app.apply_stream_update(thread("abc"));
        app.apply_stream_update(content("Hel"));
        assert_eq!(app.reply.as_ref().unwrap().display(), format!("Hel{}", crate::stream::CURSOR));
        app.apply_stream_update(thread("xyz"));
        app.apply_stream_update(content("lo"));
        app.apply_stream_update(StreamUpdate::Event(StreamEvent::Done));
        app.apply_stream_update(StreamUpdate::Closed);

        assert_eq!(app.phase, Phase::Idle);
        assert_eq!(app.session.thread_id(), Some("xyz"));
        let transcript = app.session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[2], ChatTurn::assistant("Hello"));
        assert!(app.reply.is_none());
    }

    #[test]
    fn test_natural_close_finishes_reply() {
        let mut app = test_app();
        start(&mut app, "q");
        app.apply_stream_update(content("partial but complete"));
        app.apply_stream_update(StreamUpdate::Closed);

        assert_eq!(app.phase, Phase::Idle);
        assert_eq!(app.session.transcript().last().unwrap().content, "partial but complete");
    }

    #[test]
    fn test_server_error_is_surfaced() {
        let mut app = test_app();
        start(&mut app, "q");
        app.apply_stream_update(content("A"));
        app.apply_stream_update(StreamUpdate::Event(StreamEvent::Error {
            content: "boom".into(),
        }));

        assert_eq!(app.phase, Phase::Idle);
        let last = app.session.transcript().last().unwrap();
        assert_eq!(last.role, ChatRole::Assistant);
        assert_ne!(last.content, "A");
        assert!(last.content.contains("boom"));
        assert_eq!(app.status.as_ref().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn test_transport_failure_discards_partial_text() {
        let mut app = test_app();
        start(&mut app, "q");
        app.apply_stream_update(content("half an ans"));
        app.apply_stream_update(StreamUpdate::Failed("connection reset".into()));

        assert_eq!(app.phase, Phase::Idle);
        assert_eq!(
            app.session.transcript().last(),
            Some(&ChatTurn::assistant("Error: connection reset"))
        );
        assert_eq!(app.session.transcript().len(), 3);
    }

    #[test]
    fn test_updates_outside_reply_are_ignored() {
        let mut app = test_app();
        app.apply_stream_update(content("stray"));
        app.apply_stream_update(StreamUpdate::Closed);
        assert_eq!(app.session.transcript(), &[ChatTurn::assistant(GREETING)]);
    }

    #[test]
    fn test_reset_needs_confirmation_and_idle() {
        let mut app = test_app();
        app.request_reset();
        assert!(app.show_reset_confirm);
        app.cancel_reset();
        assert!(!app.show_reset_confirm);

        start(&mut app, "q");
        app.request_reset();
        assert!(!app.show_reset_confirm);
    }

    #[test]
    fn test_upload_prompt_requires_thread() {
        let mut app = test_app();
        app.open_upload_prompt();
        assert!(!app.show_upload_prompt);
        assert_eq!(app.status.as_ref().unwrap().kind, StatusKind::Warning);

        app.session.set_thread_id("t1");
        app.open_upload_prompt();
        assert!(app.show_upload_prompt);
    }

    #[test]
    fn test_task_result_without_pending_task_is_ignored() {
        let mut app = test_app();
        app.session.set_thread_id("t1");
        app.apply_task_result(TaskResult::Reset(Ok(ResetOutcome {
            thread_id: "stray".into(),
            documents_cleared: false,
        })));
        app.apply_task_result(TaskResult::Cleared(true));

        assert_eq!(app.session.thread_id(), Some("t1"));
        assert!(app.status.is_none());
    }

    #[tokio::test]
    async fn test_upload_runs_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut app = App::new(AgentClient::new("http://127.0.0.1:9"), tx);
        app.session.set_thread_id("t1");

        assert!(app.upload_file(Path::new("/definitely/not/here.pdf")));
        assert_eq!(app.phase, Phase::Uploading);
        assert!(!app.is_idle());
        // a second action is refused while the first is running
        assert!(!app.upload_file(Path::new("/definitely/not/here.pdf")));

        match rx.recv().await {
            Some(AppEvent::Task(result)) => app.apply_task_result(result),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(app.is_idle());
        assert_eq!(app.phase, Phase::Idle);
        assert_eq!(app.status.as_ref().unwrap().kind, StatusKind::Error);
    }

    #[test]
    fn test_scroll_to_bottom_saturates_on_huge_turns() {
        let mut app = test_app();
        app.chat_width = 1;
        app.chat_height = 4;
        app.session.push_user("x".repeat(200_000));
        app.scroll_chat_to_bottom();
        assert_eq!(app.chat_scroll, u16::MAX - 4);
    }

    #[test]
    fn test_scroll_to_bottom_counts_wrapped_lines() {
        let mut app = test_app();
        app.chat_width = 10;
        app.chat_height = 4;
        app.session.push_user("x".repeat(25));
        app.scroll_chat_to_bottom();
        // greeting: 1 + 2 + 1, user: 1 + 3 + 1 => 9 lines, 4 visible
        assert_eq!(app.chat_scroll, 5);
    }
}
