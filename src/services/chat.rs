use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ChatApi, ChatReply, RemoteMessage};
use crate::models::{ChatSession, Message, SessionSummary};
use crate::services::conversation::{normalize_history, summarize};
use crate::services::markdown::strip_emphasis;
use crate::services::settings::SessionLookup;

pub const EMPTY_REPLY_FALLBACK: &str = "I'm sorry, I didn't get that. Could you rephrase?";
pub const CONNECTION_ERROR_REPLY: &str =
    "Sorry, I'm having trouble connecting right now. Please check your connection and try again.";
pub const REJECTED_REPLY_FALLBACK: &str =
    "Sorry, I couldn't process that request. Please try again.";

/// Canned prompts offered under the input box.
pub const QUICK_QUESTIONS: [&str; 4] = [
    "How do I treat rice blast?",
    "What causes yellow spots on tomato leaves?",
    "How can I prevent fungal diseases in my crops?",
    "When should I apply fertilizer to my plants?",
];

pub fn quick_question(index: usize) -> Option<&'static str> {
    QUICK_QUESTIONS.get(index).copied()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPhase {
    Idle,
    Sending,
    Loading,
    Active(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum HistoryState {
    #[default]
    NotLoaded,
    Loading,
    /// The fetch worked and there is nothing to show.
    Empty,
    Loaded(Vec<SessionSummary>),
    /// The fetch failed; the view offers a retry.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Blank input, or another send is still waiting for its reply.
    Ignored,
    Replied(Message),
    /// The request failed and `reply` explains it in the conversation.
    Failed { reply: Message, error: String },
    /// The manager was closed or the conversation replaced before the reply.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewSessionOutcome {
    Cleared,
    NeedsConfirmation,
    Busy,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Another request is still in progress")]
    Busy,

    #[error("Chat session not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Please log in again")]
    Unauthorized,

    #[error("Connection problem: {0}")]
    Transport(String),

    #[error("Chat is closed")]
    Closed,
}

impl From<ApiError> for ChatError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotFound(msg) => ChatError::NotFound(msg),
            ApiError::Rejected(msg) => ChatError::Rejected(
                msg.unwrap_or_else(|| "The server rejected the request".to_string()),
            ),
            ApiError::Validation(messages) => ChatError::Rejected(messages.join("\n")),
            ApiError::Unauthorized => ChatError::Unauthorized,
            other => ChatError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatSnapshot {
    pub session_id: Option<String>,
    /// Oldest first.
    pub messages: Vec<Message>,
    pub phase: ChatPhase,
}

#[derive(Debug, Default)]
struct ConversationState {
    session: ChatSession,
    sending: bool,
    loading: bool,
    /// Bumped whenever the conversation is replaced so replies addressed to
    /// the old one can be recognised and dropped.
    epoch: u64,
}

impl ConversationState {
    fn phase(&self) -> ChatPhase {
        if self.sending {
            ChatPhase::Sending
        } else if self.loading {
            ChatPhase::Loading
        } else if let Some(id) = &self.session.session_id {
            ChatPhase::Active(id.clone())
        } else {
            ChatPhase::Idle
        }
    }

    fn replace(&mut self, session: ChatSession) {
        self.session = session;
        self.sending = false;
        self.epoch += 1;
    }
}

#[derive(Debug, Default)]
struct HistorySlice {
    state: HistoryState,
    embedded: HashMap<String, Vec<RemoteMessage>>,
    open: bool,
}

struct PendingSend {
    text: String,
    session_id: Option<String>,
    epoch: u64,
}

/// Clears the sending flag if the send future is dropped before it finishes.
struct SendGuard<'a> {
    manager: &'a ChatSessionManager,
    epoch: u64,
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.manager.conversation();
        if state.epoch == self.epoch {
            state.sending = false;
        }
    }
}

struct LoadGuard<'a> {
    manager: &'a ChatSessionManager,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.manager.conversation().loading = false;
    }
}

/// Owns the active conversation and the history list for one chat screen.
///
/// The conversation (`messages` and `session_id`) and the history list sit
/// behind separate locks, so a history fetch can run while a send waits for
/// its reply. Locks are never held across an await.
pub struct ChatSessionManager {
    api: Arc<dyn ChatApi>,
    lookup: SessionLookup,
    conversation: Mutex<ConversationState>,
    history: Mutex<HistorySlice>,
    cancel: CancellationToken,
}

impl ChatSessionManager {
    pub fn new(api: Arc<dyn ChatApi>, lookup: SessionLookup) -> Self {
        Self {
            api,
            lookup,
            conversation: Mutex::new(ConversationState::default()),
            history: Mutex::new(HistorySlice::default()),
            cancel: CancellationToken::new(),
        }
    }

    fn conversation(&self) -> MutexGuard<'_, ConversationState> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn history(&self) -> MutexGuard<'_, HistorySlice> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.conversation();
        ChatSnapshot {
            session_id: state.session.session_id.clone(),
            messages: state.session.messages.clone(),
            phase: state.phase(),
        }
    }

    /// Newest first, ready for an inverted list.
    pub fn display_messages(&self) -> Vec<Message> {
        self.conversation().session.display_order()
    }

    pub fn session_id(&self) -> Option<String> {
        self.conversation().session.session_id.clone()
    }

    pub fn phase(&self) -> ChatPhase {
        self.conversation().phase()
    }

    /// The send affordance should be disabled while this is true.
    pub fn is_sending(&self) -> bool {
        self.conversation().sending
    }

    pub fn history_state(&self) -> HistoryState {
        self.history().state.clone()
    }

    pub fn is_history_open(&self) -> bool {
        self.history().open
    }

    pub fn close_history(&self) {
        self.history().open = false;
    }

    /// Abandon in-flight requests. Nothing that completes later touches the
    /// state again.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let Some(pending) = self.begin_send(text) else {
            return SendOutcome::Ignored;
        };
        let _guard = SendGuard {
            manager: self,
            epoch: pending.epoch,
        };

        let request = async {
            match pending.session_id.as_deref() {
                None => self.api.start_chat(&pending.text).await,
                Some(id) => self.api.continue_chat(id, &pending.text).await,
            }
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!("Chat closed while waiting for a reply");
                return SendOutcome::Abandoned;
            }
            result = request => result,
        };

        self.finish_send(pending, result)
    }

    fn begin_send(&self, text: &str) -> Option<PendingSend> {
        if self.is_closed() {
            return None;
        }
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let mut state = self.conversation();
        if state.sending || state.loading {
            tracing::debug!("Ignoring send while another request is in flight");
            return None;
        }

        state
            .session
            .messages
            .push(Message::local_user(text.to_string()));
        state.sending = true;

        Some(PendingSend {
            text: text.to_string(),
            session_id: state.session.session_id.clone(),
            epoch: state.epoch,
        })
    }

    fn finish_send(&self, pending: PendingSend, result: Result<ChatReply, ApiError>) -> SendOutcome {
        let mut state = self.conversation();
        if state.epoch != pending.epoch {
            tracing::debug!("Dropping reply for a conversation that was replaced");
            return SendOutcome::Abandoned;
        }
        state.sending = false;

        match result {
            Ok(reply) => {
                if pending.session_id.is_none() {
                    match reply.session_id.filter(|id| !id.trim().is_empty()) {
                        Some(id) => {
                            tracing::debug!("Started chat session {}", id);
                            state.session.session_id = Some(id);
                        }
                        None => tracing::warn!("Start reply carried no session id"),
                    }
                }

                let text = reply
                    .response
                    .map(|r| strip_emphasis(&r))
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| {
                        tracing::warn!("Empty chat reply, using fallback");
                        EMPTY_REPLY_FALLBACK.to_string()
                    });

                let message = Message::local_bot(text);
                state.session.messages.push(message.clone());
                SendOutcome::Replied(message)
            }
            Err(e) => {
                tracing::error!("Chat request failed: {}", e);
                let text = match &e {
                    ApiError::Rejected(Some(msg)) if !msg.trim().is_empty() => msg.clone(),
                    e if e.is_rejection() => REJECTED_REPLY_FALLBACK.to_string(),
                    _ => CONNECTION_ERROR_REPLY.to_string(),
                };

                let reply = Message::local_bot(text);
                state.session.messages.push(reply.clone());
                SendOutcome::Failed {
                    reply,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Drop the active conversation. A non-empty one is only cleared when
    /// `confirmed` is set.
    pub fn start_new_session(&self, confirmed: bool) -> NewSessionOutcome {
        let mut state = self.conversation();
        if state.sending || state.loading {
            return NewSessionOutcome::Busy;
        }
        if !state.session.is_empty() && !confirmed {
            return NewSessionOutcome::NeedsConfirmation;
        }
        state.replace(ChatSession::default());
        NewSessionOutcome::Cleared
    }

    pub async fn load_history_list(&self) -> HistoryState {
        if self.is_closed() {
            return self.history_state();
        }
        let previous = {
            let mut history = self.history();
            history.open = true;
            std::mem::replace(&mut history.state, HistoryState::Loading)
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!("Chat closed while loading history");
                self.history().state = previous.clone();
                return previous;
            }
            result = self.api.chat_history() => result,
        };

        let mut history = self.history();
        let state = match result {
            Ok(sessions) if sessions.is_empty() => {
                history.embedded.clear();
                HistoryState::Empty
            }
            Ok(sessions) => {
                let now = Utc::now();
                let summaries = sessions.iter().map(|s| summarize(s, now)).collect();
                history.embedded = sessions
                    .into_iter()
                    .map(|s| (s.session_id, s.messages))
                    .collect();
                HistoryState::Loaded(summaries)
            }
            Err(e) => {
                tracing::error!("Failed to load chat history: {}", e);
                HistoryState::Failed(ChatError::from(e).to_string())
            }
        };
        history.state = state.clone();
        state
    }

    /// Replace the active conversation with a stored one.
    pub async fn load_session(&self, session_id: &str) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Closed);
        }
        {
            let mut state = self.conversation();
            if state.loading {
                return Err(ChatError::Busy);
            }
            state.loading = true;
        }
        let _guard = LoadGuard { manager: self };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ChatError::Closed),
            result = self.fetch_session_records(session_id) => result,
        };

        let records = result.map_err(|e| {
            tracing::error!("Failed to load chat session {}: {}", session_id, e);
            ChatError::from(e)
        })?;

        let messages = normalize_history(records, Utc::now());
        tracing::debug!("Loaded {} messages for session {}", messages.len(), session_id);

        self.conversation()
            .replace(ChatSession::new(session_id.to_string(), messages));
        self.close_history();
        Ok(())
    }

    async fn fetch_session_records(&self, session_id: &str) -> Result<Vec<RemoteMessage>, ApiError> {
        match self.lookup {
            SessionLookup::Endpoint => self.api.chat_session(session_id).await,
            SessionLookup::Embedded => {
                let records = {
                    let history = self.history();
                    history.embedded.get(session_id).cloned()
                };
                records.ok_or_else(|| {
                    ApiError::NotFound(format!("Session {} is not in the loaded history", session_id))
                })
            }
        }
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), ChatError> {
        if self.is_closed() {
            return Err(ChatError::Closed);
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return Err(ChatError::Closed),
            result = self.api.delete_chat_session(session_id) => result,
        };
        if let Err(e) = result {
            tracing::error!("Failed to delete chat session {}: {}", session_id, e);
            return Err(e.into());
        }

        {
            let mut history = self.history();
            history.embedded.remove(session_id);
            let now_empty = match &mut history.state {
                HistoryState::Loaded(summaries) => {
                    summaries.retain(|s| s.session_id != session_id);
                    summaries.is_empty()
                }
                _ => false,
            };
            if now_empty {
                history.state = HistoryState::Empty;
            }
        }

        let mut state = self.conversation();
        if state.session.session_id.as_deref() == Some(session_id) {
            tracing::debug!("Deleted the active session {}, clearing", session_id);
            state.replace(ChatSession::default());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::api::RemoteSession;
    use crate::models::{RecordId, Sender};

    #[derive(Default)]
    struct ScriptedApi {
        replies: Mutex<VecDeque<Result<ChatReply, ApiError>>>,
        histories: Mutex<VecDeque<Result<Vec<RemoteSession>, ApiError>>>,
        sessions: Mutex<HashMap<String, Vec<RemoteMessage>>>,
        deletes: Mutex<VecDeque<Result<(), ApiError>>>,
        calls: Mutex<Vec<String>>,
        gated: bool,
        gate_history: bool,
        entered: Notify,
        release: Notify,
    }

    impl ScriptedApi {
        fn gated() -> Self {
            Self {
                gated: true,
                ..Self::default()
            }
        }

        fn reply(self, session_id: Option<&str>, text: Option<&str>) -> Self {
            self.replies.lock().unwrap().push_back(Ok(ChatReply {
                session_id: session_id.map(str::to_string),
                response: text.map(str::to_string),
            }));
            self
        }

        fn fail(self, error: ApiError) -> Self {
            self.replies.lock().unwrap().push_back(Err(error));
            self
        }

        fn history(self, result: Result<Vec<RemoteSession>, ApiError>) -> Self {
            self.histories.lock().unwrap().push_back(result);
            self
        }

        fn session(self, id: &str, records: Vec<RemoteMessage>) -> Self {
            self.sessions.lock().unwrap().insert(id.to_string(), records);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        async fn next_reply(&self) -> Result<ChatReply, ApiError> {
            if self.gated {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatReply::default()))
        }
    }

    #[async_trait]
    impl ChatApi for ScriptedApi {
        async fn start_chat(&self, text: &str) -> Result<ChatReply, ApiError> {
            self.calls.lock().unwrap().push(format!("start:{}", text));
            self.next_reply().await
        }

        async fn continue_chat(&self, session_id: &str, text: &str) -> Result<ChatReply, ApiError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("continue:{}:{}", session_id, text));
            self.next_reply().await
        }

        async fn chat_history(&self) -> Result<Vec<RemoteSession>, ApiError> {
            self.calls.lock().unwrap().push("history".to_string());
            if self.gate_history {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.histories
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn chat_session(&self, session_id: &str) -> Result<Vec<RemoteMessage>, ApiError> {
            self.calls.lock().unwrap().push(format!("session:{}", session_id));
            self.sessions
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .ok_or_else(|| ApiError::NotFound(session_id.to_string()))
        }

        async fn delete_chat_session(&self, session_id: &str) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(format!("delete:{}", session_id));
            self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn record(id: i64, text: &str, sender: &str, timestamp: &str) -> RemoteMessage {
        RemoteMessage {
            id: Some(RecordId::Number(id)),
            message: text.to_string(),
            sender: sender.to_string(),
            timestamp: Some(timestamp.to_string()),
        }
    }

    fn four_message_session() -> Vec<RemoteMessage> {
        vec![
            record(4, "Remove infected leaves", "bot", "2024-05-01T10:03:00Z"),
            record(3, "What else?", "user", "2024-05-01T10:02:00Z"),
            record(2, "Looks like blight", "bot", "2024-05-01T10:01:00Z"),
            record(1, "Brown spots on leaves", "user", "2024-05-01T10:00:00Z"),
        ]
    }

    fn remote_session(id: &str, records: Vec<RemoteMessage>) -> RemoteSession {
        RemoteSession {
            session_id: id.to_string(),
            messages: records,
            message_count: None,
        }
    }

    fn manager(api: &Arc<ScriptedApi>) -> ChatSessionManager {
        ChatSessionManager::new(api.clone(), SessionLookup::Endpoint)
    }

    #[tokio::test]
    async fn test_user_message_appears_before_reply() {
        let api = Arc::new(ScriptedApi::gated().reply(Some("abc"), Some("Hello!")));
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_message("hi").await })
        };
        api.entered.notified().await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        let newest = snapshot.messages.last().unwrap();
        assert_eq!(newest.text(), "hi");
        assert_eq!(newest.sender(), &Sender::User);
        assert!(newest.id().is_local());
        assert_eq!(snapshot.phase, ChatPhase::Sending);
        assert!(manager.is_sending());

        // A second send while the first is in flight changes nothing.
        assert_eq!(manager.send_message("again").await, SendOutcome::Ignored);
        assert_eq!(manager.snapshot().messages.len(), 1);

        api.release.notify_one();
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.text() == "Hello!"));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.phase, ChatPhase::Active("abc".to_string()));
        assert_eq!(api.calls(), vec!["start:hi"]);
    }

    #[tokio::test]
    async fn test_session_id_adopted_until_new_chat() {
        let api = Arc::new(
            ScriptedApi::default()
                .reply(Some("abc"), Some("Hi there!"))
                .reply(None, Some("Sure."))
                .reply(Some("xyz"), Some("Fresh start.")),
        );
        let manager = manager(&api);

        manager.send_message("hi").await;
        manager.send_message("tell me more").await;
        assert_eq!(manager.session_id().as_deref(), Some("abc"));

        assert_eq!(manager.start_new_session(true), NewSessionOutcome::Cleared);
        assert_eq!(manager.phase(), ChatPhase::Idle);
        assert!(manager.snapshot().messages.is_empty());

        manager.send_message("new topic").await;
        assert_eq!(
            api.calls(),
            vec!["start:hi", "continue:abc:tell me more", "start:new topic"]
        );
        assert_eq!(manager.session_id().as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_failed_first_send_adds_error_reply() {
        let api = Arc::new(
            ScriptedApi::default()
                .fail(ApiError::NetworkError("connection refused".into()))
                .reply(Some("abc"), Some("Back online")),
        );
        let manager = manager(&api);

        let outcome = manager.send_message("hello").await;
        match outcome {
            SendOutcome::Failed { reply, .. } => {
                assert_eq!(reply.text(), CONNECTION_ERROR_REPLY);
                assert_eq!(reply.sender(), &Sender::bot());
            }
            other => panic!("Expected failure, got {:?}", other),
        }

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].text(), "hello");
        assert_eq!(snapshot.phase, ChatPhase::Idle);

        // Retry is manual and starts the conversation again.
        manager.send_message("hello").await;
        assert_eq!(manager.snapshot().messages.len(), 4);
        assert_eq!(api.calls(), vec!["start:hello", "start:hello"]);
        assert_eq!(manager.phase(), ChatPhase::Active("abc".into()));
    }

    #[tokio::test]
    async fn test_failure_in_active_session_keeps_session() {
        let api = Arc::new(
            ScriptedApi::default()
                .reply(Some("abc"), Some("Hi"))
                .fail(ApiError::Timeout),
        );
        let manager = manager(&api);

        manager.send_message("hi").await;
        manager.send_message("still there?").await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.messages[3].text(), CONNECTION_ERROR_REPLY);
        assert_eq!(snapshot.phase, ChatPhase::Active("abc".into()));
    }

    #[tokio::test]
    async fn test_reply_text_handling() {
        let api = Arc::new(
            ScriptedApi::default()
                .reply(Some("abc"), Some("**Blast** is a *fungal* disease"))
                .reply(None, Some("   "))
                .reply(None, None)
                .fail(ApiError::Rejected(Some("Daily limit reached".into())))
                .fail(ApiError::Rejected(None)),
        );
        let manager = manager(&api);

        for text in ["a", "b", "c", "d", "e"] {
            manager.send_message(text).await;
        }

        let bot_texts: Vec<String> = manager
            .snapshot()
            .messages
            .iter()
            .filter(|m| !m.sender().is_user())
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(
            bot_texts,
            vec![
                "Blast is a fungal disease",
                EMPTY_REPLY_FALLBACK,
                EMPTY_REPLY_FALLBACK,
                "Daily limit reached",
                REJECTED_REPLY_FALLBACK,
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let api = Arc::new(ScriptedApi::default());
        let manager = manager(&api);

        assert_eq!(manager.send_message("   \n").await, SendOutcome::Ignored);
        assert!(manager.snapshot().messages.is_empty());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_new_session_needs_confirmation() {
        let api = Arc::new(ScriptedApi::default().reply(Some("abc"), Some("Hi")));
        let manager = manager(&api);

        assert_eq!(manager.start_new_session(false), NewSessionOutcome::Cleared);

        manager.send_message("hi").await;
        assert_eq!(manager.start_new_session(false), NewSessionOutcome::NeedsConfirmation);
        assert_eq!(manager.snapshot().messages.len(), 2);

        assert_eq!(manager.start_new_session(true), NewSessionOutcome::Cleared);
        assert!(manager.session_id().is_none());
    }

    #[tokio::test]
    async fn test_new_session_refused_while_sending() {
        let api = Arc::new(ScriptedApi::gated().reply(Some("abc"), Some("Hi")));
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_message("hi").await })
        };
        api.entered.notified().await;

        assert_eq!(manager.start_new_session(true), NewSessionOutcome::Busy);

        api.release.notify_one();
        task.await.unwrap();
        assert_eq!(manager.snapshot().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_load_session_sorts_messages() {
        let api = Arc::new(ScriptedApi::default().session(
            "s1",
            vec![
                record(2, "later", "bot", "2024-05-01T10:00:05Z"),
                record(1, "earlier", "user", "2024-05-01T10:00:00Z"),
            ],
        ));
        let manager = manager(&api);

        manager.load_session("s1").await.unwrap();

        let snapshot = manager.snapshot();
        let texts: Vec<&str> = snapshot.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["earlier", "later"]);
        assert_eq!(snapshot.phase, ChatPhase::Active("s1".into()));

        let display: Vec<String> = manager
            .display_messages()
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        assert_eq!(display, vec!["later", "earlier"]);
    }

    #[tokio::test]
    async fn test_load_session_replaces_and_continues() {
        let api = Arc::new(
            ScriptedApi::default()
                .reply(Some("old"), Some("Hi"))
                .reply(None, Some("Continuing"))
                .session("s1", four_message_session()),
        );
        let manager = manager(&api);

        manager.send_message("hi").await;
        manager.load_session("s1").await.unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert!(snapshot.messages.iter().all(|m| !m.id().is_local()));

        manager.send_message("and then?").await;
        assert_eq!(api.calls().last().unwrap(), "continue:s1:and then?");
        assert_eq!(manager.snapshot().messages.len(), 6);
    }

    #[tokio::test]
    async fn test_load_session_failure_keeps_conversation() {
        let api = Arc::new(ScriptedApi::default().reply(Some("abc"), Some("Hi")));
        let manager = manager(&api);
        manager.send_message("hi").await;
        let before = manager.snapshot();

        let err = manager.load_session("missing").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(manager.snapshot(), before);
        assert_eq!(manager.phase(), ChatPhase::Active("abc".into()));
    }

    #[tokio::test]
    async fn test_delete_active_session_clears_conversation() {
        let api = Arc::new(
            ScriptedApi::default()
                .session("s1", four_message_session())
                .history(Ok(vec![
                    remote_session("s1", four_message_session()),
                    remote_session("s2", Vec::new()),
                ])),
        );
        let manager = manager(&api);

        manager.load_history_list().await;
        manager.load_session("s1").await.unwrap();
        assert_eq!(manager.snapshot().messages.len(), 4);

        manager.delete_session("s1").await.unwrap();

        let snapshot = manager.snapshot();
        assert!(snapshot.messages.is_empty());
        assert!(snapshot.session_id.is_none());
        assert_eq!(snapshot.phase, ChatPhase::Idle);
        match manager.history_state() {
            HistoryState::Loaded(summaries) => {
                assert_eq!(summaries.len(), 1);
                assert_eq!(summaries[0].session_id, "s2");
            }
            other => panic!("Expected loaded history, got {:?}", other),
        }

        manager.delete_session("s2").await.unwrap();
        assert_eq!(manager.history_state(), HistoryState::Empty);
    }

    #[tokio::test]
    async fn test_delete_other_session_keeps_conversation() {
        let api = Arc::new(ScriptedApi::default().session("s1", four_message_session()));
        let manager = manager(&api);
        manager.load_session("s1").await.unwrap();

        manager.delete_session("s9").await.unwrap();
        assert_eq!(manager.snapshot().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_delete_failure_changes_nothing() {
        let api = Arc::new(
            ScriptedApi::default()
                .session("s1", four_message_session())
                .history(Ok(vec![remote_session("s1", Vec::new())])),
        );
        api.deletes
            .lock()
            .unwrap()
            .push_back(Err(ApiError::Rejected(Some("Cannot delete".into()))));
        let manager = manager(&api);
        manager.load_history_list().await;
        manager.load_session("s1").await.unwrap();

        let err = manager.delete_session("s1").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot delete");
        assert_eq!(manager.snapshot().messages.len(), 4);
        assert!(matches!(manager.history_state(), HistoryState::Loaded(ref s) if s.len() == 1));
    }

    #[tokio::test]
    async fn test_history_states() {
        let api = Arc::new(
            ScriptedApi::default()
                .reply(Some("abc"), Some("Hi"))
                .history(Ok(Vec::new()))
                .history(Err(ApiError::Timeout))
                .history(Ok(vec![remote_session(
                    "s1",
                    vec![record(1, "Why are my leaves yellow?", "user", "2024-05-01T10:00:00Z")],
                )])),
        );
        let manager = manager(&api);
        manager.send_message("hi").await;
        assert_eq!(manager.history_state(), HistoryState::NotLoaded);

        assert_eq!(manager.load_history_list().await, HistoryState::Empty);
        assert!(manager.is_history_open());

        let failed = manager.load_history_list().await;
        assert!(matches!(failed, HistoryState::Failed(_)));
        assert_eq!(manager.snapshot().messages.len(), 2);
        assert_eq!(manager.session_id().as_deref(), Some("abc"));

        match manager.load_history_list().await {
            HistoryState::Loaded(summaries) => {
                assert_eq!(summaries[0].preview, "Why are my leaves yellow?");
                assert_eq!(summaries[0].message_count, 1);
            }
            other => panic!("Expected loaded history, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embedded_lookup_uses_history_payload() {
        let api = Arc::new(
            ScriptedApi::default().history(Ok(vec![remote_session("s1", four_message_session())])),
        );
        let manager = ChatSessionManager::new(api.clone(), SessionLookup::Embedded);

        let err = manager.load_session("s1").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        manager.load_history_list().await;
        manager.load_session("s1").await.unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.messages[0].text(), "Brown spots on leaves");
        assert!(!manager.is_history_open());
        assert!(!api.calls().iter().any(|c| c.starts_with("session:")));
    }

    #[tokio::test]
    async fn test_history_fetch_during_send() {
        let api = Arc::new(
            ScriptedApi::gated()
                .reply(Some("abc"), Some("Hi"))
                .history(Ok(vec![remote_session("old", Vec::new())])),
        );
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_message("hi").await })
        };
        api.entered.notified().await;

        let history = manager.load_history_list().await;
        assert!(matches!(history, HistoryState::Loaded(ref s) if s.len() == 1));
        assert_eq!(manager.phase(), ChatPhase::Sending);

        api.release.notify_one();
        task.await.unwrap();
        assert_eq!(manager.snapshot().messages.len(), 2);
        assert!(matches!(manager.history_state(), HistoryState::Loaded(_)));
    }

    #[tokio::test]
    async fn test_close_abandons_pending_reply() {
        let api = Arc::new(ScriptedApi::gated().reply(Some("abc"), Some("Hi")));
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_message("hi").await })
        };
        api.entered.notified().await;

        manager.close();
        assert_eq!(task.await.unwrap(), SendOutcome::Abandoned);
        assert_eq!(manager.snapshot().messages.len(), 1);
        assert!(!manager.is_sending());
        assert_eq!(manager.send_message("late").await, SendOutcome::Ignored);
        assert!(matches!(manager.load_session("s1").await, Err(ChatError::Closed)));
    }

    #[tokio::test]
    async fn test_close_during_history_fetch_restores_state() {
        let api = Arc::new(ScriptedApi {
            gate_history: true,
            ..ScriptedApi::default()
        });
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.load_history_list().await })
        };
        api.entered.notified().await;
        assert_eq!(manager.history_state(), HistoryState::Loading);

        manager.close();
        assert_eq!(task.await.unwrap(), HistoryState::NotLoaded);
        assert_eq!(manager.history_state(), HistoryState::NotLoaded);
    }

    #[tokio::test]
    async fn test_reply_for_replaced_conversation_is_dropped() {
        let api = Arc::new(
            ScriptedApi::gated()
                .reply(Some("abc"), Some("Too late"))
                .session("s1", four_message_session()),
        );
        let manager = Arc::new(manager(&api));

        let task = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.send_message("hi").await })
        };
        api.entered.notified().await;

        manager.load_session("s1").await.unwrap();
        api.release.notify_one();

        assert_eq!(task.await.unwrap(), SendOutcome::Abandoned);
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.session_id.as_deref(), Some("s1"));
        assert!(!manager.is_sending());
    }

    #[test]
    fn test_quick_questions() {
        assert_eq!(quick_question(0), Some(QUICK_QUESTIONS[0]));
        assert_eq!(quick_question(QUICK_QUESTIONS.len()), None);
    }

    #[test]
    fn test_api_errors_map_to_chat_errors() {
        assert!(matches!(
            ChatError::from(ApiError::NotFound("s1".into())),
            ChatError::NotFound(_)
        ));
        assert!(matches!(ChatError::from(ApiError::Unauthorized), ChatError::Unauthorized));
        assert!(matches!(ChatError::from(ApiError::Timeout), ChatError::Transport(_)));
        assert_eq!(
            ChatError::from(ApiError::Rejected(None)).to_string(),
            "The server rejected the request"
        );
    }
}
