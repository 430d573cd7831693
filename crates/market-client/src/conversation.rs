//! In-memory conversations built from realtime chat events.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::realtime::RealtimeEvent;

/// Event carrying a new chat message.
pub const CHAT_MESSAGE_EVENT: &str = "chat:message";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub text: String,
    pub time: String,
    #[serde(default)]
    pub viewed: bool,
    pub user: ChatUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub chats: Vec<Chat>,
    pub peer_profile: ChatUser,
}

/// Payload of a [`CHAT_MESSAGE_EVENT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdate {
    pub conversation_id: String,
    pub chat: Chat,
    pub peer_profile: ChatUser,
}

/// Conversations in arrival order.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: RwLock<Vec<Conversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the chat to its conversation, creating the conversation on
    /// first sight.
    pub fn apply(&self, update: ChatUpdate) {
        let mut conversations = self.conversations.write();
        match conversations
            .iter_mut()
            .find(|c| c.id == update.conversation_id)
        {
            Some(conversation) => conversation.chats.push(update.chat),
            None => conversations.push(Conversation {
                id: update.conversation_id,
                chats: vec![update.chat],
                peer_profile: update.peer_profile,
            }),
        }
    }

    /// Apply a realtime event. Returns whether it was a chat message.
    pub fn apply_event(&self, event: &RealtimeEvent) -> Result<bool, serde_json::Error> {
        if event.name != CHAT_MESSAGE_EVENT {
            return Ok(false);
        }
        let update = ChatUpdate::deserialize(&event.payload)?;
        self.apply(update);
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn all(&self) -> Vec<Conversation> {
        self.conversations.read().clone()
    }

    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }

    pub fn clear(&self) {
        self.conversations.write().clear();
    }

    /// Feed the store from `events` until `cancel` fires or the sender is gone.
    pub async fn follow(
        self: Arc<Self>,
        mut events: broadcast::Receiver<RealtimeEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Err(error) = self.apply_event(&event) {
                        warn!(error = %error, "Malformed chat message");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Conversation feed lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Conversation feed stopped");
    }
}
