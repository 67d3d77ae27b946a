use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stable identifier of a message in the log
pub type MessageId = String;

/// Who a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    AgentLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Link,
}

/// Target of a link message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub url: String,
    pub alias: String,
}

/// One entry in the conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub kind: MessageKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only, ordered conversation log.
///
/// Cloning gives another handle to the same log. Every mutation is visible to
/// all handles as soon as the call returns.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new message and return its identifier
    pub fn append(
        &self,
        role: Role,
        text: impl Into<String>,
        kind: MessageKind,
        link: Option<LinkTarget>,
    ) -> MessageId {
        let id = uuid::Uuid::new_v4().to_string();
        let (url, alias) = match link {
            Some(link) => (Some(link.url), Some(link.alias)),
            None => (None, None),
        };

        self.messages.write().push(Message {
            id: id.clone(),
            role,
            kind,
            text: text.into(),
            url,
            alias,
            timestamp: Utc::now(),
        });

        id
    }

    /// Replace or append to the text of an existing message.
    ///
    /// Returns false if no message has that identifier.
    pub fn update_live(&self, id: &str, text: &str, replace: bool) -> bool {
        let mut messages = self.messages.write();
        // Live messages are almost always at the tail
        match messages.iter_mut().rev().find(|m| m.id == id) {
            Some(message) => {
                if replace {
                    message.text = text.to_string();
                } else {
                    message.text.push_str(text);
                }
                true
            }
            None => false,
        }
    }

    /// Clear the log
    pub fn reset(&self) {
        self.messages.write().clear();
    }

    /// Copy of the log in insertion order
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Message> {
        self.messages.read().iter().find(|m| m.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let store = MessageStore::new();
        let a = store.append(Role::User, "hi", MessageKind::Text, None);
        let b = store.append(Role::Agent, "hello", MessageKind::Text, None);

        let messages = store.snapshot();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, a);
        assert_eq!(messages[1].id, b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_live_append_and_replace() {
        let store = MessageStore::new();
        let id = store.append(Role::Agent, "Hel", MessageKind::Text, None);

        assert!(store.update_live(&id, "lo", false));
        assert_eq!(store.get(&id).unwrap().text, "Hello");

        assert!(store.update_live(&id, "Bye", true));
        assert_eq!(store.get(&id).unwrap().text, "Bye");
    }

    #[test]
    fn test_update_unknown_id() {
        let store = MessageStore::new();
        assert!(!store.update_live("missing", "x", true));
    }

    #[test]
    fn test_clones_share_the_log() {
        let store = MessageStore::new();
        let reader = store.clone();
        store.append(Role::User, "hi", MessageKind::Text, None);
        assert_eq!(reader.len(), 1);

        store.reset();
        assert!(reader.is_empty());
    }

    #[test]
    fn test_link_message_serialization() {
        let store = MessageStore::new();
        store.append(
            Role::AgentLink,
            "Docs",
            MessageKind::Link,
            Some(LinkTarget {
                url: "https://example.com".to_string(),
                alias: "Docs".to_string(),
            }),
        );

        let json = serde_json::to_value(&store.snapshot()[0]).unwrap();
        assert_eq!(json["role"], "agent_link");
        assert_eq!(json["kind"], "link");
        assert_eq!(json["url"], "https://example.com");
        assert_eq!(json["alias"], "Docs");
    }

    #[test]
    fn test_text_message_omits_link_fields() {
        let store = MessageStore::new();
        store.append(Role::User, "hi", MessageKind::Text, None);
        let json = serde_json::to_value(&store.snapshot()[0]).unwrap();
        assert!(json.get("url").is_none());
        assert_eq!(json["role"], "user");
    }
}
