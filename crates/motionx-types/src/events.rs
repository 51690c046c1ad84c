use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tables that publish row-level change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Posts,
    ChatRooms,
    CommunityMembers,
    Messages,
    Conversations,
    ConversationParticipants,
    DirectMessages,
    Follows,
    Likes,
    Shares,
    Comments,
    Notifications,
    TypingIndicators,
    MessageReads,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change, carrying the full new and/or old row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Value>,
    pub old: Option<Value>,
    pub commit_timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn insert<T: Serialize>(table: Table, row: &T) -> Self {
        Self {
            table,
            kind: ChangeKind::Insert,
            new: serde_json::to_value(row).ok(),
            old: None,
            commit_timestamp: Utc::now(),
        }
    }

    pub fn update<T: Serialize>(table: Table, old: &T, new: &T) -> Self {
        Self {
            table,
            kind: ChangeKind::Update,
            new: serde_json::to_value(new).ok(),
            old: serde_json::to_value(old).ok(),
            commit_timestamp: Utc::now(),
        }
    }

    pub fn delete<T: Serialize>(table: Table, old: &T) -> Self {
        Self {
            table,
            kind: ChangeKind::Delete,
            new: None,
            old: serde_json::to_value(old).ok(),
            commit_timestamp: Utc::now(),
        }
    }

    /// The row the event is about: `new` for inserts/updates, `old` for deletes.
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::Delete => self.old.as_ref(),
            _ => self.new.as_ref().or(self.old.as_ref()),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Value> {
        self.row().and_then(|row| row.get(name))
    }

    pub fn uuid_column(&self, name: &str) -> Option<Uuid> {
        self.column(name)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn decode_new<T: DeserializeOwned>(&self) -> Option<T> {
        self.new.clone().and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn decode_old<T: DeserializeOwned>(&self) -> Option<T> {
        self.old.clone().and_then(|v| serde_json::from_value(v).ok())
    }
}

/// Equality predicate on one column, e.g. `room_id=eq.<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnEq {
    pub column: String,
    pub value: String,
}

/// Which change events a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub table: Table,
    /// `None` means every kind.
    pub event: Option<ChangeKind>,
    pub eq: Option<ColumnEq>,
}

impl ChangeFilter {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            event: None,
            eq: None,
        }
    }

    pub fn on(mut self, kind: ChangeKind) -> Self {
        self.event = Some(kind);
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.eq = Some(ColumnEq {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(kind) = self.event {
            if event.kind != kind {
                return false;
            }
        }
        match &self.eq {
            None => true,
            Some(ColumnEq { column, value }) => match event.column(column) {
                Some(Value::String(s)) => s == value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == *value,
            },
        }
    }
}

/// Commands sent FROM client TO server over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the connection with a session token
    Identify { token: String },

    /// Start receiving events matching `filter`, tagged with `topic`
    Subscribe { topic: String, filter: ChangeFilter },

    /// Stop a previously opened topic
    Unsubscribe { topic: String },
}

/// Messages sent over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// A subscription is live; events after this point are delivered
    Subscribed { topic: String },

    /// A change matching the topic's filter
    Change { topic: String, event: ChangeEvent },

    Error { message: String },
}
