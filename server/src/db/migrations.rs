use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: Chat sessions and messages

CREATE TABLE chat_sessions (
    id TEXT PRIMARY KEY,
    property_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE chat_session_participants (
    chat_session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (chat_session_id, user_id),
    FOREIGN KEY (chat_session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
);

CREATE INDEX idx_participants_user ON chat_session_participants(user_id);

-- Messages cascade with their session; a sender must be a participant of it.
CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    chat_session_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    FOREIGN KEY (chat_session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (chat_session_id, sender_id)
        REFERENCES chat_session_participants(chat_session_id, user_id)
);

CREATE INDEX idx_messages_session_created ON messages(chat_session_id, created_at);
CREATE INDEX idx_messages_sender_created ON messages(sender_id, created_at);
",
    )])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
