//! Chat persistence: the `ChatStore` seam used by the chat hub and its
//! SQLite implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::chat::{ChatSession, ChatSessionId, Message, NewMessage, StoredMessage};
use crate::db::DbPool;
use crate::hub::registry::UserId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chat session {0} not found")]
    SessionNotFound(ChatSessionId),

    #[error("user {user} is not a participant of chat session {session}")]
    NotParticipant { session: ChatSessionId, user: UserId },

    #[error("a chat session needs at least one participant")]
    NoParticipants,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("stored timestamp is invalid: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Persists chat messages on behalf of the chat hub.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Store a new message. On success returns it together with the
    /// participants of its session, who are the fan-out recipients.
    async fn save(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;
}

/// `ChatStore` backed by the shared SQLite connection.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: DbPool,
}

impl SqliteChatStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Open a chat session between `participants`, optionally about a property.
    pub async fn create_session(
        &self,
        participants: &[UserId],
        property_id: Option<&str>,
    ) -> Result<ChatSession, StoreError> {
        let mut participants = participants.to_vec();
        participants.sort();
        participants.dedup();
        if participants.is_empty() {
            return Err(StoreError::NoParticipants);
        }
        let property_id = property_id.map(str::to_string);

        self.run(move |conn| {
            let id = ChatSessionId::new(Uuid::now_v7().to_string());
            let created_at = Utc::now().trunc_subsecs(6);
            let created_at_text = format_timestamp(&created_at);

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_sessions (id, property_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.as_str(), property_id, created_at_text],
            )?;
            for user in &participants {
                tx.execute(
                    "INSERT INTO chat_session_participants (chat_session_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id.as_str(), user.as_str(), created_at_text],
                )?;
            }
            tx.commit()?;

            Ok(ChatSession {
                id,
                property_id,
                participants,
                created_at,
            })
        })
        .await
    }

    pub async fn participants(&self, session: &ChatSessionId) -> Result<Vec<UserId>, StoreError> {
        let session = session.clone();
        self.run(move |conn| {
            ensure_session(conn, &session)?;
            load_participants(conn, &session)
        })
        .await
    }

    /// The latest `limit` messages of a session, oldest first.
    pub async fn recent_messages(
        &self,
        session: &ChatSessionId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let session = session.clone();
        self.run(move |conn| {
            ensure_session(conn, &session)?;
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, body, created_at FROM messages
                 WHERE chat_session_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![session.as_str(), limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut messages = rows
                .into_iter()
                .map(|(id, sender_id, body, created_at)| {
                    Ok(Message {
                        id,
                        session_id: session.clone(),
                        sender_id: UserId::new(sender_id),
                        body,
                        created_at: parse_timestamp(&created_at)?,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut *conn)
        })
        .await?
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        self.run(move |conn| {
            ensure_session(conn, &message.session_id)?;
            let participants = load_participants(conn, &message.session_id)?;
            if !participants.contains(&message.sender_id) {
                return Err(StoreError::NotParticipant {
                    session: message.session_id,
                    user: message.sender_id,
                });
            }

            let id = Uuid::now_v7().to_string();
            let created_at = Utc::now().trunc_subsecs(6);
            conn.execute(
                "INSERT INTO messages (id, chat_session_id, sender_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    id,
                    message.session_id.as_str(),
                    message.sender_id.as_str(),
                    message.body,
                    format_timestamp(&created_at),
                ],
            )?;

            Ok(StoredMessage {
                message: Message {
                    id,
                    session_id: message.session_id,
                    sender_id: message.sender_id,
                    body: message.body,
                    created_at,
                },
                participants,
            })
        })
        .await
    }
}

fn ensure_session(conn: &Connection, session: &ChatSessionId) -> Result<(), StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM chat_sessions WHERE id = ?1",
            rusqlite::params![session.as_str()],
            |_| Ok(()),
        )
        .optional()?;
    found.ok_or_else(|| StoreError::SessionNotFound(session.clone()))
}

fn load_participants(
    conn: &Connection,
    session: &ChatSessionId,
) -> Result<Vec<UserId>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_session_participants
         WHERE chat_session_id = ?1 ORDER BY user_id",
    )?;
    let users = stmt
        .query_map(rusqlite::params![session.as_str()], |row| {
            row.get::<_, String>(0).map(UserId::new)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

/// Fixed-width RFC 3339 so lexical order in SQLite matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}
