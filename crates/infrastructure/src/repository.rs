use std::collections::HashSet;

use application::{ChannelMembership, PersistenceClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChannelId, ContentType, Message, MessageId, MessagePayload, MessageTarget, NewMessage,
    RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const MESSAGE_COLUMNS: &str =
    "id, sender_id, recipient_id, channel_id, content, content_type, created_at";

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    recipient_id: Option<Uuid>,
    channel_id: Option<Uuid>,
    content: String,
    content_type: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let target = match (value.recipient_id, value.channel_id) {
            (Some(recipient), None) => MessageTarget::Direct(UserId::from(recipient)),
            (None, Some(channel)) => MessageTarget::Channel(ChannelId::from(channel)),
            _ => {
                return Err(invalid_data(format!(
                    "message {} must have exactly one of recipient_id/channel_id",
                    value.id
                )))
            }
        };
        let content_type =
            ContentType::parse(&value.content_type).map_err(|err| invalid_data(err.to_string()))?;
        let payload = MessagePayload::parse(content_type, value.content)
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            sender_id: UserId::from(value.sender_id),
            target,
            payload,
            created_at: value.created_at,
        })
    }
}

/// PostgreSQL 消息存储
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersistenceClient for PgMessageStore {
    async fn persist_message(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let (recipient_id, channel_id) = match message.target {
            MessageTarget::Direct(recipient) => (Some(Uuid::from(recipient)), None),
            MessageTarget::Channel(channel) => (None, Some(Uuid::from(channel))),
        };

        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, sender_id, recipient_id, channel_id, content, content_type)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(Uuid::from(message.sender_id))
        .bind(recipient_id)
        .bind(channel_id)
        .bind(message.payload.as_str())
        .bind(message.payload.content_type().as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn fetch_message_history(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE (sender_id = $1 AND recipient_id = $2)
               OR (sender_id = $2 AND recipient_id = $1)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(Uuid::from(a))
        .bind(Uuid::from(b))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn fetch_channel_history(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE channel_id = $1
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(Uuid::from(channel_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }
}

/// PostgreSQL 频道目录：频道成员与联系人解析
#[derive(Clone)]
pub struct PgChannelDirectory {
    pool: PgPool,
}

impl PgChannelDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_channel(&self, name: &str) -> Result<ChannelId, RepositoryError> {
        let id: Uuid = sqlx::query_scalar(
            r#"INSERT INTO channels (id, name) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ChannelId::from(id))
    }

    pub async fn add_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO channel_members (channel_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT (channel_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(channel_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    pub async fn remove_member(
        &self,
        channel_id: ChannelId,
        user_id: UserId,
    ) -> Result<(), RepositoryError> {
        sqlx::query(r#"DELETE FROM channel_members WHERE channel_id = $1 AND user_id = $2"#)
            .bind(Uuid::from(channel_id))
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[async_trait]
impl ChannelMembership for PgChannelDirectory {
    async fn resolve_channel_members(
        &self,
        channel_id: ChannelId,
    ) -> Result<HashSet<UserId>, RepositoryError> {
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS(SELECT 1 FROM channels WHERE id = $1)"#)
                .bind(Uuid::from(channel_id))
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        if !exists {
            return Err(RepositoryError::NotFound);
        }

        let members: Vec<Uuid> =
            sqlx::query_scalar(r#"SELECT user_id FROM channel_members WHERE channel_id = $1"#)
                .bind(Uuid::from(channel_id))
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        Ok(members.into_iter().map(UserId::from).collect())
    }

    async fn resolve_contacts(&self, user_id: UserId) -> Result<HashSet<UserId>, RepositoryError> {
        // 私聊过的对端 ∪ 同频道成员
        let contacts: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT CASE WHEN sender_id = $1 THEN recipient_id ELSE sender_id END
            FROM messages
            WHERE recipient_id IS NOT NULL AND (sender_id = $1 OR recipient_id = $1)
            UNION
            SELECT other.user_id
            FROM channel_members me
            JOIN channel_members other ON other.channel_id = me.channel_id
            WHERE me.user_id = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(contacts
            .into_iter()
            .map(UserId::from)
            .filter(|contact| *contact != user_id)
            .collect())
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
