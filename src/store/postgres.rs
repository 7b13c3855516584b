//! Postgres-backed `RoomStore`.

use sqlx::PgPool;
use uuid::Uuid;

use super::{Message, Room, RoomStore, StoreError, User};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RoomStore for PgStore {
    async fn find_room(&self, room_id: Uuid) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, Option<String>, Option<Uuid>)>(
            "SELECT id, name, description, created_by
             FROM rooms
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, description, created_by)| Room { id, name, description, created_by }))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, username FROM users WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, username)| User { id, username }))
    }

    async fn create_message(&self, room_id: Uuid, user_id: Uuid, content: &str) -> Result<Message, StoreError> {
        // The INSERT ... SELECT only produces a row while the room is live, so
        // a soft-deleted room yields zero rows instead of a stored message.
        let id = Uuid::new_v4();
        let result = sqlx::query_as::<_, (i64,)>(
            "INSERT INTO messages (id, room_id, user_id, content)
             SELECT $1, r.id, $3, $4
             FROM rooms r
             WHERE r.id = $2 AND r.deleted_at IS NULL
             RETURNING (extract(epoch FROM created_at) * 1000)::bigint",
        )
        .bind(id)
        .bind(room_id)
        .bind(user_id)
        .bind(content)
        .fetch_optional(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                return Err(StoreError::NotFound("user"));
            }
            Err(e) => return Err(e.into()),
        };
        let Some((created_at_ms,)) = row else {
            return Err(StoreError::NotFound("room"));
        };

        Ok(Message { id, room_id, user_id, content: content.to_string(), created_at_ms })
    }

    async fn count_messages(&self, room_id: Uuid) -> Result<i64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room_id = $1 AND deleted_at IS NULL")
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
