use std::str::FromStr;

use async_trait::async_trait;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::backend::LocalCache;
use crate::common::error::ChatResult;
use crate::common::models::{ChatRoom, Participant, User};

/// SQLite mirror of the room list and the signed-in user.
#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        debug!("Connecting to local cache: {}", database_url);
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            let file_path = database_url
                .strip_prefix("sqlite://")
                .or_else(|| database_url.strip_prefix("sqlite:"))
                .unwrap_or(database_url);
            let file_path = file_path.split('?').next().unwrap_or(file_path);
            if let Some(parent) = std::path::Path::new(file_path).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| sqlx::Error::Configuration(Box::new(e)))?;
                    info!("Created cache directory {:?}", parent);
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // every connection to :memory: is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await?;

        info!("Local cache ready at {}", database_url);
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS chat_rooms (
                room_id TEXT PRIMARY KEY,
                sender_name TEXT,
                sender_phone TEXT,
                sender_picture TEXT,
                receiver_name TEXT,
                receiver_phone TEXT,
                receiver_picture TEXT,
                last_message TEXT,
                last_message_time TEXT,
                created_at TEXT,
                updated_at TEXT,
                deleted_at TEXT
            );
        "#).execute(&self.pool).await?;

        sqlx::query(r#"
            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                name TEXT,
                phone_number TEXT NOT NULL,
                birth_date TEXT,
                email TEXT,
                profile_picture TEXT,
                created_at TEXT
            );
        "#).execute(&self.pool).await?;

        Ok(())
    }

    /// Connect and create the tables.
    pub async fn open(database_url: &str) -> Result<Self, sqlx::Error> {
        let db = Self::connect(database_url).await?;
        db.migrate().await?;
        Ok(db)
    }
}

fn room_from_row(row: &SqliteRow) -> Result<ChatRoom, sqlx::Error> {
    Ok(ChatRoom {
        room_id: row.try_get("room_id")?,
        sender: Participant {
            name: row.try_get("sender_name")?,
            phone_number: row.try_get("sender_phone")?,
            profile_picture: row.try_get("sender_picture")?,
        },
        receiver: Participant {
            name: row.try_get("receiver_name")?,
            phone_number: row.try_get("receiver_phone")?,
            profile_picture: row.try_get("receiver_picture")?,
        },
        last_message: row.try_get("last_message")?,
        last_message_time: row.try_get("last_message_time")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User, sqlx::Error> {
    Ok(User {
        uid: row.try_get("uid")?,
        name: row.try_get("name")?,
        phone_number: row.try_get("phone_number")?,
        birth_date: row.try_get("birth_date")?,
        email: row.try_get("email")?,
        profile_picture: row.try_get("profile_picture")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LocalCache for Database {
    async fn upsert_rooms(&self, rooms: &[ChatRoom]) -> ChatResult<()> {
        let mut tx = self.pool.begin().await?;
        for room in rooms {
            sqlx::query(r#"
                INSERT OR REPLACE INTO chat_rooms (
                    room_id, sender_name, sender_phone, sender_picture,
                    receiver_name, receiver_phone, receiver_picture,
                    last_message, last_message_time, created_at, updated_at, deleted_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#)
            .bind(&room.room_id)
            .bind(&room.sender.name)
            .bind(&room.sender.phone_number)
            .bind(&room.sender.profile_picture)
            .bind(&room.receiver.name)
            .bind(&room.receiver.phone_number)
            .bind(&room.receiver.profile_picture)
            .bind(&room.last_message)
            .bind(&room.last_message_time)
            .bind(&room.created_at)
            .bind(&room.updated_at)
            .bind(&room.deleted_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!("Cached {} room(s)", rooms.len());
        Ok(())
    }

    async fn read_rooms(&self) -> ChatResult<Vec<ChatRoom>> {
        let rows = sqlx::query("SELECT * FROM chat_rooms ORDER BY updated_at DESC, room_id ASC")
            .fetch_all(&self.pool)
            .await?;
        let rooms = rows.iter().map(room_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(rooms)
    }

    async fn find_room(&self, room_id: &str) -> ChatResult<Option<ChatRoom>> {
        let row = sqlx::query("SELECT * FROM chat_rooms WHERE room_id = ?")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(room_from_row).transpose()?)
    }

    async fn delete_room(&self, room_id: &str) -> ChatResult<()> {
        sqlx::query("DELETE FROM chat_rooms WHERE room_id = ?")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_rooms(&self) -> ChatResult<()> {
        sqlx::query("DELETE FROM chat_rooms").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_user(&self, user: &User) -> ChatResult<()> {
        // one signed-in user per device
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM users WHERE uid != ?")
            .bind(&user.uid)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"
            INSERT OR REPLACE INTO users (uid, name, phone_number, birth_date, email, profile_picture, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#)
        .bind(&user.uid)
        .bind(&user.name)
        .bind(&user.phone_number)
        .bind(&user.birth_date)
        .bind(&user.email)
        .bind(&user.profile_picture)
        .bind(&user.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn read_user(&self) -> ChatResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn clear_users(&self) -> ChatResult<()> {
        sqlx::query("DELETE FROM users").execute(&self.pool).await?;
        Ok(())
    }
}
