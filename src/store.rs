// src/store.rs

use crate::types::{ChatMessage, MessageKind, Notification};
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};
use tracing::info;

pub async fn init_db(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            room TEXT NOT NULL,
            sender_id TEXT NOT NULL,
            sender_name TEXT NOT NULL,
            content TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'text',
            file_ref TEXT,
            pinned INTEGER NOT NULL DEFAULT 0,
            ref_id INTEGER,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rooms (
            name TEXT PRIMARY KEY,
            cohort TEXT
        )",
    )
    .execute(pool)
    .await?;

    info!("🗃️ 'messages' / 'notifications' / 'rooms' tables are ready.");
    Ok(())
}

// 待落库的消息（id 和 created_at 由存储层生成）
pub struct NewMessage<'a> {
    pub room: &'a str,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
    pub content: &'a str,
    pub kind: MessageKind,
    pub file_ref: Option<&'a str>,
    pub ref_id: Option<i64>,
}

// 先落库拿 id，再广播 —— 调用方拿到的是完整成形的消息
pub async fn insert_message(pool: &SqlitePool, m: &NewMessage<'_>) -> Result<ChatMessage> {
    let created_at = Utc::now().timestamp_millis();
    let result = sqlx::query(
        "INSERT INTO messages (room, sender_id, sender_name, content, kind, file_ref, ref_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(m.room)
    .bind(m.sender_id)
    .bind(m.sender_name)
    .bind(m.content)
    .bind(m.kind.as_str())
    .bind(m.file_ref)
    .bind(m.ref_id)
    .bind(created_at)
    .execute(pool)
    .await
    .context("DB insert message")?;

    Ok(ChatMessage {
        id: result.last_insert_rowid(),
        room: m.room.to_string(),
        sender_id: m.sender_id.to_string(),
        sender_name: m.sender_name.to_string(),
        content: m.content.to_string(),
        kind: m.kind,
        file_ref: m.file_ref.map(|f| f.to_string()),
        pinned: false,
        ref_id: m.ref_id,
        created_at,
        token: None,
    })
}

pub async fn insert_notification(
    pool: &SqlitePool,
    user_id: &str,
    title: &str,
    body: &str,
) -> Result<Notification> {
    let created_at = Utc::now().timestamp_millis();
    let result = sqlx::query(
        "INSERT INTO notifications (user_id, title, body, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(title)
    .bind(body)
    .bind(created_at)
    .execute(pool)
    .await
    .context("DB insert notification")?;

    Ok(Notification {
        id: result.last_insert_rowid(),
        user_id: user_id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        created_at,
    })
}

pub async fn read_messages_by_room(pool: &SqlitePool, room: &str) -> Result<Vec<ChatMessage>> {
    sqlx::query_as::<_, ChatMessage>(
        "SELECT id, room, sender_id, sender_name, content, kind, file_ref, pinned, ref_id, created_at
         FROM messages WHERE room = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(room)
    .fetch_all(pool)
    .await
    .context("DB fetch room history")
}

pub async fn get_message(pool: &SqlitePool, id: i64) -> Result<Option<ChatMessage>> {
    sqlx::query_as::<_, ChatMessage>(
        "SELECT id, room, sender_id, sender_name, content, kind, file_ref, pinned, ref_id, created_at
         FROM messages WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("DB fetch message")
}

pub async fn set_pinned(pool: &SqlitePool, id: i64, pinned: bool) -> Result<()> {
    sqlx::query("UPDATE messages SET pinned = ? WHERE id = ?")
        .bind(pinned)
        .bind(id)
        .execute(pool)
        .await
        .context("DB set pinned")?;
    Ok(())
}

pub async fn delete_message(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM messages WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("DB delete message")?;
    Ok(result.rows_affected() > 0)
}

pub async fn clear_room(pool: &SqlitePool, room: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM messages WHERE room = ?")
        .bind(room)
        .execute(pool)
        .await
        .context("DB clear room")?;
    Ok(result.rows_affected())
}

pub async fn upsert_room(pool: &SqlitePool, name: &str, cohort: Option<&str>) -> Result<()> {
    sqlx::query(
        "INSERT INTO rooms (name, cohort) VALUES (?, ?)
         ON CONFLICT(name) DO UPDATE SET cohort = excluded.cohort",
    )
    .bind(name)
    .bind(cohort)
    .execute(pool)
    .await
    .context("DB upsert room")?;
    Ok(())
}

pub async fn delete_room(pool: &SqlitePool, name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM rooms WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await
        .context("DB delete room")?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_room_cohort(pool: &SqlitePool, name: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT cohort FROM rooms WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("DB fetch room cohort")?;
    Ok(row.and_then(|r| r.try_get::<Option<String>, _>("cohort").ok().flatten()))
}

impl sqlx::FromRow<'_, SqliteRow> for ChatMessage {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let kind: String = row.try_get("kind")?;
        Ok(ChatMessage {
            id: row.try_get("id")?,
            room: row.try_get("room")?,
            sender_id: row.try_get("sender_id")?,
            sender_name: row.try_get("sender_name")?,
            content: row.try_get("content")?,
            kind: MessageKind::from_db(&kind),
            file_ref: row.try_get("file_ref")?,
            pinned: row.try_get("pinned")?,
            ref_id: row.try_get("ref_id")?,
            created_at: row.try_get("created_at")?,
            token: None,
        })
    }
}
