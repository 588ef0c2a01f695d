// src/dispatch.rs
use crate::{
    audience::AudienceMember,
    store,
    types::{coerce_room_name, ActiveCount, ChatMessage, ChatMessagePayload, DashboardUpdate, MessageError},
    ServerState,
};
use serde::Serialize;
use socketioxide::extract::SocketRef;
use socketioxide::socket::Sid;
use std::collections::HashMap;
use tracing::{error, info, warn};

// ==============================================================================
// 三种投递形态：单连接 / 房间频道 / 受众列表
// ==============================================================================

// 单个目标掉线导致的发送失败静默忽略，不影响其余投递
pub async fn to_connection<T: ?Sized + Serialize>(
    state: &ServerState,
    sid: Sid,
    event: &str,
    payload: &T,
) {
    state.io.to(sid.to_string()).emit(event, payload).await.ok();
}

// 房间频道投递走传输层订阅，与成员表无关：
// 未带完整身份 join 的连接同样收得到房间广播
pub async fn to_room<T: ?Sized + Serialize>(
    state: &ServerState,
    room: &str,
    event: &str,
    payload: &T,
) {
    state.io.to(room.to_string()).emit(event, payload).await.ok();
}

pub async fn to_audience<T: ?Sized + Serialize>(
    state: &ServerState,
    audience: &[Sid],
    event: &str,
    payload: &T,
) {
    for &sid in audience {
        to_connection(state, sid, event, payload).await;
    }
}

// ==============================================================================
// 消息发送路径：去重门 → 落库 → 房间广播 → 仪表盘预览
// ==============================================================================

// 落库决策与投递分离：这里只产出结果，emit 留给 send_chat_message
#[derive(Debug)]
pub enum SendOutcome {
    // 房间号缺失/哨兵串，请求丢弃
    Dropped,
    // 去重窗口内的重发，不落库不广播
    Duplicate,
    // 落库失败，错误需要回报发送端
    Failed(MessageError),
    Stored { room: String, message: ChatMessage },
}

pub async fn persist_chat_message(state: &ServerState, payload: ChatMessagePayload) -> SendOutcome {
    let Some(room) = coerce_room_name(&payload.room) else {
        warn!("🚫 [MSG] Missing or sentinel room id, dropped");
        return SendOutcome::Dropped;
    };

    if let Some(token) = payload.token.as_deref() {
        if !state.dedup.should_accept(token) {
            info!("♻️ [DEDUP] Duplicate token {}, dropped", token);
            return SendOutcome::Duplicate;
        }
    }

    let new = store::NewMessage {
        room: &room,
        sender_id: &payload.sender_id,
        sender_name: &payload.sender_name,
        content: &payload.content,
        kind: payload.kind,
        file_ref: payload.file_ref.as_deref(),
        ref_id: None,
    };

    match store::insert_message(&state.db_pool, &new).await {
        Ok(mut message) => {
            message.token = payload.token;
            SendOutcome::Stored { room, message }
        }
        Err(e) => {
            error!("❌ [DB] Message insert failed for room {}: {:#}", room, e);
            SendOutcome::Failed(MessageError {
                reason: "persistence failed".to_string(),
                token: payload.token,
            })
        }
    }
}

pub async fn send_chat_message(state: &ServerState, s: &SocketRef, payload: ChatMessagePayload) {
    match persist_chat_message(state, payload).await {
        SendOutcome::Stored { room, message } => {
            to_room(state, &room, "receiveMessage", &message).await;
            // 仪表盘预览发给全部活动连接，与房间订阅无关
            let update = DashboardUpdate {
                room_id: room,
                message,
            };
            state.io.emit("dashboardUpdate", &update).await.ok();
        }
        // 落库失败回报给发送端（本地乐观副本需要回滚），广播已放弃
        SendOutcome::Failed(err) => {
            s.emit("messageError", &err).ok();
        }
        SendOutcome::Dropped | SendOutcome::Duplicate => {}
    }
}

// ==============================================================================
// 通知扇出：每个 userId 落库一条，投递到该用户的每个连接
// ==============================================================================

pub fn group_by_user(members: &[AudienceMember]) -> HashMap<&str, Vec<Sid>> {
    let mut by_user: HashMap<&str, Vec<Sid>> = HashMap::new();
    for member in members {
        by_user
            .entry(member.user_id.as_str())
            .or_default()
            .push(member.sid);
    }
    by_user
}

// 返回成功持久化的用户数。单个用户落库失败只跳过该用户的投递，其余不受影响
pub async fn notify_audience(
    state: &ServerState,
    members: &[AudienceMember],
    title: &str,
    body: &str,
) -> usize {
    let mut persisted = 0;
    for (user_id, sids) in group_by_user(members) {
        let notification =
            match store::insert_notification(&state.db_pool, user_id, title, body).await {
                Ok(n) => n,
                Err(e) => {
                    error!("❌ [DB] Notification insert failed for {}: {:#}", user_id, e);
                    continue;
                }
            };
        persisted += 1;
        to_audience(state, &sids, "newNotification", &notification).await;
    }
    persisted
}

// 每次成员变动后重算学生人数并发回房间
pub async fn publish_active_count(state: &ServerState, room: &str) {
    let count = state.rooms.student_count(room);
    to_room(
        state,
        room,
        "activeStudentCount",
        &ActiveCount {
            room: room.to_string(),
            count,
        },
    )
    .await;
}

// 通知预览：超长内容按字符截断，连同省略号不超过 max_chars
pub fn preview(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let cut: String = content.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        state::{ConnectionRegistry, DedupWindow, RoomRegistry},
    };
    use serde_json::json;
    use socketioxide::SocketIo;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn test_state() -> ServerState {
        let (_layer, io) = SocketIo::builder().build_layer();
        let db_pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        store::init_db(&db_pool).await.unwrap();
        let config = Arc::new(Config::new());
        ServerState {
            connections: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            dedup: DedupWindow::new(config.dedup_reject_window, config.dedup_retention),
            config,
            io,
            db_pool,
        }
    }

    fn payload(token: Option<&str>) -> ChatMessagePayload {
        serde_json::from_value(json!({
            "room": 101,
            "senderId": "u1",
            "senderName": "Omar",
            "content": "hi",
            "token": token
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn stored_message_carries_id_and_client_token() {
        let state = test_state().await;
        let outcome = persist_chat_message(&state, payload(Some("t1"))).await;
        match outcome {
            SendOutcome::Stored { room, message } => {
                assert_eq!(room, "101");
                assert!(message.id > 0);
                assert_eq!(message.token.as_deref(), Some("t1"));
            }
            other => panic!("expected Stored, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_token_persists_exactly_one_row() {
        let state = test_state().await;
        assert!(matches!(
            persist_chat_message(&state, payload(Some("t1"))).await,
            SendOutcome::Stored { .. }
        ));
        // 2 秒内重发：不落第二行，也不会走到广播分支
        assert!(matches!(
            persist_chat_message(&state, payload(Some("t1"))).await,
            SendOutcome::Duplicate
        ));

        let rows = store::read_messages_by_room(&state.db_pool, "101").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hi");
    }

    #[tokio::test]
    async fn tokenless_messages_bypass_the_window() {
        let state = test_state().await;
        assert!(matches!(
            persist_chat_message(&state, payload(None)).await,
            SendOutcome::Stored { .. }
        ));
        assert!(matches!(
            persist_chat_message(&state, payload(None)).await,
            SendOutcome::Stored { .. }
        ));
        let rows = store::read_messages_by_room(&state.db_pool, "101").await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn sentinel_room_is_dropped_without_persisting() {
        let state = test_state().await;
        let bad: ChatMessagePayload = serde_json::from_value(json!({
            "room": "undefined",
            "senderId": "u1",
            "senderName": "Omar",
            "content": "hi"
        }))
        .unwrap();
        assert!(matches!(
            persist_chat_message(&state, bad).await,
            SendOutcome::Dropped
        ));
    }

    #[tokio::test]
    async fn failed_persistence_aborts_broadcast_and_reports_token() {
        let state = test_state().await;
        // 关闭连接池让 insert 确定性失败
        state.db_pool.close().await;

        let outcome = persist_chat_message(&state, payload(Some("t9"))).await;
        match outcome {
            SendOutcome::Failed(err) => {
                assert_eq!(err.reason, "persistence failed");
                assert_eq!(err.token.as_deref(), Some("t9"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn preview_keeps_short_content_unmodified() {
        assert_eq!(preview("Exam moved to Monday", 50), "Exam moved to Monday");
    }

    #[test]
    fn preview_stays_within_the_limit_after_truncation() {
        let long = "م".repeat(60);
        let cut = preview(&long, 50);
        assert_eq!(cut.chars().count(), 50); // 47 + "..."
        assert!(cut.ends_with("..."));
        assert!(cut.starts_with('م'));
    }

    #[test]
    fn group_by_user_keeps_every_device() {
        let a = Sid::new();
        let b = Sid::new();
        let c = Sid::new();
        let members = vec![
            AudienceMember { sid: a, user_id: "u1".to_string() },
            AudienceMember { sid: b, user_id: "u1".to_string() },
            AudienceMember { sid: c, user_id: "u2".to_string() },
        ];

        let grouped = group_by_user(&members);
        assert_eq!(grouped.len(), 2); // 持久化只按两个用户各写一条
        assert_eq!(grouped["u1"].len(), 2); // 但 u1 的两台设备都要收到
        assert_eq!(grouped["u2"], vec![c]);
    }
}
