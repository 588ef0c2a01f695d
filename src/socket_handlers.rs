// src/socket_handlers.rs
use super::{
    audience, dispatch,
    types::{coerce_room_name, ChatMessagePayload, Identity, JoinRequest, ManualNotificationPayload},
    ServerState,
};
use socketioxide::extract::{Data, SocketRef};
use std::collections::HashSet;
use tracing::{info, warn};

const MANUAL_NOTIFICATION_TITLE: &str = "تنبيه";

pub async fn on_socket_connect(s: SocketRef, state: ServerState) {
    info!("🔌 [Socket.IO] Client connected: {}", s.id);
    register_identity_handler(&s, state.clone());
    register_join_handler(&s, state.clone());
    register_leave_handler(&s, state.clone());
    register_message_handler(&s, state.clone());
    register_manual_notification_handler(&s, state.clone());
    register_disconnect_handler(&s, state);
}

fn register_identity_handler(socket: &SocketRef, state: ServerState) {
    socket.on("register", move |s: SocketRef, Data(payload): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            match serde_json::from_value::<Identity>(payload) {
                Ok(identity) => {
                    info!(
                        "👤 [REGISTER] {} -> {} ({:?}, cohort={:?})",
                        s.id, identity.user_id, identity.role, identity.cohort
                    );
                    state.connections.register(s.id, identity);
                }
                Err(e) => warn!("🚫 [REGISTER] Malformed identity from {}: {}", s.id, e),
            }
        }
    });
}

fn register_join_handler(socket: &SocketRef, state: ServerState) {
    socket.on("join", move |s: SocketRef, Data(payload): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let request = match serde_json::from_value::<JoinRequest>(payload) {
                Ok(r) => r,
                Err(e) => {
                    warn!("🚫 [JOIN] Malformed payload from {}: {}", s.id, e);
                    return;
                }
            };
            // 房间号缺失/哨兵串：丢弃请求，不动任何注册表
            let Some(normalized) = request.normalize() else {
                warn!("🚫 [JOIN] Missing or sentinel room id from {}, dropped", s.id);
                return;
            };

            info!("🔔 [JOIN] Client {} -> {}", s.id, normalized.room);
            s.join(normalized.room.clone());

            match normalized.participant {
                Some(participant) => {
                    state.rooms.join(&normalized.room, s.id, participant);
                    dispatch::publish_active_count(&state, &normalized.room).await;
                }
                // 身份不全：只订阅频道，不计入成员，也不触发人数重算
                None => info!("👻 [JOIN] {} subscribed to {} without full identity", s.id, normalized.room),
            }
        }
    });
}

fn register_leave_handler(socket: &SocketRef, state: ServerState) {
    socket.on("leave", move |s: SocketRef, Data(payload): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            let Some(room) = coerce_room_name(&payload) else {
                warn!("🚫 [LEAVE] Missing or sentinel room id from {}, dropped", s.id);
                return;
            };

            info!("📤 [LEAVE] Client {} -> {}", s.id, room);
            s.leave(room.clone());
            if state.rooms.leave(&room, s.id) {
                dispatch::publish_active_count(&state, &room).await;
            }
        }
    });
}

fn register_message_handler(socket: &SocketRef, state: ServerState) {
    socket.on("sendMessage", move |s: SocketRef, Data(payload): Data<serde_json::Value>| {
        let state = state.clone();
        async move {
            match serde_json::from_value::<ChatMessagePayload>(payload) {
                Ok(message) => dispatch::send_chat_message(&state, &s, message).await,
                Err(e) => warn!("🚫 [MSG] Malformed payload from {}: {}", s.id, e),
            }
        }
    });
}

fn register_manual_notification_handler(socket: &SocketRef, state: ServerState) {
    socket.on(
        "sendManualNotification",
        move |s: SocketRef, Data(payload): Data<serde_json::Value>| {
            let state = state.clone();
            async move {
                let payload = match serde_json::from_value::<ManualNotificationPayload>(payload) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("🚫 [NOTIFY] Malformed payload from {}: {}", s.id, e);
                        return;
                    }
                };

                // 受众取发送端连接登记的分组，发送者本人排除在外
                let cohort = state
                    .connections
                    .lookup(s.id)
                    .and_then(|identity| identity.cohort)
                    .unwrap_or_default();
                let mut exclude = HashSet::new();
                exclude.insert(payload.from_user_id.clone());

                let members = audience::select_by_cohort(&state.connections, &cohort, &exclude);
                let body = format!("من {}: {}", payload.from_user_name, payload.body);
                let persisted =
                    dispatch::notify_audience(&state, &members, MANUAL_NOTIFICATION_TITLE, &body)
                        .await;
                info!(
                    "📢 [NOTIFY] Manual alert from {} | {} users persisted ({} connections)",
                    payload.from_user_name,
                    persisted,
                    members.len()
                );
            }
        },
    );
}

fn register_disconnect_handler(socket: &SocketRef, state: ServerState) {
    socket.on_disconnect(move |s: SocketRef| {
        let state = state.clone();
        async move {
            info!("🔌 [Socket.IO] Client disconnected: {}", s.id);
            // 唯一的多键清理路径：连接表 + 所有房间成员表，作为一个逻辑单元执行
            state.connections.remove(s.id);
            let affected = state.rooms.remove_everywhere(s.id);
            for room in affected {
                dispatch::publish_active_count(&state, &room).await;
            }
        }
    });
}
