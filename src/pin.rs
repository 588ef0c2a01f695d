// src/pin.rs
use crate::{
    audience::{self, normalize_cohort},
    dispatch,
    error::AppError,
    state::ConnectionRegistry,
    store,
    types::{ChatMessage, DashboardUpdate, MessageKind, PinStateChanged},
    ServerState,
};
use std::collections::HashSet;
use tracing::{error, info, warn};

// 系统消息的保留发送者身份
pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "النظام";

const PIN_NOTIFICATION_TITLE: &str = "رسالة مثبتة";

// 置顶开关：unpinned → pinned 触发级联（系统消息 + 分组通知爆发），
// pinned → unpinned 只翻转标记，不撤回已发出的系统消息和通知
pub async fn toggle_pin(state: &ServerState, message_id: i64) -> Result<PinStateChanged, AppError> {
    let Some(message) = store::get_message(&state.db_pool, message_id).await? else {
        return Err(AppError::MessageNotFound(message_id));
    };

    let is_pinned = !message.pinned;
    store::set_pinned(&state.db_pool, message_id, is_pinned).await?;

    if is_pinned {
        run_pin_cascade(state, &message).await;
    }

    // UI 同步事件与通知爆发相互独立，通知失败也照常广播
    let change = PinStateChanged {
        message_id,
        is_pinned,
        room: message.room.clone(),
    };
    dispatch::to_room(state, &message.room, "pinStateChanged", &change).await;
    Ok(change)
}

async fn run_pin_cascade(state: &ServerState, original: &ChatMessage) {
    let cohort = resolve_room_cohort(state, &original.room, &original.sender_id).await;

    // 1. 合成系统消息，回引原消息 id，广播到房间和仪表盘
    let synthetic = store::insert_message(
        &state.db_pool,
        &store::NewMessage {
            room: &original.room,
            sender_id: SYSTEM_SENDER_ID,
            sender_name: SYSTEM_SENDER_NAME,
            content: &original.content,
            kind: MessageKind::System,
            file_ref: None,
            ref_id: Some(original.id),
        },
    )
    .await;

    match synthetic {
        Ok(message) => {
            dispatch::to_room(state, &original.room, "receiveMessage", &message).await;
            let update = DashboardUpdate {
                room_id: original.room.clone(),
                message,
            };
            state.io.emit("dashboardUpdate", &update).await.ok();
        }
        Err(e) => error!("❌ [PIN] System message insert failed: {:#}", e),
    }

    // 2. 分组通知爆发：不排除任何人，按用户落库、按连接投递
    let members = audience::select_by_cohort(&state.connections, &cohort, &HashSet::new());
    let body = pin_notification_body(
        &original.sender_name,
        &original.content,
        state.config.notification_preview_chars,
    );
    let persisted = dispatch::notify_audience(state, &members, PIN_NOTIFICATION_TITLE, &body).await;
    info!(
        "📌 [PIN] Message {} pinned in {} | cohort={} | {} users notified ({} connections)",
        original.id,
        original.room,
        cohort,
        persisted,
        members.len()
    );
}

pub fn pin_notification_body(sender_name: &str, content: &str, max_chars: usize) -> String {
    format!("من {}: {}", sender_name, dispatch::preview(content, max_chars))
}

// 分组解析链：房间表 → 发送者的在线身份 → 默认分组
async fn resolve_room_cohort(state: &ServerState, room: &str, sender_id: &str) -> String {
    match store::get_room_cohort(&state.db_pool, room).await {
        Ok(Some(cohort)) if !cohort.trim().is_empty() => return normalize_cohort(Some(&cohort)),
        Ok(_) => {}
        Err(e) => warn!("⚠️ [PIN] Room cohort lookup failed for {}: {:#}", room, e),
    }
    normalize_cohort(sender_live_cohort(&state.connections, sender_id).as_deref())
}

// 发送者任一在线连接声明的分组
pub fn sender_live_cohort(registry: &ConnectionRegistry, sender_id: &str) -> Option<String> {
    let mut cohort = None;
    registry.for_each(|_, identity| {
        if cohort.is_none() && identity.user_id == sender_id {
            cohort = identity.cohort.clone();
        }
    });
    cohort
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Identity, Role};
    use socketioxide::socket::Sid;

    #[test]
    fn notification_body_matches_preview_format() {
        let body = pin_notification_body("X", "Exam moved to Monday", 50);
        assert_eq!(body, "من X: Exam moved to Monday");
    }

    #[test]
    fn notification_body_truncates_long_content() {
        let content = "a".repeat(80);
        let body = pin_notification_body("X", &content, 50);
        // 预览连同省略号不超过 50 字符
        assert_eq!(body, format!("من X: {}...", "a".repeat(47)));
    }

    #[test]
    fn sender_cohort_falls_back_to_default_when_offline() {
        let registry = ConnectionRegistry::new();
        registry.register(
            Sid::new(),
            Identity {
                user_id: "u1".to_string(),
                display_name: "Omar".to_string(),
                role: Role::Student,
                cohort: Some("Evening".to_string()),
            },
        );

        assert_eq!(sender_live_cohort(&registry, "u1").as_deref(), Some("Evening"));
        assert!(sender_live_cohort(&registry, "ghost").is_none());
        assert_eq!(normalize_cohort(sender_live_cohort(&registry, "ghost").as_deref()), "morning");
    }
}
