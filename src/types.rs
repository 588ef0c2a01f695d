// src/types.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==============================================================================
// 1. 身份与参与者 (对应前端 shared-types)
// ==============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Representative,
}

// 连接登记的身份声明。cohort 缺省时按 "morning" 处理（归一化在 audience 层做）
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    #[serde(alias = "userName")]
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub cohort: Option<String>,
}

// 房间内的成员记录，按连接 Sid 建键
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    #[serde(alias = "userName")]
    pub display_name: String,
    pub role: Role,
}

// ==============================================================================
// 2. Join 请求：裸房间号 或 带身份的结构化载荷 (核心解耦点)
// ==============================================================================

// ✨ 前端可能发 "101" / 101 / { roomId|room, userId, userName, role }
// 利用 serde(untagged) 在边界处收敛为统一内部形态
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum JoinRequest {
    Detailed(DetailedJoin),
    Bare(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedJoin {
    #[serde(alias = "room")]
    pub room_id: Value,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug)]
pub struct NormalizedJoin {
    pub room: String,
    // 身份不完整时仍订阅房间频道，但不计入成员表
    pub participant: Option<Participant>,
}

impl JoinRequest {
    pub fn normalize(self) -> Option<NormalizedJoin> {
        let (raw_room, detail) = match self {
            JoinRequest::Detailed(d) => (d.room_id.clone(), Some(d)),
            JoinRequest::Bare(v) => (v, None),
        };
        let room = coerce_room_name(&raw_room)?;
        let participant = detail.and_then(|d| match (d.user_id, d.user_name, d.role) {
            (Some(user_id), Some(user_name), Some(role)) => Some(Participant {
                user_id,
                display_name: user_name,
                role,
            }),
            _ => None,
        });
        Some(NormalizedJoin { room, participant })
    }
}

// 房间号统一成字符串形态；空值和前端序列化出的哨兵串一律拒绝
pub fn coerce_room_name(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "undefined" || s == "null" {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ==============================================================================
// 3. 消息与通知载荷
// ==============================================================================

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    File,
    System,
    #[default]
    #[serde(other)]
    Text,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::File => "file",
            MessageKind::System => "system",
            MessageKind::Text => "text",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw {
            "file" => MessageKind::File,
            "system" => MessageKind::System,
            _ => MessageKind::Text,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessagePayload {
    pub room: Value,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_ref: Option<String>,
    // 客户端自带的幂等 token，缺省时跳过去重窗口
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ManualNotificationPayload {
    pub from_user_id: String,
    pub from_user_name: String,
    pub body: String,
}

// ==============================================================================
// 4. 出站事件 (Socket.IO emit 载荷)
// ==============================================================================

// 完整消息：落库后带生成 id 广播；token 原样带回，发送端用它对账本地乐观副本
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub room: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub file_ref: Option<String>,
    pub pinned: bool,
    // 置顶系统消息对原消息的回引，客户端用于滚动定位
    pub ref_id: Option<i64>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCount {
    pub room: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PinStateChanged {
    pub message_id: i64,
    pub is_pinned: bool,
    pub room: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    pub room_id: String,
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub id: i64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatCleared {
    pub room: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub name: String,
    #[serde(default)]
    pub cohort: Option<String>,
}

// 落库失败时回发给发送端的错误事件
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
