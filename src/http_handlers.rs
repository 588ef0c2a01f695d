// src/http_handlers.rs
use super::{
    dispatch,
    error::AppError,
    pin, store,
    types::{coerce_room_name, ChatCleared, ChatMessage, MessageDeleted, PinStateChanged, RoomInfo},
    ServerState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde_json::Value;
use tracing::info;

/// 房间历史：只读 durable store，按插入顺序返回。
pub async fn room_history_handler(
    State(state): State<ServerState>,
    Path(room): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    let messages = store::read_messages_by_room(&state.db_pool, &room).await?;
    Ok(Json(messages))
}

/// 置顶开关。级联逻辑（系统消息 + 通知爆发）在 pin 模块里。
pub async fn pin_toggle_handler(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<Json<PinStateChanged>, AppError> {
    let change = pin::toggle_pin(&state, id).await?;
    Ok(Json(change))
}

pub async fn delete_message_handler(
    State(state): State<ServerState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let Some(message) = store::get_message(&state.db_pool, id).await? else {
        return Err(AppError::MessageNotFound(id));
    };
    store::delete_message(&state.db_pool, id).await?;
    dispatch::to_room(&state, &message.room, "messageDeleted", &MessageDeleted { id }).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_room_handler(
    State(state): State<ServerState>,
    Path(room): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = store::clear_room(&state.db_pool, &room).await?;
    info!("🧹 [CLEAR] Room {} cleared ({} messages)", room, deleted);
    dispatch::to_room(&state, &room, "chatCleared", &ChatCleared { room: room.clone() }).await;
    Ok(StatusCode::NO_CONTENT)
}

/// 建房由外部 CRUD 层驱动；这里只负责落库 + 全局广播。
pub async fn create_room_handler(
    State(state): State<ServerState>,
    Json(payload): Json<RoomInfo>,
) -> Result<(StatusCode, Json<RoomInfo>), AppError> {
    // 房间名走和 join 相同的归一化口径
    let Some(name) = coerce_room_name(&Value::String(payload.name.clone())) else {
        return Err(AppError::InvalidRoom(payload.name));
    };
    store::upsert_room(&state.db_pool, &name, payload.cohort.as_deref()).await?;

    let info = RoomInfo {
        name,
        cohort: payload.cohort,
    };
    state.io.emit("roomCreated", &info).await.ok();
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn delete_room_handler(
    State(state): State<ServerState>,
    Path(room): Path<String>,
) -> Result<StatusCode, AppError> {
    if !store::delete_room(&state.db_pool, &room).await? {
        return Err(AppError::RoomNotFound(room));
    }
    state
        .io
        .emit("roomDeleted", &RoomInfo { name: room, cohort: None })
        .await
        .ok();
    Ok(StatusCode::NO_CONTENT)
}
