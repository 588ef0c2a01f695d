// src/config.rs
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub bind_addr: String,
    pub cors_origin: String,
    pub database_url: String,
    // 消息去重：5 秒内同 token 重发判定为重复，条目保留 10 秒后过期
    pub dedup_reject_window: Duration,
    pub dedup_retention: Duration,
    // 通知正文预览截断长度（字符数）
    pub notification_preview_chars: usize,
}

impl Config {
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:3001".to_string(),
            cors_origin: "http://localhost:5173".to_string(),
            database_url: "sqlite:./data/chat.db".to_string(),
            dedup_reject_window: Duration::from_secs(5),
            dedup_retention: Duration::from_secs(10),
            notification_preview_chars: 50,
        }
    }
}
