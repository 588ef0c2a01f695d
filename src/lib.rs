// src/lib.rs
pub mod audience;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http_handlers;
pub mod pin;
pub mod socket_handlers;
pub mod state;
pub mod store;
pub mod types;

use config::Config;
use socketioxide::SocketIo;
use sqlx::SqlitePool;
use state::{ConnectionRegistry, DedupWindow, RoomRegistry};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone)]
pub struct ServerState {
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
    pub dedup: DedupWindow,
    pub config: Arc<Config>,
    pub io: SocketIo,
    pub db_pool: SqlitePool,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "chat_backend=info,tower_http=info,sqlx=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn setup_shared_state(config: Arc<Config>, io: SocketIo) -> ServerState {
    // Database Setup
    if let Some(parent) = std::path::Path::new(&config.database_url.replace("sqlite:", "")).parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).expect("Failed to create database directory");
        }
    }

    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
    use std::str::FromStr;

    let db_opts = SqliteConnectOptions::from_str(&config.database_url)
        .expect("Invalid database URL")
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .pragma("busy_timeout", "5000");

    let db_pool = SqlitePoolOptions::new()
        .max_connections(20)
        .connect_with(db_opts)
        .await
        .expect("Failed to connect to SQLite database");
    store::init_db(&db_pool).await.expect("Failed to initialize database schema");

    info!("💾 [DB] Connected: {}", config.database_url);

    ServerState {
        connections: ConnectionRegistry::new(),
        rooms: RoomRegistry::new(),
        dedup: DedupWindow::new(config.dedup_reject_window, config.dedup_retention),
        config,
        io,
        db_pool,
    }
}
