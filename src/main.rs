// src/main.rs
use axum::{
    routing::{delete, get, post},
    Router,
};
use chat_backend::{config::Config, http_handlers, init_tracing, setup_shared_state, socket_handlers};
use http::HeaderValue;
use socketioxide::{extract::SocketRef, SocketIo};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[tokio::main]
async fn main() {
    init_tracing();

    // 顶层兜底：handler 里的 panic 被 tokio 按任务隔离，这里只记录，进程继续服务其他连接
    std::panic::set_hook(Box::new(|panic_info| {
        tracing::error!("💥 [PANIC] {}", panic_info);
    }));

    let (layer, io) = SocketIo::builder().max_buffer_size(4096).build_layer();

    let config = Arc::new(Config::new());
    let server_state = setup_shared_state(config.clone(), io.clone()).await;

    let socket_state = server_state.clone();
    io.ns("/", move |s: SocketRef| {
        let state = socket_state.clone();
        async move {
            socket_handlers::on_socket_connect(s, state).await;
        }
    });

    let app = Router::new()
        .route("/rooms", post(http_handlers::create_room_handler))
        .route("/rooms/{room}", delete(http_handlers::delete_room_handler))
        .route(
            "/rooms/{room}/messages",
            get(http_handlers::room_history_handler).delete(http_handlers::clear_room_handler),
        )
        .route("/messages/{id}/pin", post(http_handlers::pin_toggle_handler))
        .route("/messages/{id}", delete(http_handlers::delete_message_handler))
        .with_state(server_state)
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .cors_origin
                        .parse::<HeaderValue>()
                        .expect("Invalid CORS origin"),
                )
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(layer);

    info!("🚀 Chat server is running at http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
