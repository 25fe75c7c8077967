pub mod poller;
pub mod registry;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{routing::get, Router};
use quotefeed_core::{FeedConfig, QuoteSource};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use poller::Poller;
pub use registry::{Connection, ConnectionId, ConnectionState, Registry, RegistryError, RegistryHandle, RegistryStats};
pub use state::AppState;

/// Build the Axum application router.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", routes::api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// The running realtime feed: shared state plus the registry and poller tasks.
pub struct Feed {
    pub state: Arc<AppState>,
    pub registry_task: JoinHandle<()>,
    pub poller_task: JoinHandle<()>,
}

/// Start the registry and the poller over `source`.
pub fn spawn_feed(source: Arc<dyn QuoteSource>, config: FeedConfig) -> Feed {
    let (registry, registry_task) = Registry::spawn(config.mailbox_capacity);
    let poller_task = Poller::new(
        registry.clone(),
        source.clone(),
        config.poll_interval(),
        config.upstream_timeout(),
    )
    .spawn();

    Feed {
        state: Arc::new(AppState::new(registry, source, config)),
        registry_task,
        poller_task,
    }
}

/// Start the API server.
pub async fn start_server(
    source: Arc<dyn QuoteSource>,
    config: FeedConfig,
    bind_addr: &str,
) -> anyhow::Result<()> {
    let feed = spawn_feed(source, config);
    let app = build_router(feed.state.clone());
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("API server listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    feed.poller_task.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use quotefeed_core::{StreamAction, StreamMessage};
    use quotefeed_sources::MockSource;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    async fn serve(config: FeedConfig) -> (std::net::SocketAddr, Feed) {
        let feed = spawn_feed(Arc::new(MockSource::new()), config);
        let app = build_router(feed.state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, feed)
    }

    #[tokio::test]
    async fn test_websocket_subscriber_receives_update() {
        let config = FeedConfig {
            poll_interval_secs: 1,
            ..FeedConfig::default()
        };
        let (addr, feed) = serve(config).await;

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        socket
            .send(Message::Text(r#"{"action":"subscribe","symbol":"aapl"}"#.to_string()))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => break text,
                    Some(Ok(_)) => continue,
                    other => panic!("socket ended: {other:?}"),
                }
            }
        })
        .await
        .expect("no update within 5s");

        let update: StreamMessage = serde_json::from_str(&frame).unwrap();
        assert_eq!(update.action, StreamAction::Update);
        assert_eq!(update.symbol.as_deref(), Some("AAPL"));
        let quote = update.payload.unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, dec!(123.45));

        assert_eq!(
            feed.state.registry.active_symbols().await.unwrap(),
            vec!["AAPL"]
        );

        socket.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while feed.state.registry.stats().await.unwrap().clients > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("connection was not released");
        assert!(feed.state.registry.active_symbols().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_healthz() {
        let (addr, _feed) = serve(FeedConfig::default()).await;
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("ok"));
    }
}
