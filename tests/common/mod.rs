//! Shared setup for integration tests: every transport bound on 127.0.0.1
//! with an ephemeral port.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use realtime_fanout::config::Settings;
use realtime_fanout::server::{create_app, AppState};

pub struct TestServer {
    pub state: AppState,
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub http_addr: SocketAddr,
}

pub fn local_settings() -> Settings {
    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".to_string();
    settings.server.port = 0;
    settings.tcp.host = "127.0.0.1".to_string();
    settings.tcp.port = 0;
    settings.udp.host = "127.0.0.1".to_string();
    settings.udp.port = 0;
    settings
}

pub async fn start(settings: Settings) -> TestServer {
    let (state, push_stream) = AppState::bind(settings).await.expect("transports should bind");

    let tcp_addr = push_stream.local_addr().unwrap();
    let udp_addr = state.notify.local_addr().unwrap();

    tokio::spawn(push_stream.run());
    tokio::spawn(state.notify.clone().run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = listener.local_addr().unwrap();
    let app = create_app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        state,
        tcp_addr,
        udp_addr,
        http_addr,
    }
}

/// Poll `condition` every 10ms until it holds, failing after `limit`
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(limit, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should hold before the deadline");
}
