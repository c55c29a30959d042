#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use contact_relay::app::{AppState, router};
use contact_relay::config::Config;
use contact_relay::sheet::{self, SheetState};
use tokio::net::TcpListener;

/// Serve `app` on a random local port and return its base URL
pub async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://{addr}")
}

/// Local destination; returns its script URL and the sheet behind it
pub async fn destination() -> (String, Arc<SheetState>) {
    let state = SheetState::new(None);
    let base = serve(sheet::router(state.clone())).await;
    (format!("{base}/exec"), state)
}

/// Proxy relay server with the given configuration
pub async fn proxy(config: Config) -> String {
    serve(router(AppState::new(config))).await
}

/// A URL nothing is listening on
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/exec")
}
