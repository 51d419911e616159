use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt as _, StreamExt as _};
use log::{debug, error, info, warn};
use serde_derive::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::broadcaster::{Broadcaster, Subscription};
use crate::messages::DeviceRecord;

#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    /// Upper bound on a single push to a client before it is dropped.
    pub send_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    devices: usize,
    observers: usize,
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/robots", get(list_robots))
        .route("/updates", get(updates))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

/// Any method and header; origins limited to `allowed_origins` unless empty.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return cors.allow_origin(Any);
    }

    let origins = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("Ignoring invalid allowed origin {:?}: {}", origin, err);
                None
            }
        })
        .collect::<Vec<_>>();
    cors.allow_origin(AllowOrigin::list(origins))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        devices: state.broadcaster.store().len(),
        observers: state.broadcaster.observer_count(),
    })
}

async fn list_robots(State(state): State<AppState>) -> Json<Vec<DeviceRecord>> {
    Json(state.broadcaster.store().snapshot().devices.to_vec())
}

async fn updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let subscription = state.broadcaster.attach();
    let id = subscription.id();
    info!("WebSocket {} connected", id);

    let (sink, mut stream) = socket.split();
    let mut send_task = tokio::spawn(forward_snapshots(subscription, sink, state.send_timeout));

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    debug!("WebSocket {} receive error: {}", id, err);
                    break;
                }
            }
        }
    });

    // Whichever side finishes first ends the connection. Aborting the sender
    // drops its subscription, which detaches the observer.
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("WebSocket {} disconnected", id);
}

async fn forward_snapshots<S>(mut subscription: Subscription, mut sink: S, send_timeout: Duration)
where
    S: futures::Sink<Message, Error = axum::Error> + Unpin,
{
    let id = subscription.id();
    while let Some(snapshot) = subscription.recv().await {
        let json = match snapshot.to_json() {
            Ok(json) => json,
            Err(err) => {
                error!("Failed to serialize tick {}: {}", snapshot.tick, err);
                continue;
            }
        };

        match tokio::time::timeout(send_timeout, sink.send(Message::Text(json.into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!("WebSocket {} send failed: {}", id, err);
                break;
            }
            Err(_) => {
                warn!("WebSocket {} send timed out after {:?}", id, send_timeout);
                break;
            }
        }
    }
    subscription.detach();
}

pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind failed on {addr}"))?;

    info!("Listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Error waiting for Ctrl-C: {:?}", err);
        return;
    }
    info!("Shutting down");
}
