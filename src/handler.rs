//! Axum upgrade handler.
//!
//! Hosts that route with axum can mount [`ws_handler`] directly; hosts that
//! perform their own upgrade call [`crate::Channelcast::attach`] with the
//! resulting socket.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::Channelcast;

/// Upgrades the request and binds the socket to a new engine connection.
///
/// ```no_run
/// use std::sync::Arc;
/// use axum::{routing::get, Router};
/// use channelcast::{handler::ws_handler, Channelcast, Config};
///
/// # fn demo() -> Result<(), channelcast::Error> {
/// let engine = Arc::new(Channelcast::new(Config::default())?);
/// let app: Router = Router::new()
///     .route("/ws", get(ws_handler))
///     .with_state(Arc::clone(&engine));
/// # Ok(())
/// # }
/// ```
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<Channelcast>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        engine.attach(socket);
    })
}
