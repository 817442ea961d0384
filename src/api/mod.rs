//! Read-only HTTP inspection of a running scheduler.
//!
//! Provides three GET endpoints:
//! - `/schedules`: snapshot of every schedule
//! - `/schedules/lookup?reference=...`: one schedule, full or `@` reference
//! - `/controllers`: snapshot of every controller with its bindings

mod handlers;
mod types;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::scheduler::Scheduler;

pub use types::{ErrorResponse, LookupQuery};

/// State shared across all request handlers.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// Builds the axum router with all API routes.
///
/// # Arguments
///
/// * `state` - Shared application state
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/schedules", get(handlers::list_schedules))
        .route("/schedules/lookup", get(handlers::lookup_schedule))
        .route("/controllers", get(handlers::list_controllers))
        .with_state(state)
}

/// Binds to the given address and serves the API until the server fails.
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server stops
/// with an error.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "inspection api listening");
    axum::serve(listener, app).await
}
