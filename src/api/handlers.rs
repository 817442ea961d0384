//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{ErrorResponse, LookupQuery};
use crate::controller::ControllerSnapshot;
use crate::schedule::ScheduleSnapshot;

/// `GET /schedules` → 200 + `Vec<ScheduleSnapshot>` JSON
pub async fn list_schedules(State(state): State<Arc<AppState>>) -> Json<Vec<ScheduleSnapshot>> {
    Json(
        state
            .scheduler
            .schedules()
            .iter()
            .map(|s| s.snapshot())
            .collect(),
    )
}

/// Returns one schedule.
///
/// `GET /schedules/lookup?reference=IED1LD0/FSCH1` → 200 + `ScheduleSnapshot`
/// `GET /schedules/lookup?reference=@LD0/FSCH1` → same, relative form
/// unknown reference → 404 + `ErrorResponse`
pub async fn lookup_schedule(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LookupQuery>,
) -> impl IntoResponse {
    match state.scheduler.try_schedule(&query.reference) {
        Ok(schedule) => Ok(Json(schedule.snapshot())),
        Err(err) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )),
    }
}

/// `GET /controllers` → 200 + `Vec<ControllerSnapshot>` JSON
pub async fn list_controllers(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ControllerSnapshot>> {
    Json(
        state
            .scheduler
            .controllers()
            .iter()
            .map(|c| c.snapshot())
            .collect(),
    )
}
