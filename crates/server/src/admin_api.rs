//! Admin endpoints

use axum::extract::State;
use axum::response::Json;

use crate::bootstrap::AppState;
use crate::dtos::AdminResourcesDto;

/// Read-only snapshot of the resource pool and the queues.
///
/// Locks are taken in a fixed order (pool, then pending) so operators never
/// observe an inconsistent window between the two.
pub async fn admin_resources(State(state): State<AppState>) -> Json<AdminResourcesDto> {
    let snapshot = state.pool.snapshot();
    let pending_count = state.pending.len();
    let active_count = state.active.len();

    Json(AdminResourcesDto {
        total: snapshot.total,
        used: snapshot.used,
        queued: snapshot.queued,
        pending_count,
        active_count,
    })
}
