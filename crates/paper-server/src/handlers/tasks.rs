//! Task-status query for a work.

use actix_web::{web, HttpRequest, HttpResponse, Responder};

use crate::handlers::authorize;
use crate::state::AppState;

pub async fn status(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    let work_id = path.into_inner();
    if let Err(response) = authorize(&req, &state, &work_id) {
        return response;
    }

    HttpResponse::Ok().json(state.supervisor.status_view(&work_id))
}
