pub mod history;
pub mod tasks;
pub mod title;

use actix_web::{HttpRequest, HttpResponse};

use crate::state::AppState;

/// Bearer-token authorization plus work-ownership check shared by the HTTP
/// handlers. The WebSocket path does its own in-band handshake.
pub(crate) fn authorize(
    req: &HttpRequest,
    state: &AppState,
    work_id: &str,
) -> Result<i64, HttpResponse> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");

    let Some(user_id) = state.auth.verify(token) else {
        return Err(HttpResponse::Unauthorized().json(serde_json::json!({
            "detail": "无效的认证token"
        })));
    };

    match state.works.get(work_id) {
        Some(work) if work.created_by == user_id => Ok(user_id),
        _ => Err(HttpResponse::Forbidden().json(serde_json::json!({
            "detail": "无权限访问"
        }))),
    }
}
