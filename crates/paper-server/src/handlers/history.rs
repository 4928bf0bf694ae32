//! Chat-history reads: frontend format, raw format, statistics.

use actix_web::{web, HttpRequest, HttpResponse, Responder};

use crate::handlers::authorize;
use crate::state::AppState;

pub async fn frontend(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    let work_id = path.into_inner();
    if let Err(response) = authorize(&req, &state, &work_id) {
        return response;
    }

    let messages = match state.chat_store.get_for_frontend(&work_id, None).await {
        Ok(messages) => messages,
        Err(e) => {
            log::error!("[{work_id}] 读取聊天记录失败: {e}");
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({"detail": e.to_string()}));
        }
    };
    let context = state.chat_store.get_context(&work_id).await.unwrap_or_default();

    HttpResponse::Ok().json(serde_json::json!({
        "work_id": work_id,
        "messages": messages,
        "context": context,
    }))
}

pub async fn raw(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    let work_id = path.into_inner();
    if let Err(response) = authorize(&req, &state, &work_id) {
        return response;
    }

    let messages = match state.chat_store.get_messages(&work_id, None).await {
        Ok(messages) => messages,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({"detail": e.to_string()}))
        }
    };
    let context = state.chat_store.get_context(&work_id).await.unwrap_or_default();

    HttpResponse::Ok().json(serde_json::json!({
        "work_id": work_id,
        "messages": messages,
        "context": context,
    }))
}

pub async fn statistics(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> impl Responder {
    let work_id = path.into_inner();
    if let Err(response) = authorize(&req, &state, &work_id) {
        return response;
    }

    match state.chat_store.statistics(&work_id).await {
        Ok(stats) => HttpResponse::Ok().json(serde_json::json!({
            "work_id": work_id,
            "statistics": stats,
        })),
        Err(e) => HttpResponse::InternalServerError()
            .json(serde_json::json!({"detail": e.to_string()})),
    }
}
